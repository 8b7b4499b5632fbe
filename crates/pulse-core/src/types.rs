//! Domain types for the pulsegrid health core.
//!
//! These model the two worlds the health loop reconciles: the *actual*
//! state reported by execution hosts (heartbeats) and the *desired*
//! state pushed by the control plane. Wire names follow the bus payload
//! format emitted by execution agents.

use serde::{Deserialize, Serialize};

/// Unique identifier of an application.
pub type AppId = String;

/// Globally unique identifier of one running instance.
pub type InstanceId = String;

/// Unique identifier of an execution-agent host.
pub type HostId = String;

// ── Actual state ──────────────────────────────────────────────────

/// Lifecycle state an execution host reports for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "CRASHED")]
    Crashed,
    #[serde(rename = "EVACUATING")]
    Evacuating,
}

impl InstanceState {
    /// Wire form of the state (`STARTING`, `RUNNING`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Starting => "STARTING",
            InstanceState::Running => "RUNNING",
            InstanceState::Crashed => "CRASHED",
            InstanceState::Evacuating => "EVACUATING",
        }
    }

    /// Parse the wire form. Returns `None` for anything unrecognized.
    pub fn parse(s: &str) -> Option<InstanceState> {
        match s {
            "STARTING" => Some(InstanceState::Starting),
            "RUNNING" => Some(InstanceState::Running),
            "CRASHED" => Some(InstanceState::Crashed),
            "EVACUATING" => Some(InstanceState::Evacuating),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instance's heartbeat as reported by its host.
///
/// `instance_id` is globally unique; `(app_id, app_version,
/// instance_index)` is not: two distinct instance ids may share an
/// index, which is the duplicate-instance anomaly the analyzer
/// resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeartbeat {
    #[serde(rename = "droplet")]
    pub app_id: AppId,
    #[serde(rename = "version")]
    pub app_version: String,
    #[serde(rename = "instance")]
    pub instance_id: InstanceId,
    #[serde(rename = "index")]
    pub instance_index: u32,
    pub state: InstanceState,
    /// Seconds since epoch of the last state transition. Fractional on
    /// the wire; canonicalized to whole seconds by the compact codec.
    pub state_timestamp: f64,
    /// Filled from the envelope when decoding a bus payload.
    #[serde(rename = "dea_guid", default)]
    pub host_id: HostId,
}

impl InstanceHeartbeat {
    /// Composite key grouping heartbeats of one app version.
    pub fn app_key(&self) -> String {
        app_key(&self.app_id, &self.app_version)
    }

    pub fn is_starting(&self) -> bool {
        self.state == InstanceState::Starting
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn is_starting_or_running(&self) -> bool {
        self.is_starting() || self.is_running()
    }

    pub fn is_crashed(&self) -> bool {
        self.state == InstanceState::Crashed
    }

    pub fn is_evacuating(&self) -> bool {
        self.state == InstanceState::Evacuating
    }
}

/// One bus message from one host: the authoritative snapshot of every
/// instance currently running there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEnvelope {
    #[serde(rename = "dea")]
    pub host_id: HostId,
    #[serde(rename = "droplets")]
    pub instances: Vec<InstanceHeartbeat>,
}

/// Build the `{app_id},{app_version}` composite key.
pub fn app_key(app_id: &str, app_version: &str) -> String {
    format!("{app_id},{app_version}")
}

// ── Desired state ─────────────────────────────────────────────────

/// Whether the control plane wants an app running at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "STOPPED")]
    Stopped,
}

/// Staging status of the app package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "STAGED")]
    Staged,
    #[serde(rename = "FAILED")]
    Failed,
}

/// Desired-state record for one app version, written by the external
/// control-plane fetcher and read by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredApp {
    pub app_id: AppId,
    pub app_version: String,
    pub number_of_instances: u32,
    pub state: AppState,
    pub package_state: PackageState,
    /// Unix timestamp (seconds) of the last control-plane update.
    pub updated_at: u64,
}

impl DesiredApp {
    /// Composite key matching the actual-state grouping.
    pub fn app_key(&self) -> String {
        app_key(&self.app_id, &self.app_version)
    }
}

// ── Corrective intents ────────────────────────────────────────────

/// A scheduled stop awaiting dispatch by the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStop {
    pub app_id: AppId,
    pub app_version: String,
    pub instance_index: u32,
    pub instance_id: InstanceId,
    /// Duplicate-instance stops must not trigger a replacement start.
    pub is_duplicate: bool,
    /// Unix timestamp (seconds) when the analyzer issued the stop.
    pub issued_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heartbeat() -> InstanceHeartbeat {
        InstanceHeartbeat {
            app_id: "app-1".to_string(),
            app_version: "v1".to_string(),
            instance_id: "inst-1".to_string(),
            instance_index: 0,
            state: InstanceState::Running,
            state_timestamp: 100.0,
            host_id: "host-1".to_string(),
        }
    }

    #[test]
    fn state_wire_round_trip() {
        for state in [
            InstanceState::Starting,
            InstanceState::Running,
            InstanceState::Crashed,
            InstanceState::Evacuating,
        ] {
            assert_eq!(InstanceState::parse(state.as_str()), Some(state));
        }
        assert_eq!(InstanceState::parse("FLAPPING"), None);
    }

    #[test]
    fn app_key_uses_comma_separator() {
        let hb = test_heartbeat();
        assert_eq!(hb.app_key(), "app-1,v1");
        assert_eq!(app_key("a", "b"), "a,b");
    }

    #[test]
    fn state_predicates() {
        let mut hb = test_heartbeat();
        assert!(hb.is_running());
        assert!(hb.is_starting_or_running());
        assert!(!hb.is_crashed());

        hb.state = InstanceState::Starting;
        assert!(hb.is_starting_or_running());

        hb.state = InstanceState::Crashed;
        assert!(!hb.is_starting_or_running());
        assert!(hb.is_crashed());

        hb.state = InstanceState::Evacuating;
        assert!(hb.is_evacuating());
    }

    #[test]
    fn heartbeat_json_wire_names() {
        let hb = test_heartbeat();
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(json["droplet"], "app-1");
        assert_eq!(json["version"], "v1");
        assert_eq!(json["instance"], "inst-1");
        assert_eq!(json["index"], 0);
        assert_eq!(json["state"], "RUNNING");
    }

    #[test]
    fn desired_app_key_matches_actual() {
        let desired = DesiredApp {
            app_id: "app-1".to_string(),
            app_version: "v1".to_string(),
            number_of_instances: 2,
            state: AppState::Started,
            package_state: PackageState::Staged,
            updated_at: 1000,
        };
        assert_eq!(desired.app_key(), test_heartbeat().app_key());
    }
}
