//! Point-in-time snapshot of both state worlds.
//!
//! One store read per analysis pass; everything after indexes the
//! loaded data in memory.

use std::collections::HashMap;

use pulse_core::{DesiredApp, InstanceHeartbeat, InstanceId};

/// Indexed view of actual and desired state for one analysis pass.
pub struct StateSnapshot {
    pub desired: Vec<DesiredApp>,
    heartbeats_by_instance: HashMap<InstanceId, InstanceHeartbeat>,
    heartbeats_by_app: HashMap<String, Vec<InstanceHeartbeat>>,
}

impl StateSnapshot {
    pub fn build(heartbeats: Vec<InstanceHeartbeat>, desired: Vec<DesiredApp>) -> Self {
        let mut heartbeats_by_instance = HashMap::new();
        let mut heartbeats_by_app: HashMap<String, Vec<InstanceHeartbeat>> = HashMap::new();

        for heartbeat in heartbeats {
            heartbeats_by_app
                .entry(heartbeat.app_key())
                .or_default()
                .push(heartbeat.clone());
            heartbeats_by_instance.insert(heartbeat.instance_id.clone(), heartbeat);
        }

        Self {
            desired,
            heartbeats_by_instance,
            heartbeats_by_app,
        }
    }

    pub fn heartbeat_for_instance(&self, instance_id: &str) -> Option<&InstanceHeartbeat> {
        self.heartbeats_by_instance.get(instance_id)
    }

    /// All heartbeats of one app version.
    pub fn heartbeats_for_app(&self, app_key: &str) -> &[InstanceHeartbeat] {
        self.heartbeats_by_app
            .get(app_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Heartbeats of one app version occupying the given index.
    pub fn heartbeats_at_index(&self, app_key: &str, index: u32) -> Vec<&InstanceHeartbeat> {
        self.heartbeats_for_app(app_key)
            .iter()
            .filter(|hb| hb.instance_index == index)
            .collect()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats_by_instance.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{AppState, InstanceState, PackageState};

    fn heartbeat(app_id: &str, instance_id: &str, index: u32) -> InstanceHeartbeat {
        InstanceHeartbeat {
            app_id: app_id.to_string(),
            app_version: "v1".to_string(),
            instance_id: instance_id.to_string(),
            instance_index: index,
            state: InstanceState::Running,
            state_timestamp: 100.0,
            host_id: "h1".to_string(),
        }
    }

    fn desired(app_id: &str) -> DesiredApp {
        DesiredApp {
            app_id: app_id.to_string(),
            app_version: "v1".to_string(),
            number_of_instances: 2,
            state: AppState::Started,
            package_state: PackageState::Staged,
            updated_at: 1000,
        }
    }

    #[test]
    fn indexes_by_app_and_instance() {
        let snapshot = StateSnapshot::build(
            vec![
                heartbeat("app-1", "i1", 0),
                heartbeat("app-1", "i2", 1),
                heartbeat("app-2", "i3", 0),
            ],
            vec![desired("app-1")],
        );

        assert_eq!(snapshot.heartbeat_count(), 3);
        assert_eq!(snapshot.heartbeats_for_app("app-1,v1").len(), 2);
        assert_eq!(snapshot.heartbeats_for_app("app-2,v1").len(), 1);
        assert!(snapshot.heartbeats_for_app("app-9,v1").is_empty());
        assert!(snapshot.heartbeat_for_instance("i2").is_some());
        assert!(snapshot.heartbeat_for_instance("i9").is_none());
    }

    #[test]
    fn index_lookup_collects_duplicates() {
        let snapshot = StateSnapshot::build(
            vec![
                heartbeat("app-1", "i1", 0),
                heartbeat("app-1", "i2", 1),
                heartbeat("app-1", "i3", 1),
            ],
            Vec::new(),
        );

        assert_eq!(snapshot.heartbeats_at_index("app-1,v1", 0).len(), 1);
        assert_eq!(snapshot.heartbeats_at_index("app-1,v1", 1).len(), 2);
        assert!(snapshot.heartbeats_at_index("app-1,v1", 2).is_empty());
    }
}
