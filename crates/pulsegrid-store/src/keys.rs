//! KV key layout, relative to the configured root.
//!
//! ```text
//! /{root}/dea-presence/{host_id}
//! /{root}/apps/actual/{app_id},{app_version}/{instance_id}
//! /{root}/apps/desired/{app_id},{app_version}
//! /{root}/actual-fresh
//! /{root}/desired-fresh
//! ```

use pulse_core::{app_key, InstanceHeartbeat};

use crate::HealthStore;

impl HealthStore {
    pub(crate) fn schema_root(&self) -> &str {
        &self.config.kv_root
    }

    pub(crate) fn presence_root(&self) -> String {
        format!("{}/dea-presence", self.schema_root())
    }

    pub(crate) fn presence_key(&self, host_id: &str) -> String {
        format!("{}/{host_id}", self.presence_root())
    }

    pub(crate) fn actual_root(&self) -> String {
        format!("{}/apps/actual", self.schema_root())
    }

    pub(crate) fn app_subtree_key(&self, app_id: &str, app_version: &str) -> String {
        format!("{}/{}", self.actual_root(), app_key(app_id, app_version))
    }

    pub(crate) fn instance_heartbeat_key(&self, heartbeat: &InstanceHeartbeat) -> String {
        format!(
            "{}/{}",
            self.app_subtree_key(&heartbeat.app_id, &heartbeat.app_version),
            heartbeat.instance_id
        )
    }

    pub(crate) fn desired_root(&self) -> String {
        format!("{}/apps/desired", self.schema_root())
    }

    pub(crate) fn desired_key(&self, app_id: &str, app_version: &str) -> String {
        format!("{}/{}", self.desired_root(), app_key(app_id, app_version))
    }

    pub(crate) fn actual_fresh_key(&self) -> String {
        format!("{}/actual-fresh", self.schema_root())
    }

    pub(crate) fn desired_fresh_key(&self) -> String {
        format!("{}/desired-fresh", self.schema_root())
    }
}
