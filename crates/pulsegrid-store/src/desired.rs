//! Desired-state projection.
//!
//! Written by the external control-plane fetcher, read by the
//! analyzer. Each record carries the desired-state TTL so an app the
//! fetcher stops refreshing ages out on its own.

use tracing::warn;

use pulse_core::DesiredApp;
use pulsegrid_kv::{KvError, KvNode};

use crate::error::StoreResult;
use crate::HealthStore;

impl HealthStore {
    /// Upsert desired-app records, each with the configured TTL.
    pub async fn save_desired_state(&self, apps: &[DesiredApp]) -> StoreResult<()> {
        if apps.is_empty() {
            return Ok(());
        }

        let mut nodes = Vec::with_capacity(apps.len());
        for app in apps {
            let value = serde_json::to_string(app).unwrap_or_default();
            nodes.push(KvNode::with_ttl(
                self.desired_key(&app.app_id, &app.app_version),
                value,
                self.config.desired_state_ttl,
            ));
        }
        self.with_deadline(self.kv.set(nodes)).await?;
        Ok(())
    }

    /// Every unexpired desired-app record.
    pub async fn get_desired_state(&self) -> StoreResult<Vec<DesiredApp>> {
        let node = match self.with_deadline(self.kv.list_recursively(&self.desired_root())).await
        {
            Err(KvError::NotFound) => return Ok(Vec::new()),
            other => other?,
        };

        let mut results = Vec::new();
        for leaf in &node.children {
            match serde_json::from_str::<DesiredApp>(&leaf.value) {
                Ok(app) => results.push(app),
                Err(e) => {
                    warn!(key = %leaf.key, error = %e, "skipping unreadable desired-app record");
                }
            }
        }
        Ok(results)
    }

    /// Remove the record for one app version. Missing is fine.
    pub async fn delete_desired_state(&self, app_id: &str, app_version: &str) -> StoreResult<()> {
        let key = self.desired_key(app_id, app_version);
        match self.with_deadline(self.kv.delete(&[key])).await {
            Err(KvError::NotFound) => Ok(()),
            other => Ok(other?),
        }
    }
}
