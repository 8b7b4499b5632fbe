//! The analysis pass: freshness gate, snapshot load, policy
//! evaluation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use pulse_core::{Clock, PendingStop};
use pulsegrid_store::{FreshnessStatus, HealthStore, StoreError};

use crate::duplicates::stops_for_duplicate_instances;
use crate::snapshot::StateSnapshot;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one analysis pass.
#[derive(Debug, PartialEq)]
pub enum AnalysisResult {
    /// Both sides were fresh; these stops are ready for the sender.
    Complete { stops: Vec<PendingStop> },
    /// A side failed the freshness gate; nothing was produced.
    NotFresh(FreshnessStatus),
}

/// Runs analysis passes against the health store.
pub struct Analyzer {
    store: Arc<HealthStore>,
    clock: Arc<dyn Clock>,
}

impl Analyzer {
    pub fn new(store: Arc<HealthStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Run one pass. A stale side is an expected mode during warm-up
    /// or a bus outage, so it is an outcome, not an error.
    pub async fn analyze(&self) -> Result<AnalysisResult, AnalyzerError> {
        let now = self.clock.now();

        match self.store.verify_freshness(now).await? {
            FreshnessStatus::Ok => {}
            status => {
                info!(%status, "skipping analysis, state is not fresh enough to act on");
                return Ok(AnalysisResult::NotFresh(status));
            }
        }

        let heartbeats = self.store.get_instance_heartbeats().await?;
        let desired = self.store.get_desired_state().await?;
        let snapshot = StateSnapshot::build(heartbeats, desired);
        debug!(
            heartbeats = snapshot.heartbeat_count(),
            desired_apps = snapshot.desired.len(),
            "loaded state snapshot"
        );

        let grace_period = self.store.config().grace_period;
        let stops = stops_for_duplicate_instances(&snapshot, now, grace_period);
        if !stops.is_empty() {
            info!(stops = stops.len(), "analysis produced duplicate-instance stops");
        }
        Ok(AnalysisResult::Complete { stops })
    }
}
