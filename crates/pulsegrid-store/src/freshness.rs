//! Freshness register — per-side TTL-backed trust markers.
//!
//! Downstream analysis only acts when both sides of the diff are
//! recent enough. Each side keeps one marker node whose existence
//! means "data has been arriving"; the marker's `timestamp` is the
//! *first* bump, never overwritten by refreshes. The actual side adds
//! a warm-up rule so one post-restart heartbeat burst cannot make a
//! half-populated index look trustworthy.

use serde::{Deserialize, Serialize};
use tracing::warn;

use pulsegrid_kv::{KvError, KvNode};

use crate::error::StoreResult;
use crate::HealthStore;

#[derive(Debug, Serialize, Deserialize)]
struct FreshnessMarker {
    timestamp: u64,
}

/// Outcome of checking both sides at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessStatus {
    Ok,
    ActualNotFresh,
    DesiredNotFresh,
    BothNotFresh,
}

impl std::fmt::Display for FreshnessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FreshnessStatus::Ok => "ok",
            FreshnessStatus::ActualNotFresh => "actual not fresh",
            FreshnessStatus::DesiredNotFresh => "desired not fresh",
            FreshnessStatus::BothNotFresh => "actual and desired not fresh",
        };
        f.write_str(s)
    }
}

impl HealthStore {
    /// Record that actual state arrived. Creates the marker on first
    /// bump; later bumps refresh the TTL without touching
    /// `first_seen_at`.
    pub async fn bump_actual_freshness(&self, now: u64) -> StoreResult<()> {
        let key = self.actual_fresh_key();
        let ttl = self.config.actual_freshness_ttl;
        self.bump_freshness(key, ttl, now).await
    }

    /// Record that desired state arrived.
    pub async fn bump_desired_freshness(&self, now: u64) -> StoreResult<()> {
        let key = self.desired_fresh_key();
        let ttl = self.config.desired_freshness_ttl;
        self.bump_freshness(key, ttl, now).await
    }

    async fn bump_freshness(&self, key: String, ttl: u64, now: u64) -> StoreResult<()> {
        let current = match self.with_deadline(self.kv.get(&key)).await {
            Err(KvError::NotFound) => None,
            other => Some(other?),
        };

        match current {
            None => self.create_marker(&key, ttl, now).await,
            Some(node) => {
                // Refresh the TTL, preserving the original timestamp.
                // CAS so a concurrent first-bump cannot be clobbered.
                let refreshed = KvNode::with_ttl(key.clone(), node.value.clone(), ttl);
                match self
                    .with_deadline(self.kv.compare_and_swap(&key, &node.value, refreshed))
                    .await
                {
                    Ok(()) => Ok(()),
                    // Expired between the get and the swap.
                    Err(KvError::NotFound) => self.create_marker(&key, ttl, now).await,
                    // Another bumper won the race; nothing left to do.
                    Err(KvError::CompareFailed) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn create_marker(&self, key: &str, ttl: u64, now: u64) -> StoreResult<()> {
        let marker = FreshnessMarker { timestamp: now };
        let value = serde_json::to_string(&marker).unwrap_or_default();
        self.with_deadline(self.kv.set(vec![KvNode::with_ttl(key, value, ttl)]))
            .await?;
        Ok(())
    }

    /// True when the actual marker exists and has aged past the
    /// warm-up period.
    pub async fn is_actual_fresh(&self, now: u64) -> StoreResult<bool> {
        let key = self.actual_fresh_key();
        match self.marker_timestamp(&key).await? {
            Some(first_seen_at) => {
                Ok(now.saturating_sub(first_seen_at) >= self.config.actual_warmup)
            }
            None => Ok(false),
        }
    }

    /// True when the desired marker exists. No warm-up: desired state
    /// arrives in one complete fetch.
    pub async fn is_desired_fresh(&self, _now: u64) -> StoreResult<bool> {
        let key = self.desired_fresh_key();
        Ok(self.marker_timestamp(&key).await?.is_some())
    }

    /// Check both sides; the status is the pointwise conjunction.
    pub async fn verify_freshness(&self, now: u64) -> StoreResult<FreshnessStatus> {
        let actual = self.is_actual_fresh(now).await?;
        let desired = self.is_desired_fresh(now).await?;
        Ok(match (actual, desired) {
            (true, true) => FreshnessStatus::Ok,
            (false, true) => FreshnessStatus::ActualNotFresh,
            (true, false) => FreshnessStatus::DesiredNotFresh,
            (false, false) => FreshnessStatus::BothNotFresh,
        })
    }

    async fn marker_timestamp(&self, key: &str) -> StoreResult<Option<u64>> {
        match self.with_deadline(self.kv.get(key)).await {
            Err(KvError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
            Ok(node) => match serde_json::from_str::<FreshnessMarker>(&node.value) {
                Ok(marker) => Ok(Some(marker.timestamp)),
                Err(e) => {
                    warn!(%key, error = %e, "unreadable freshness marker, treating as absent");
                    Ok(None)
                }
            },
        }
    }
}
