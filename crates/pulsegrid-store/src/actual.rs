//! Actual-state persistence: heartbeat sync and the liveness-filtered
//! reader.
//!
//! Each envelope is the authoritative snapshot of one host's
//! instances, so a sync both upserts the incoming heartbeats and
//! deletes every cached entry of that host that the envelope no longer
//! carries.
//!
//! Only a *state* change schedules an instance write. A heartbeat
//! whose state-timestamp moved but whose state did not is dropped on
//! the floor: persisting timestamp drift would multiply write volume
//! by the fleet's heartbeat rate, and the timestamp is recovered by
//! the next real state transition.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, error, warn};

use pulse_core::{HeartbeatEnvelope, InstanceHeartbeat};
use pulsegrid_kv::{KvError, KvNode};

use crate::error::StoreResult;
use crate::HealthStore;

impl HealthStore {
    /// Persist a batch of host envelopes. Writes commit before
    /// deletes; a failed write aborts the sync without deleting.
    pub async fn sync_heartbeats(&self, envelopes: &[HeartbeatEnvelope]) -> StoreResult<()> {
        if envelopes.is_empty() {
            return Ok(());
        }

        let sync_started = Instant::now();
        let now = self.now();
        let mut nodes_to_save = Vec::new();
        let mut keys_to_delete = Vec::new();
        let mut incoming_instances = 0;

        {
            let mut cache = self.cache.lock().await;
            if cache.is_stale(now, self.config.cache_reload_interval) {
                debug!("busting heartbeat cache");
                let heartbeats = self.get_instance_heartbeats().await?;
                cache.reload(heartbeats, now);
            }

            for envelope in envelopes {
                incoming_instances += envelope.instances.len();
                nodes_to_save.push(self.presence_node(&envelope.host_id));

                let incoming_ids: HashSet<&str> = envelope
                    .instances
                    .iter()
                    .map(|hb| hb.instance_id.as_str())
                    .collect();

                for heartbeat in &envelope.instances {
                    match cache.get(&heartbeat.instance_id) {
                        Some(existing) if existing.state == heartbeat.state => continue,
                        _ => {
                            nodes_to_save.push(self.instance_node(heartbeat));
                            cache.insert(heartbeat.clone());
                        }
                    }
                }

                // This host's envelope is authoritative: anything we
                // know for the host but it no longer reports is gone.
                let vanished: Vec<InstanceHeartbeat> = cache
                    .values()
                    .filter(|hb| {
                        hb.host_id == envelope.host_id
                            && !incoming_ids.contains(hb.instance_id.as_str())
                    })
                    .cloned()
                    .collect();
                for heartbeat in vanished {
                    keys_to_delete.push(self.instance_heartbeat_key(&heartbeat));
                    cache.remove(&heartbeat.instance_id);
                }
            }
        }
        // Cache mutex released; the KV round-trips run lock-free.

        let save_started = Instant::now();
        let saved = nodes_to_save.len();
        let result = self.with_deadline(self.kv.set(nodes_to_save)).await;
        self.metrics
            .record_store_write(saved, save_started.elapsed());
        if let Err(e) = result {
            error!(error = %e, "failed to save while syncing heartbeats");
            return Err(e.into());
        }

        let deleted = keys_to_delete.len();
        if !keys_to_delete.is_empty() {
            let delete_started = Instant::now();
            let result = self.with_deadline(self.kv.delete(&keys_to_delete)).await;
            self.metrics
                .record_store_delete(deleted, delete_started.elapsed());
            match result {
                Err(KvError::NotFound) => {
                    warn!("tried to delete a missing key while syncing heartbeats, soldiering on");
                }
                Err(e) => {
                    error!(error = %e, "failed to delete while syncing heartbeats, bailing out");
                    return Err(e.into());
                }
                Ok(()) => {}
            }
        }

        debug!(
            envelopes = envelopes.len(),
            instances = incoming_instances,
            saved,
            deleted,
            elapsed = ?sync_started.elapsed(),
            "synced heartbeats"
        );
        Ok(())
    }

    /// Persist a single envelope. The production path batches via
    /// [`HealthStore::sync_heartbeats`]; this one stays behind the
    /// `batched_saves` flag for debugging and tests.
    pub async fn sync_heartbeat(&self, envelope: &HeartbeatEnvelope) -> StoreResult<()> {
        self.sync_heartbeats(std::slice::from_ref(envelope)).await
    }

    /// Every instance heartbeat whose host is still present.
    ///
    /// Heartbeats of expired hosts are swept as a side effect: the
    /// whole app subtree containing an expired leaf is deleted. The
    /// sweep is coarse on purpose; the next heartbeat from a live host
    /// repopulates its instances.
    pub async fn get_instance_heartbeats(&self) -> StoreResult<Vec<InstanceHeartbeat>> {
        let read_started = Instant::now();

        let root = match self.with_deadline(self.kv.list_recursively(&self.actual_root())).await {
            Err(KvError::NotFound) => return Ok(Vec::new()),
            other => other?,
        };
        let live_hosts = self.live_hosts().await?;

        let mut results = Vec::new();
        let mut expired_keys = Vec::new();
        for app_node in &root.children {
            self.heartbeats_for_app_node(app_node, &live_hosts, &mut results, &mut expired_keys);
        }

        self.sweep_expired(&mut expired_keys).await?;
        self.metrics
            .record_store_read(results.len(), read_started.elapsed());
        Ok(results)
    }

    /// Liveness-filtered heartbeats for a single app version.
    pub async fn get_instance_heartbeats_for_app(
        &self,
        app_id: &str,
        app_version: &str,
    ) -> StoreResult<Vec<InstanceHeartbeat>> {
        let key = self.app_subtree_key(app_id, app_version);
        let app_node = match self.with_deadline(self.kv.list_recursively(&key)).await {
            Err(KvError::NotFound) => return Ok(Vec::new()),
            other => other?,
        };
        let live_hosts = self.live_hosts().await?;

        let mut results = Vec::new();
        let mut expired_keys = Vec::new();
        self.heartbeats_for_app_node(&app_node, &live_hosts, &mut results, &mut expired_keys);

        self.sweep_expired(&mut expired_keys).await?;
        Ok(results)
    }

    /// Decode one app subtree, splitting leaves into live results and
    /// expired parent keys.
    fn heartbeats_for_app_node(
        &self,
        app_node: &KvNode,
        live_hosts: &HashSet<String>,
        results: &mut Vec<InstanceHeartbeat>,
        expired_keys: &mut Vec<String>,
    ) {
        let app_key_segment = match app_node.key.rsplit('/').next() {
            Some(segment) => segment,
            None => return,
        };
        let (app_id, app_version) = match app_key_segment.split_once(',') {
            Some(pair) => pair,
            None => {
                warn!(key = %app_node.key, "skipping malformed app subtree key");
                return;
            }
        };

        for leaf in &app_node.children {
            let instance_id = match leaf.key.rsplit('/').next() {
                Some(id) => id,
                None => continue,
            };
            let heartbeat = match self.config.codec.decode_instance(
                app_id,
                app_version,
                instance_id,
                &leaf.value,
            ) {
                Ok(heartbeat) => heartbeat,
                Err(e) => {
                    warn!(key = %leaf.key, error = %e, "skipping undecodable heartbeat value");
                    continue;
                }
            };

            if live_hosts.contains(&heartbeat.host_id) {
                results.push(heartbeat);
            } else {
                expired_keys.push(app_node.key.clone());
            }
        }
    }

    /// Delete expired app subtrees, tolerating keys already gone.
    async fn sweep_expired(&self, expired_keys: &mut Vec<String>) -> StoreResult<()> {
        expired_keys.sort();
        expired_keys.dedup();
        if expired_keys.is_empty() {
            return Ok(());
        }

        let delete_started = Instant::now();
        let result = self.with_deadline(self.kv.delete(expired_keys)).await;
        self.metrics
            .record_store_delete(expired_keys.len(), delete_started.elapsed());
        match result {
            Err(KvError::NotFound) => {
                warn!("tried to delete a missing expired key, soldiering on");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to delete expired heartbeat keys");
                Err(e.into())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Hosts with a live presence record.
    async fn live_hosts(&self) -> StoreResult<HashSet<String>> {
        let node = match self.with_deadline(self.kv.list_recursively(&self.presence_root())).await
        {
            Err(KvError::NotFound) => return Ok(HashSet::new()),
            other => other?,
        };
        Ok(node
            .children
            .into_iter()
            .map(|child| child.value)
            .collect())
    }

    fn presence_node(&self, host_id: &str) -> KvNode {
        KvNode::with_ttl(self.presence_key(host_id), host_id, self.config.heartbeat_ttl)
    }

    fn instance_node(&self, heartbeat: &InstanceHeartbeat) -> KvNode {
        KvNode::leaf(
            self.instance_heartbeat_key(heartbeat),
            self.config.codec.encode_instance(heartbeat),
        )
    }
}
