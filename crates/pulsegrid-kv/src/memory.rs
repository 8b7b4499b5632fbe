//! In-memory KV backend.
//!
//! A flat map of path → entry with lazy TTL expiry driven by the
//! injected [`Clock`]. Used by the test suites and by
//! `pulsed standalone` when persistence is not wanted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pulse_core::Clock;

use crate::error::{KvError, KvResult};
use crate::tree::{check_leaf_placement, leaf_node, occupied, prune_expired, subtree, Entry};
use crate::{KvNode, KvStore};

/// TTL-aware in-memory implementation of [`KvStore`].
pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of live (unexpired) leaves. Test aid.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, nodes: Vec<KvNode>) -> KvResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);

        for node in &nodes {
            if !check_leaf_placement(&node.key, &entries) {
                return Err(KvError::NodeIsDirectory);
            }
        }

        for node in nodes {
            entries.insert(
                node.key.clone(),
                Entry {
                    value: node.value,
                    expires_at: node.ttl.map(|ttl| now + ttl),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);

        let mut any_missing = false;
        for key in keys {
            if !occupied(key, &entries) {
                any_missing = true;
                continue;
            }
            let dir_prefix = format!("{key}/");
            entries.retain(|k, _| k != key && !k.starts_with(&dir_prefix));
        }

        if any_missing {
            Err(KvError::NotFound)
        } else {
            Ok(())
        }
    }

    async fn get(&self, key: &str) -> KvResult<KvNode> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);

        if let Some(entry) = entries.get(key) {
            return Ok(leaf_node(key, entry, now));
        }
        let dir_prefix = format!("{key}/");
        if entries.keys().any(|k| k.starts_with(&dir_prefix)) {
            return Err(KvError::NodeIsDirectory);
        }
        Err(KvError::NotFound)
    }

    async fn list_recursively(&self, prefix: &str) -> KvResult<KvNode> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);

        subtree(prefix, &entries, now).ok_or(KvError::NotFound)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, node: KvNode) -> KvResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);

        match entries.get(key) {
            None => {
                if occupied(key, &entries) {
                    Err(KvError::NodeIsDirectory)
                } else {
                    Err(KvError::NotFound)
                }
            }
            Some(entry) if entry.value != expected => Err(KvError::CompareFailed),
            Some(_) => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: node.value,
                        expires_at: node.ttl.map(|ttl| now + ttl),
                    },
                );
                Ok(())
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        prune_expired(&mut entries, now);

        match entries.get(key) {
            None => Err(KvError::NotFound),
            Some(entry) if entry.value != expected => Err(KvError::CompareFailed),
            Some(_) => {
                entries.remove(key);
                Ok(())
            }
        }
    }
}
