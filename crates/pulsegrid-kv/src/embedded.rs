//! Embedded KV backend over redb.
//!
//! Rows are JSON `(value, expires_at)` pairs in a single `&str → &[u8]`
//! table; TTL expiry is evaluated lazily against the injected clock and
//! expired rows are purged on the write path. Gives `pulsed` durable
//! local state without a fleet KV deployment.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use pulse_core::Clock;

use crate::error::{KvError, KvResult};
use crate::tree::{check_leaf_placement, leaf_node, occupied, subtree, Entry};
use crate::{KvNode, KvStore};

const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    value: String,
    expires_at: Option<u64>,
}

fn backend_err(e: impl std::fmt::Display) -> KvError {
    KvError::Backend(e.to_string())
}

/// Persistent [`KvStore`] implementation backed by redb.
pub struct RedbKv {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl RedbKv {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> KvResult<Self> {
        let db = Database::create(path).map_err(backend_err)?;
        let store = Self {
            db: Arc::new(db),
            clock,
        };
        store.ensure_table()?;
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> KvResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(backend_err)?;
        let store = Self {
            db: Arc::new(db),
            clock,
        };
        store.ensure_table()?;
        Ok(store)
    }

    fn ensure_table(&self) -> KvResult<()> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        txn.open_table(KV).map_err(backend_err)?;
        txn.commit().map_err(backend_err)?;
        Ok(())
    }

    /// Load every live row. Expired rows are skipped, not removed;
    /// the write path purges them.
    fn snapshot(&self, now: u64) -> KvResult<BTreeMap<String, Entry>> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(KV).map_err(backend_err)?;

        let mut entries = BTreeMap::new();
        for item in table.iter().map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            let row: Row = serde_json::from_slice(value.value()).map_err(backend_err)?;
            let entry = Entry {
                value: row.value,
                expires_at: row.expires_at,
            };
            if !entry.is_expired(now) {
                entries.insert(key.value().to_string(), entry);
            }
        }
        Ok(entries)
    }

    /// Live rows as seen inside a write transaction, plus the keys of
    /// rows that have expired and should be purged.
    fn scan_write_table(
        table: &redb::Table<'_, &'static str, &'static [u8]>,
        now: u64,
    ) -> KvResult<(BTreeMap<String, Entry>, Vec<String>)> {
        let mut live = BTreeMap::new();
        let mut expired = Vec::new();
        for item in table.iter().map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            let row: Row = serde_json::from_slice(value.value()).map_err(backend_err)?;
            let entry = Entry {
                value: row.value,
                expires_at: row.expires_at,
            };
            if entry.is_expired(now) {
                expired.push(key.value().to_string());
            } else {
                live.insert(key.value().to_string(), entry);
            }
        }
        Ok((live, expired))
    }
}

#[async_trait]
impl KvStore for RedbKv {
    async fn set(&self, nodes: Vec<KvNode>) -> KvResult<()> {
        let now = self.clock.now();
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = txn.open_table(KV).map_err(backend_err)?;
            let (live, expired) = Self::scan_write_table(&table, now)?;

            for key in &expired {
                table.remove(key.as_str()).map_err(backend_err)?;
            }
            for node in &nodes {
                if !check_leaf_placement(&node.key, &live) {
                    return Err(KvError::NodeIsDirectory);
                }
            }
            for node in &nodes {
                let row = Row {
                    value: node.value.clone(),
                    expires_at: node.ttl.map(|ttl| now + ttl),
                };
                let encoded = serde_json::to_vec(&row).map_err(backend_err)?;
                table
                    .insert(node.key.as_str(), encoded.as_slice())
                    .map_err(backend_err)?;
            }
        }
        txn.commit().map_err(backend_err)?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        let now = self.clock.now();
        let txn = self.db.begin_write().map_err(backend_err)?;
        let mut any_missing = false;
        {
            let mut table = txn.open_table(KV).map_err(backend_err)?;
            let (live, expired) = Self::scan_write_table(&table, now)?;

            let mut to_remove = expired;
            for key in keys {
                if !occupied(key, &live) {
                    any_missing = true;
                    continue;
                }
                let dir_prefix = format!("{key}/");
                to_remove.extend(
                    live.keys()
                        .filter(|k| *k == key || k.starts_with(&dir_prefix))
                        .cloned(),
                );
            }
            for key in to_remove {
                table.remove(key.as_str()).map_err(backend_err)?;
            }
        }
        txn.commit().map_err(backend_err)?;

        if any_missing {
            Err(KvError::NotFound)
        } else {
            Ok(())
        }
    }

    async fn get(&self, key: &str) -> KvResult<KvNode> {
        let now = self.clock.now();
        let entries = self.snapshot(now)?;

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
        let entries = self.snapshot(now)?;
        subtree(prefix, &entries, now).ok_or(KvError::NotFound)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, node: KvNode) -> KvResult<()> {
        let now = self.clock.now();
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = txn.open_table(KV).map_err(backend_err)?;
            let current = match table.get(key).map_err(backend_err)? {
                Some(guard) => {
                    let row: Row = serde_json::from_slice(guard.value()).map_err(backend_err)?;
                    let entry = Entry {
                        value: row.value,
                        expires_at: row.expires_at,
                    };
                    if entry.is_expired(now) {
                        None
                    } else {
                        Some(entry)
                    }
                }
                None => None,
            };

            match current {
                None => return Err(KvError::NotFound),
                Some(entry) if entry.value != expected => return Err(KvError::CompareFailed),
                Some(_) => {
                    let row = Row {
                        value: node.value.clone(),
                        expires_at: node.ttl.map(|ttl| now + ttl),
                    };
                    let encoded = serde_json::to_vec(&row).map_err(backend_err)?;
                    table
                        .insert(key, encoded.as_slice())
                        .map_err(backend_err)?;
                }
            }
        }
        txn.commit().map_err(backend_err)?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<()> {
        let now = self.clock.now();
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = txn.open_table(KV).map_err(backend_err)?;
            let current = match table.get(key).map_err(backend_err)? {
                Some(guard) => {
                    let row: Row = serde_json::from_slice(guard.value()).map_err(backend_err)?;
                    let entry = Entry {
                        value: row.value,
                        expires_at: row.expires_at,
                    };
                    if entry.is_expired(now) {
                        None
                    } else {
                        Some(entry)
                    }
                }
                None => None,
            };

            match current {
                None => return Err(KvError::NotFound),
                Some(entry) if entry.value != expected => return Err(KvError::CompareFailed),
                Some(_) => {
                    table.remove(key).map_err(backend_err)?;
                }
            }
        }
        txn.commit().map_err(backend_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::ManualClock;

    fn test_kv() -> (Arc<ManualClock>, RedbKv) {
        let clock = Arc::new(ManualClock::new(1000));
        let kv = RedbKv::open_in_memory(clock.clone()).unwrap();
        (clock, kv)
    }

    #[tokio::test]
    async fn set_get_round_trip() {
        let (_, kv) = test_kv();
        kv.set(vec![KvNode::leaf("/a/b", "v1")]).await.unwrap();

        let node = kv.get("/a/b").await.unwrap();
        assert_eq!(node.value, "v1");
        assert_eq!(node.ttl, None);
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let (clock, kv) = test_kv();
        kv.set(vec![KvNode::with_ttl("/p/h1", "h1", 30)])
            .await
            .unwrap();

        assert_eq!(kv.get("/p/h1").await.unwrap().ttl, Some(30));

        clock.advance(30);
        assert!(matches!(kv.get("/p/h1").await, Err(KvError::NotFound)));
    }

    #[tokio::test]
    async fn list_recursively_matches_memory_semantics() {
        let (_, kv) = test_kv();
        kv.set(vec![
            KvNode::leaf("/apps/actual/a,v1/i1", "x"),
            KvNode::leaf("/apps/actual/a,v1/i2", "y"),
            KvNode::leaf("/apps/actual/b,v1/i3", "z"),
        ])
        .await
        .unwrap();

        let root = kv.list_recursively("/apps/actual").await.unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].children.len(), 2);
    }

    #[tokio::test]
    async fn delete_subtree_and_missing_sentinel() {
        let (_, kv) = test_kv();
        kv.set(vec![
            KvNode::leaf("/apps/a,v/i1", "x"),
            KvNode::leaf("/apps/a,v/i2", "y"),
        ])
        .await
        .unwrap();

        kv.delete(&["/apps/a,v".to_string()]).await.unwrap();
        assert!(matches!(
            kv.delete(&["/apps/a,v".to_string()]).await,
            Err(KvError::NotFound)
        ));
    }

    #[tokio::test]
    async fn compare_and_swap_on_disk() {
        let (_, kv) = test_kv();
        kv.set(vec![KvNode::leaf("/fresh", "100")]).await.unwrap();

        kv.compare_and_swap("/fresh", "100", KvNode::with_ttl("/fresh", "100", 30))
            .await
            .unwrap();
        assert_eq!(kv.get("/fresh").await.unwrap().ttl, Some(30));

        assert!(matches!(
            kv.compare_and_swap("/fresh", "999", KvNode::leaf("/fresh", "x"))
                .await,
            Err(KvError::CompareFailed)
        ));
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("kv.redb");
        let clock = Arc::new(ManualClock::new(1000));

        {
            let kv = RedbKv::open(&db_path, clock.clone()).unwrap();
            kv.set(vec![KvNode::leaf("/a", "v")]).await.unwrap();
        }

        let kv = RedbKv::open(&db_path, clock).unwrap();
        assert_eq!(kv.get("/a").await.unwrap().value, "v");
    }
}
