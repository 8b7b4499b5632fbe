//! pulsegrid-kv — abstract contract over a TTL-capable hierarchical
//! key/value store.
//!
//! Keys are slash-separated paths under a configured root. A key with
//! entries beneath it is a directory; listing a prefix returns the
//! subtree as a [`KvNode`] tree. Two backends ship here: an in-memory
//! store for tests and single-process runs, and an embedded
//! redb-backed store for local persistence. The replicated fleet store
//! lives outside this workspace and implements the same trait.

pub mod embedded;
pub mod error;
pub mod memory;
mod tree;

pub use embedded::RedbKv;
pub use error::{KvError, KvResult};
pub use memory::MemoryKv;

use async_trait::async_trait;

/// One node in the hierarchical store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvNode {
    pub key: String,
    pub value: String,
    /// Remaining time to live in seconds. `None` means no expiry.
    pub ttl: Option<u64>,
    /// Populated for directory nodes returned by recursive listing.
    pub children: Vec<KvNode>,
}

impl KvNode {
    /// A leaf node with no TTL.
    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: None,
            children: Vec::new(),
        }
    }

    /// A leaf node that expires after `ttl` seconds.
    pub fn with_ttl(key: impl Into<String>, value: impl Into<String>, ttl: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
            children: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Contract over the TTL-capable hierarchical KV store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write a batch of leaf nodes, creating intermediate directories
    /// implicitly. Overwrites existing leaves.
    async fn set(&self, nodes: Vec<KvNode>) -> KvResult<()>;

    /// Delete each key, recursively when it names a directory. All
    /// present keys are removed even when some are missing; if any key
    /// was absent the call reports [`KvError::NotFound`] after the
    /// sweep so callers can distinguish the partial case.
    async fn delete(&self, keys: &[String]) -> KvResult<()>;

    /// Fetch a single leaf. Directories yield
    /// [`KvError::NodeIsDirectory`].
    async fn get(&self, key: &str) -> KvResult<KvNode>;

    /// Return the subtree rooted at `prefix` with children populated
    /// recursively, or [`KvError::NotFound`] when nothing lives there.
    async fn list_recursively(&self, prefix: &str) -> KvResult<KvNode>;

    /// Replace `key` with `node` only if its current value equals
    /// `expected`. Mismatch yields [`KvError::CompareFailed`]; a
    /// missing key yields [`KvError::NotFound`].
    async fn compare_and_swap(&self, key: &str, expected: &str, node: KvNode) -> KvResult<()>;

    /// Delete `key` only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<()>;
}
