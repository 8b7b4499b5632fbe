//! Shared flat-map semantics for the KV backends.
//!
//! Both backends keep leaves in a flat path → entry map; directories
//! are implicit. The helpers here implement expiry, tree
//! reconstruction, and the occupancy checks both backends share.

use std::collections::BTreeMap;

use crate::KvNode;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub value: String,
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

pub(crate) fn prune_expired(entries: &mut BTreeMap<String, Entry>, now: u64) {
    entries.retain(|_, entry| !entry.is_expired(now));
}

pub(crate) fn leaf_node(key: &str, entry: &Entry, now: u64) -> KvNode {
    KvNode {
        key: key.to_string(),
        value: entry.value.clone(),
        ttl: entry.expires_at.map(|at| at.saturating_sub(now)),
        children: Vec::new(),
    }
}

/// Build the subtree rooted at `prefix`, or `None` when nothing lives
/// there.
pub(crate) fn subtree(
    prefix: &str,
    entries: &BTreeMap<String, Entry>,
    now: u64,
) -> Option<KvNode> {
    if let Some(entry) = entries.get(prefix) {
        return Some(leaf_node(prefix, entry, now));
    }

    let child_prefix = format!("{prefix}/");
    // Keys iterate sorted, so equal first segments are adjacent.
    let mut segments: Vec<&str> = entries
        .keys()
        .filter(|k| k.starts_with(&child_prefix))
        .filter_map(|k| k[child_prefix.len()..].split('/').next())
        .collect();
    segments.dedup();

    if segments.is_empty() {
        return None;
    }

    let children = segments
        .into_iter()
        .filter_map(|segment| subtree(&format!("{child_prefix}{segment}"), entries, now))
        .collect();

    Some(KvNode {
        key: prefix.to_string(),
        value: String::new(),
        ttl: None,
        children,
    })
}

/// True when `key` or anything beneath it exists.
pub(crate) fn occupied(key: &str, entries: &BTreeMap<String, Entry>) -> bool {
    let dir_prefix = format!("{key}/");
    entries.contains_key(key) || entries.keys().any(|k| k.starts_with(&dir_prefix))
}

/// Reject a leaf write that would shadow a directory or hang beneath
/// an existing leaf.
pub(crate) fn check_leaf_placement(key: &str, entries: &BTreeMap<String, Entry>) -> bool {
    let dir_prefix = format!("{key}/");
    if entries.keys().any(|k| k.starts_with(&dir_prefix)) {
        return false;
    }
    let mut ancestor = key;
    while let Some(idx) = ancestor.rfind('/') {
        ancestor = &ancestor[..idx];
        if entries.contains_key(ancestor) {
            return false;
        }
    }
    true
}
