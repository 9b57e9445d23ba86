//! Quota Engine (spec §4.3): per-subtree byte and inode accounting,
//! keyed by owning uid/gid, rooted at the nearest ancestor container
//! registered as a quota node.
//!
//! Counters live in memory only; they are derived entirely from
//! container/file attributes already durable in the namespace change
//! logs, so they are rebuilt by replaying the namespace on restart
//! rather than persisted themselves (spec §4.4 "Quota nodes are
//! secondary indexes derived from container attributes").

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{MgmError, MgmResult};
use crate::namespace::{Container, NamespaceStore};

/// Per-(uid, gid) counters attached to a quota node (spec §3 "Quota Node").
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaCounters {
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub file_count: u64,
}

impl QuotaCounters {
    fn add(&mut self, logical: i64, physical: i64, files: i64) {
        self.logical_bytes = apply_delta(self.logical_bytes, logical);
        self.physical_bytes = apply_delta(self.physical_bytes, physical);
        self.file_count = apply_delta(self.file_count, files);
    }
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

struct QuotaNode {
    by_uid: HashMap<u32, QuotaCounters>,
    by_gid: HashMap<u32, QuotaCounters>,
    uid_limits: HashMap<u32, u64>,
    gid_limits: HashMap<u32, u64>,
    uid_file_limits: HashMap<u32, u64>,
    gid_file_limits: HashMap<u32, u64>,
}

impl QuotaNode {
    fn new() -> Self {
        Self {
            by_uid: HashMap::new(),
            by_gid: HashMap::new(),
            uid_limits: HashMap::new(),
            gid_limits: HashMap::new(),
            uid_file_limits: HashMap::new(),
            gid_file_limits: HashMap::new(),
        }
    }
}

/// Maps quota-node container id to its counters, plus the reverse
/// index used to find the nearest ancestor quota node for any
/// container without repeatedly asking the namespace store.
pub struct QuotaEngine {
    namespace: std::sync::Arc<NamespaceStore>,
    nodes: RwLock<HashMap<u64, QuotaNode>>,
}

impl QuotaEngine {
    pub fn new(namespace: std::sync::Arc<NamespaceStore>) -> Self {
        Self { namespace, nodes: RwLock::new(HashMap::new()) }
    }

    /// Registers `container_id` as a quota node (spec §4.3 "registered
    /// under a container by setting a flag").
    pub fn register(&self, container_id: u64) {
        self.nodes.write().unwrap().entry(container_id).or_insert_with(QuotaNode::new);
    }

    pub fn is_registered(&self, container_id: u64) -> bool {
        self.nodes.read().unwrap().contains_key(&container_id)
    }

    pub fn set_uid_limit(&self, node_id: u64, uid: u32, limit_bytes: u64) -> MgmResult<()> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.get_mut(&node_id).ok_or_else(|| MgmError::missing_entry("container is not a quota node"))?;
        node.uid_limits.insert(uid, limit_bytes);
        Ok(())
    }

    pub fn set_gid_limit(&self, node_id: u64, gid: u32, limit_bytes: u64) -> MgmResult<()> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.get_mut(&node_id).ok_or_else(|| MgmError::missing_entry("container is not a quota node"))?;
        node.gid_limits.insert(gid, limit_bytes);
        Ok(())
    }

    /// Per-(node, uid) inode-count limit (spec §3 "file count" counter;
    /// spec §8 scenario 5's 500-file quota).
    pub fn set_uid_file_limit(&self, node_id: u64, uid: u32, limit_files: u64) -> MgmResult<()> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.get_mut(&node_id).ok_or_else(|| MgmError::missing_entry("container is not a quota node"))?;
        node.uid_file_limits.insert(uid, limit_files);
        Ok(())
    }

    pub fn set_gid_file_limit(&self, node_id: u64, gid: u32, limit_files: u64) -> MgmResult<()> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.get_mut(&node_id).ok_or_else(|| MgmError::missing_entry("container is not a quota node"))?;
        node.gid_file_limits.insert(gid, limit_files);
        Ok(())
    }

    /// Walks from `container_id` up to the root, returning the first
    /// ancestor (inclusive) registered as a quota node (spec §3 "the
    /// nearest ancestor container that carries one").
    pub async fn find_node_for(&self, container_id: u64) -> MgmResult<Option<u64>> {
        let mut current = container_id;
        loop {
            if self.is_registered(current) {
                return Ok(Some(current));
            }
            let container: Container = self.namespace.get_container(current).await?;
            match container.parent_id {
                Some(parent_id) => current = parent_id,
                None => return Ok(None),
            }
        }
    }

    /// Applies a signed delta to `node_id`'s uid/gid counters. Called
    /// under the same update as the namespace write that changed the
    /// file (spec §4.3 "under the same lock that commits the file
    /// update" — here, immediately after `NamespaceStore::update_file`
    /// returns, before any other writer can observe the new size).
    pub fn apply_delta(
        &self,
        node_id: u64,
        uid: u32,
        gid: u32,
        logical_delta: i64,
        physical_delta: i64,
        file_count_delta: i64,
    ) {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.entry(node_id).or_insert_with(QuotaNode::new);
        node.by_uid.entry(uid).or_default().add(logical_delta, physical_delta, file_count_delta);
        node.by_gid.entry(gid).or_default().add(logical_delta, physical_delta, file_count_delta);
    }

    pub fn uid_counters(&self, node_id: u64, uid: u32) -> QuotaCounters {
        self.nodes.read().unwrap().get(&node_id).and_then(|n| n.by_uid.get(&uid).copied()).unwrap_or_default()
    }

    pub fn gid_counters(&self, node_id: u64, gid: u32) -> QuotaCounters {
        self.nodes.read().unwrap().get(&node_id).and_then(|n| n.by_gid.get(&gid).copied()).unwrap_or_default()
    }

    /// Advisory placement check (spec §4.5 step 5 "returns `NoQuota` if
    /// any candidate was rejected solely for quota reasons"): true if
    /// writing `additional_physical_bytes` more would push `uid` past
    /// its limit on `node_id`.
    pub fn would_exceed_uid_limit(&self, node_id: u64, uid: u32, additional_physical_bytes: u64) -> bool {
        let nodes = self.nodes.read().unwrap();
        let Some(node) = nodes.get(&node_id) else { return false };
        let Some(&limit) = node.uid_limits.get(&uid) else { return false };
        let used = node.by_uid.get(&uid).map(|c| c.physical_bytes).unwrap_or(0);
        used.saturating_add(additional_physical_bytes) > limit
    }

    pub fn would_exceed_gid_limit(&self, node_id: u64, gid: u32, additional_physical_bytes: u64) -> bool {
        let nodes = self.nodes.read().unwrap();
        let Some(node) = nodes.get(&node_id) else { return false };
        let Some(&limit) = node.gid_limits.get(&gid) else { return false };
        let used = node.by_gid.get(&gid).map(|c| c.physical_bytes).unwrap_or(0);
        used.saturating_add(additional_physical_bytes) > limit
    }

    /// Same advisory check, over inode count rather than bytes (spec §8
    /// scenario 5: a 500-file quota must reject the 501st placement).
    pub fn would_exceed_uid_file_limit(&self, node_id: u64, uid: u32, additional_files: u64) -> bool {
        let nodes = self.nodes.read().unwrap();
        let Some(node) = nodes.get(&node_id) else { return false };
        let Some(&limit) = node.uid_file_limits.get(&uid) else { return false };
        let used = node.by_uid.get(&uid).map(|c| c.file_count).unwrap_or(0);
        used.saturating_add(additional_files) > limit
    }

    pub fn would_exceed_gid_file_limit(&self, node_id: u64, gid: u32, additional_files: u64) -> bool {
        let nodes = self.nodes.read().unwrap();
        let Some(node) = nodes.get(&node_id) else { return false };
        let Some(&limit) = node.gid_file_limits.get(&gid) else { return false };
        let used = node.by_gid.get(&gid).map(|c| c.file_count).unwrap_or(0);
        used.saturating_add(additional_files) > limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{ChecksumAlgo, LayoutId, LayoutType};

    async fn store() -> (tempfile::TempDir, std::sync::Arc<NamespaceStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn finds_nearest_registered_ancestor() {
        let (_dir, ns) = store().await;
        let node_id = ns.create_container("/proj", false, 0, 0).await.unwrap();
        ns.create_container("/proj/sub", false, 0, 0).await.unwrap();
        let leaf_id = ns.resolve_container("/proj/sub").await.unwrap();

        let quota = QuotaEngine::new(ns.clone());
        quota.register(node_id);

        let found = quota.find_node_for(leaf_id).await.unwrap();
        assert_eq!(found, Some(node_id));
    }

    #[tokio::test]
    async fn unregistered_subtree_has_no_quota_node() {
        let (_dir, ns) = store().await;
        ns.create_container("/proj", false, 0, 0).await.unwrap();
        let leaf_id = ns.resolve_container("/proj").await.unwrap();
        let quota = QuotaEngine::new(ns.clone());
        assert_eq!(quota.find_node_for(leaf_id).await.unwrap(), None);
    }

    #[test]
    fn delta_accounting_tracks_physical_bytes_with_stripe_factor() {
        let layout = LayoutId::new(LayoutType::Replica, 2, ChecksumAlgo::None);
        let size = 100u64;
        let physical = size * layout.stripe_factor();

        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ns = rt.block_on(NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log"))).unwrap();
        let quota = QuotaEngine::new(ns);
        quota.register(1);
        quota.apply_delta(1, 10, 20, size as i64, physical as i64, 1);
        let counters = quota.uid_counters(1, 10);
        assert_eq!(counters.logical_bytes, 100);
        assert_eq!(counters.physical_bytes, 200);
        assert_eq!(counters.file_count, 1);
    }

    #[test]
    fn removing_a_file_subtracts_its_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ns = rt.block_on(NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log"))).unwrap();
        let quota = QuotaEngine::new(ns);
        quota.register(1);
        quota.apply_delta(1, 10, 20, 100, 200, 1);
        quota.apply_delta(1, 10, 20, -100, -200, -1);
        let counters = quota.uid_counters(1, 10);
        assert_eq!(counters.logical_bytes, 0);
        assert_eq!(counters.physical_bytes, 0);
        assert_eq!(counters.file_count, 0);
    }

    #[test]
    fn would_exceed_uid_limit_flags_overage() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ns = rt.block_on(NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log"))).unwrap();
        let quota = QuotaEngine::new(ns);
        quota.register(1);
        quota.set_uid_limit(1, 10, 1000).unwrap();
        quota.apply_delta(1, 10, 20, 900, 900, 1);
        assert!(quota.would_exceed_uid_limit(1, 10, 200));
        assert!(!quota.would_exceed_uid_limit(1, 10, 50));
    }

    /// Spec §8 scenario 5: a 500-file quota admits exactly 500 files
    /// and rejects the 501st; removing one frees a slot again.
    #[test]
    fn would_exceed_uid_file_limit_tracks_inode_count() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ns = rt.block_on(NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log"))).unwrap();
        let quota = QuotaEngine::new(ns);
        quota.register(1);
        quota.set_uid_file_limit(1, 10, 500).unwrap();
        for _ in 0..500 {
            assert!(!quota.would_exceed_uid_file_limit(1, 10, 1));
            quota.apply_delta(1, 10, 20, 0, 0, 1);
        }
        assert!(quota.would_exceed_uid_file_limit(1, 10, 1));

        quota.apply_delta(1, 10, 20, 0, 0, -1);
        assert!(!quota.would_exceed_uid_file_limit(1, 10, 1));
    }
}
