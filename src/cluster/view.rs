//! Cluster View (spec §4.4): the process-wide registry of file
//! systems, nodes, groups and spaces, plus the error listener that
//! starts or stops a drain job on a `stat.errc` edge.
//!
//! This is the "Cluster View lock" of spec §5's ordering rule: it must
//! never be held while acquiring the namespace lock or the quota map
//! lock.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::cluster::entity::{ClusterEntity, EntityKind, ErrcEdge, FileSystemStatSnapshot};
use crate::cluster::state::ConfigState;
use crate::error::{MgmError, MgmResult};

struct Inner {
    file_systems: HashMap<u32, ClusterEntity>,
    groups: HashMap<String, ClusterEntity>,
    spaces: HashMap<String, ClusterEntity>,
    /// node-queue-name → set of fs-ids.
    node_members: HashMap<String, HashSet<u32>>,
    /// group-name → set of fs-ids.
    group_members: HashMap<String, HashSet<u32>>,
    /// space-name → set of group-names.
    space_members: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            file_systems: HashMap::new(),
            groups: HashMap::new(),
            spaces: HashMap::new(),
            node_members: HashMap::new(),
            group_members: HashMap::new(),
            space_members: HashMap::new(),
        }
    }
}

/// A pending drain-job signal raised by the error listener; the drain
/// coordinator engine (spec §4.9) consumes these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSignal {
    Start(u32),
    Stop(u32),
}

pub struct ClusterView {
    inner: RwLock<Inner>,
    max_heartbeat_age: Duration,
    drain_signals: std::sync::Mutex<Vec<DrainSignal>>,
}

impl ClusterView {
    pub fn new(max_heartbeat_age: Duration) -> Self {
        Self { inner: RwLock::new(Inner::new()), max_heartbeat_age, drain_signals: std::sync::Mutex::new(Vec::new()) }
    }

    pub async fn register_space(&self, name: impl Into<String>) {
        let name = name.into();
        let mut inner = self.inner.write().await;
        inner.spaces.entry(name.clone()).or_insert_with(|| ClusterEntity::new_space(name.clone()));
        inner.space_members.entry(name).or_default();
    }

    pub async fn register_group(&self, name: impl Into<String>, space_name: impl Into<String>) {
        let name = name.into();
        let space_name = space_name.into();
        let mut inner = self.inner.write().await;
        inner.groups.entry(name.clone()).or_insert_with(|| ClusterEntity::new_group(name.clone(), space_name.clone()));
        inner.group_members.entry(name.clone()).or_default();
        inner.space_members.entry(space_name).or_default().insert(name);
    }

    pub async fn register_file_system(&self, fs_id: u32, queue_name: impl Into<String>, group_name: impl Into<String>) {
        let queue_name = queue_name.into();
        let group_name = group_name.into();
        let mut inner = self.inner.write().await;
        inner.file_systems.insert(fs_id, ClusterEntity::new_file_system(fs_id, queue_name.clone(), group_name.clone()));
        inner.node_members.entry(queue_name).or_default().insert(fs_id);
        inner.group_members.entry(group_name).or_default().insert(fs_id);
    }

    /// Applies a "set" against the file system's replicated hash (spec
    /// §4.4: "each *set* mutates the hash (broadcast on)"); the
    /// broadcast is out of scope here (local replica only).
    pub async fn set_config(&self, fs_id: u32, key: &str, value: &str) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        entity.config.set(key.to_string(), value.to_string());
        Ok(())
    }

    /// Reads a key from the file system's replicated hash (the local
    /// replica; spec §4.4 "each *get* reads the local replica").
    pub async fn fs_config(&self, fs_id: u32, key: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.file_systems.get(&fs_id)?.config.get(key).map(str::to_string)
    }

    /// `set` against a group's replicated hash (spec §4.4 config
    /// plumbing applies to every [`EntityKind`], not only file systems).
    pub async fn set_group_config(&self, group_name: &str, key: &str, value: &str) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.groups.get_mut(group_name).ok_or_else(|| MgmError::missing_entry("no such group"))?;
        entity.config.set(key.to_string(), value.to_string());
        Ok(())
    }

    pub async fn group_config(&self, group_name: &str, key: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.groups.get(group_name)?.config.get(key).map(str::to_string)
    }

    pub async fn set_space_config(&self, space_name: &str, key: &str, value: &str) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.spaces.get_mut(space_name).ok_or_else(|| MgmError::missing_entry("no such space"))?;
        entity.config.set(key.to_string(), value.to_string());
        Ok(())
    }

    pub async fn space_config(&self, space_name: &str, key: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.spaces.get(space_name)?.config.get(key).map(str::to_string)
    }

    /// Group name a file system belongs to, used by the scheduler's
    /// group-locality tie-break and the drain coordinator (spec §4.5
    /// step 3, §4.9 "Drain Coordinator").
    pub async fn group_of(&self, fs_id: u32) -> Option<String> {
        let inner = self.inner.read().await;
        inner.file_systems.get(&fs_id)?.parent_name.clone()
    }

    /// Every file-system id known to the cluster view, in no
    /// particular order (spec §4.9 "Deletion Dispatcher ... for each
    /// fs-id").
    pub async fn all_file_system_ids(&self) -> Vec<u32> {
        let inner = self.inner.read().await;
        inner.file_systems.keys().copied().collect()
    }

    pub async fn all_space_names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.spaces.keys().cloned().collect()
    }

    pub async fn set_drain_state(&self, fs_id: u32, state: crate::cluster::state::DrainState) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        entity.drain = state;
        Ok(())
    }

    pub async fn set_config_state(&self, fs_id: u32, state: ConfigState) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        entity.config_state = state;
        Ok(())
    }

    pub async fn set_boot_state(&self, fs_id: u32, state: crate::cluster::state::BootState) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        entity.boot = state;
        Ok(())
    }

    pub async fn set_free_bytes(&self, fs_id: u32, free_bytes: u64, capacity_bytes: u64) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        entity.free_bytes = free_bytes;
        entity.capacity_bytes = capacity_bytes;
        Ok(())
    }

    pub async fn record_heartbeat(&self, fs_id: u32) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        entity.record_heartbeat();
        Ok(())
    }

    /// Records `stat.errc`; starts a drain signal the first time it
    /// goes nonzero, stops it the first time it recovers (spec §4.4
    /// "error listener").
    pub async fn report_errc(&self, fs_id: u32, errc: i32) -> MgmResult<()> {
        let mut inner = self.inner.write().await;
        let entity = inner.file_systems.get_mut(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        match entity.set_errc(errc) {
            ErrcEdge::BecameErroring => self.drain_signals.lock().unwrap().push(DrainSignal::Start(fs_id)),
            ErrcEdge::Recovered => self.drain_signals.lock().unwrap().push(DrainSignal::Stop(fs_id)),
            ErrcEdge::Unchanged => {}
        }
        Ok(())
    }

    /// Drains and returns all pending drain signals; consumed by the
    /// drain coordinator engine on its tick (spec §4.9).
    pub fn take_drain_signals(&self) -> Vec<DrainSignal> {
        std::mem::take(&mut self.drain_signals.lock().unwrap())
    }

    pub async fn snapshot(&self, fs_id: u32) -> MgmResult<FileSystemStatSnapshot> {
        let inner = self.inner.read().await;
        let entity = inner.file_systems.get(&fs_id).ok_or_else(|| MgmError::missing_entry("no such file system"))?;
        Ok(entity.snapshot(self.max_heartbeat_age))
    }

    /// All file-system ids belonging to `group_name`, in insertion
    /// order is not guaranteed; the scheduler imposes its own
    /// rotation order (spec §4.5 step 3).
    pub async fn group_members(&self, group_name: &str) -> Vec<u32> {
        let inner = self.inner.read().await;
        inner.group_members.get(group_name).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub async fn groups_in_space(&self, space_name: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.space_members.get(space_name).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// File-system ids registered under the node whose queue name is
    /// `node_queue_name` (proc `node ls`, spec §6).
    pub async fn node_members(&self, node_queue_name: &str) -> Vec<u32> {
        let inner = self.inner.read().await;
        inner.node_members.get(node_queue_name).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Snapshots every file system in `space_name`, across all its
    /// groups (spec §4.5 "from each group in the space").
    pub async fn snapshot_space(&self, space_name: &str) -> Vec<FileSystemStatSnapshot> {
        let inner = self.inner.read().await;
        let mut snapshots = Vec::new();
        if let Some(groups) = inner.space_members.get(space_name) {
            for group in groups {
                if let Some(members) = inner.group_members.get(group) {
                    for fs_id in members {
                        if let Some(entity) = inner.file_systems.get(fs_id) {
                            snapshots.push(entity.snapshot(self.max_heartbeat_age));
                        }
                    }
                }
            }
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_listener_fires_start_then_stop_once_each() {
        let view = ClusterView::new(Duration::from_secs(30));
        view.register_space("default").await;
        view.register_group("default.0", "default").await;
        view.register_file_system(1, "node1:1095", "default.0").await;

        view.report_errc(1, 5).await.unwrap();
        view.report_errc(1, 9).await.unwrap();
        view.report_errc(1, 0).await.unwrap();

        let signals = view.take_drain_signals();
        assert_eq!(signals, vec![DrainSignal::Start(1), DrainSignal::Stop(1)]);
    }

    #[tokio::test]
    async fn snapshot_space_covers_every_group() {
        let view = ClusterView::new(Duration::from_secs(30));
        view.register_space("default").await;
        view.register_group("default.0", "default").await;
        view.register_group("default.1", "default").await;
        view.register_file_system(1, "n1:1095", "default.0").await;
        view.register_file_system(2, "n2:1095", "default.1").await;

        let snapshots = view.snapshot_space("default").await;
        assert_eq!(snapshots.len(), 2);
    }
}
