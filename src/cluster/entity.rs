//! Cluster entities (spec §4.4, Design Notes: FileSystem/Node/Group/Space
//! "share infrastructure... flatten to a single `ClusterEntity` record
//! tagged by kind plus composition of a `ConfigStore` and a
//! `SnapshotBuilder`. The original inheritance encodes shared
//! config-hash plumbing, not polymorphism.")

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::cluster::state::{ActiveState, BootState, ConfigState, DrainState};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Space,
    Group,
    Node,
    FileSystem,
}

/// The replicated key-value hash backing every entity (spec §4.4:
/// "each file system is backed by a replicated key-value hash carried
/// over the bus; each *set* mutates the hash (broadcast on) and each
/// *get* reads the local replica"). The broadcast itself is out of
/// scope (spec §1 Non-goals); `set` only records the local replica and
/// reports whether the value actually changed, which is what the
/// error listener needs to detect an `errc` 0→nonzero edge.
#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    values: HashMap<String, String>,
}

impl ConfigStore {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns `true` if this call changed the stored value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        match self.values.insert(key.into(), value.clone()) {
            Some(previous) => previous != value,
            None => true,
        }
    }
}

/// One cluster entity: a space, group, node, or file system, tagged by
/// kind rather than modeled through inheritance.
#[derive(Debug, Clone)]
pub struct ClusterEntity {
    pub kind: EntityKind,
    /// File-system id; meaningful only for `Kind::FileSystem` (0 otherwise).
    pub fs_id: u32,
    /// Queue name for nodes/file-systems, name for group/space.
    pub name: String,
    /// Owning group name (Node, FileSystem) or owning space name (Group).
    pub parent_name: Option<String>,
    pub boot: BootState,
    pub config_state: ConfigState,
    pub drain: DrainState,
    pub free_bytes: u64,
    pub capacity_bytes: u64,
    pub booking_size: u64,
    pub headroom_bytes: u64,
    /// `stat.errc` of spec §4.4's error listener.
    pub stat_errc: i32,
    pub last_heartbeat: Instant,
    pub config: ConfigStore,
}

impl ClusterEntity {
    pub fn new_file_system(fs_id: u32, queue_name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::FileSystem,
            fs_id,
            name: queue_name.into(),
            parent_name: Some(group_name.into()),
            boot: BootState::default(),
            config_state: ConfigState::default(),
            drain: DrainState::default(),
            free_bytes: 0,
            capacity_bytes: 0,
            booking_size: 0,
            headroom_bytes: 0,
            stat_errc: 0,
            last_heartbeat: Instant::now(),
            config: ConfigStore::default(),
        }
    }

    pub fn new_group(name: impl Into<String>, space_name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Group,
            fs_id: 0,
            name: name.into(),
            parent_name: Some(space_name.into()),
            boot: BootState::default(),
            config_state: ConfigState::default(),
            drain: DrainState::default(),
            free_bytes: 0,
            capacity_bytes: 0,
            booking_size: 0,
            headroom_bytes: 0,
            stat_errc: 0,
            last_heartbeat: Instant::now(),
            config: ConfigStore::default(),
        }
    }

    pub fn new_space(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Space,
            fs_id: 0,
            name: name.into(),
            parent_name: None,
            boot: BootState::default(),
            config_state: ConfigState::default(),
            drain: DrainState::default(),
            free_bytes: 0,
            capacity_bytes: 0,
            booking_size: 0,
            headroom_bytes: 0,
            stat_errc: 0,
            last_heartbeat: Instant::now(),
            config: ConfigStore::default(),
        }
    }

    fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.elapsed()
    }

    /// Active is recomputed on every snapshot request, never stored
    /// (spec §4.4).
    pub fn active_state(&self, max_heartbeat_age: Duration) -> ActiveState {
        ActiveState::from_heartbeat_age(self.heartbeat_age(), max_heartbeat_age)
    }

    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    /// Records `stat.errc`, returning `true` the moment it transitions
    /// across zero in either direction (spec §4.4 "An error listener
    /// subscribes to hash modifications and starts or stops a drain
    /// job the first time `stat.errc` transitions across 0").
    pub fn set_errc(&mut self, errc: i32) -> ErrcEdge {
        let previous = self.stat_errc;
        self.stat_errc = errc;
        match (previous == 0, errc == 0) {
            (true, false) => ErrcEdge::BecameErroring,
            (false, true) => ErrcEdge::Recovered,
            _ => ErrcEdge::Unchanged,
        }
    }

    /// Snapshot of scalar fields only (spec §4.4 "Snapshotting copies
    /// all scalar fields into a plain struct so consumers... can read
    /// without holding cluster locks").
    pub fn snapshot(&self, max_heartbeat_age: Duration) -> FileSystemStatSnapshot {
        FileSystemStatSnapshot {
            fs_id: self.fs_id,
            queue_name: self.name.clone(),
            group_name: self.parent_name.clone().unwrap_or_default(),
            boot: self.boot,
            config_state: self.config_state,
            drain: self.drain,
            active: self.active_state(max_heartbeat_age),
            free_bytes: self.free_bytes,
            capacity_bytes: self.capacity_bytes,
            booking_size: self.booking_size,
            headroom_bytes: self.headroom_bytes,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrcEdge {
    BecameErroring,
    Recovered,
    Unchanged,
}

/// By-value copy of one file-system's telemetry and config fields
/// (GLOSSARY "Snapshot"), consumed by the scheduler without holding
/// any cluster lock.
#[derive(Debug, Clone)]
pub struct FileSystemStatSnapshot {
    pub fs_id: u32,
    pub queue_name: String,
    pub group_name: String,
    pub boot: BootState,
    pub config_state: ConfigState,
    pub drain: DrainState,
    pub active: ActiveState,
    pub free_bytes: u64,
    pub capacity_bytes: u64,
    pub booking_size: u64,
    pub headroom_bytes: u64,
}

impl FileSystemStatSnapshot {
    /// Splits `queue_name` (`"host:port"`, spec §3 File System "host,
    /// port") into its two halves; used by the redirecting open
    /// front-end to build `mgm.url<i>` entries (spec §4.6 step 11).
    pub fn host(&self) -> &str {
        self.queue_name.rsplit_once(':').map(|(host, _)| host).unwrap_or(&self.queue_name)
    }

    pub fn port(&self) -> u16 {
        self.queue_name.rsplit_once(':').and_then(|(_, port)| port.parse().ok()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errc_edge_fires_once_on_transition() {
        let mut entity = ClusterEntity::new_file_system(1, "q", "g");
        assert_eq!(entity.set_errc(5), ErrcEdge::BecameErroring);
        assert_eq!(entity.set_errc(7), ErrcEdge::Unchanged);
        assert_eq!(entity.set_errc(0), ErrcEdge::Recovered);
    }

    #[test]
    fn config_store_reports_real_changes_only() {
        let mut config = ConfigStore::default();
        assert!(config.set("stat.errc", "0"));
        assert!(!config.set("stat.errc", "0"));
        assert!(config.set("stat.errc", "1"));
    }

    #[test]
    fn snapshot_splits_queue_name_into_host_and_port() {
        let entity = ClusterEntity::new_file_system(3, "fst1:1095", "default.0");
        let snapshot = entity.snapshot(Duration::from_secs(60));
        assert_eq!(snapshot.host(), "fst1");
        assert_eq!(snapshot.port(), 1095);
    }
}
