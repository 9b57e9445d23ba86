//! Container (directory) entity (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Wall-clock time as stored in change-log records: POSIX seconds plus
/// nanosecond remainder, matching the granularity the commit protocol
/// needs (`mgm.mtime`, `mgm.mtime_ns` in spec §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self { seconds: now.as_secs() as i64, nanos: now.subsec_nanos() }
    }
}

/// A directory in the namespace tree (spec §3 "Container").
///
/// Exactly one parent; the root container (id [`crate::ids::ROOT_CONTAINER_ID`])
/// has no parent. Child name uniqueness within a container is enforced
/// by the owning [`crate::namespace::store::NamespaceStore`], not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: u64,
    pub name: String,
    pub parent_id: Option<u64>,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub mode: u32,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub xattrs: HashMap<String, String>,
    /// Ordered sequence of child container names.
    pub child_containers: Vec<String>,
    /// Ordered sequence of child file names.
    pub child_files: Vec<String>,
    /// Set by [`crate::quota::QuotaEngine::register`]; once true the
    /// subtree rooted here is accounted separately (spec §4.3).
    pub quota_node: bool,
}

impl Container {
    pub fn new_root() -> Self {
        Self {
            id: crate::ids::ROOT_CONTAINER_ID,
            name: String::new(),
            parent_id: None,
            owner_uid: 0,
            owner_gid: 0,
            mode: 0o755,
            ctime: Timestamp::now(),
            mtime: Timestamp::now(),
            xattrs: HashMap::new(),
            child_containers: Vec::new(),
            child_files: Vec::new(),
            quota_node: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.child_containers.is_empty() && self.child_files.is_empty()
    }

    /// Write-and-execute permission check for `uid`/`gid` against this
    /// container's POSIX mode (spec §4.1: "PermissionDenied if the
    /// parent denies write+execute").
    pub fn allows_write_execute(&self, uid: u32, gid: u32) -> bool {
        if uid == 0 {
            return true;
        }
        const W: u32 = 0o2;
        const X: u32 = 0o1;
        let need = W | X;
        if uid == self.owner_uid {
            return (self.mode >> 6) & need == need;
        }
        if gid == self.owner_gid {
            return (self.mode >> 3) & need == need;
        }
        self.mode & need == need
    }

    /// Read-and-execute permission check, used by the redirecting open
    /// front-end to look up a parent container before it trusts its
    /// extended attributes or child list (spec §4.6 step 6).
    pub fn allows_read_execute(&self, uid: u32, gid: u32) -> bool {
        if uid == 0 {
            return true;
        }
        const R: u32 = 0o4;
        const X: u32 = 0o1;
        let need = R | X;
        if uid == self.owner_uid {
            return (self.mode >> 6) & need == need;
        }
        if gid == self.owner_gid {
            return (self.mode >> 3) & need == need;
        }
        self.mode & need == need
    }
}
