//! Commit Protocol (spec §4.8): the callback a storage node makes once
//! it finishes writing, moving a file from "being written" to "visible
//! with a new replica". This is the only path that adds a location.

use std::sync::Arc;

use crate::error::{MgmError, MgmResult};
use crate::fsview::FileSystemView;
use crate::namespace::NamespaceStore;
use crate::quota::QuotaEngine;

/// `mgm.verify.size`/`mgm.commit.size`/`mgm.verify.checksum`/
/// `mgm.commit.checksum`/`mgm.replication` (spec §6 "Commit message
/// fields").
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitFlags {
    pub verify_size: bool,
    pub commit_size: bool,
    pub verify_checksum: bool,
    pub commit_checksum: bool,
    pub replication: bool,
}

/// One commit callback (spec §3 "Transfer Job" payload; spec §6
/// "Commit message fields").
pub struct CommitRequest {
    pub file_id: u64,
    pub fs_id: u32,
    pub size: u64,
    pub checksum: Vec<u8>,
    pub flags: CommitFlags,
    pub drop_fs_id: Option<u32>,
}

pub struct CommitProtocol {
    namespace: Arc<NamespaceStore>,
    fsview: Arc<FileSystemView>,
    quota: Arc<QuotaEngine>,
}

impl CommitProtocol {
    pub fn new(namespace: Arc<NamespaceStore>, fsview: Arc<FileSystemView>, quota: Arc<QuotaEngine>) -> Self {
        Self { namespace, fsview, quota }
    }

    /// Applies one commit (spec §4.8 steps 1-3).
    pub async fn commit(&self, request: CommitRequest) -> MgmResult<()> {
        let mut file = self.namespace.get_file(request.file_id).await.map_err(|e| {
            if e.kind() == crate::error::ErrorKind::MissingEntry {
                MgmError::gone("commit references a removed file")
            } else {
                e
            }
        })?;

        if !file.is_reachable() && file.eligible_for_remove() {
            return Err(MgmError::gone("commit references a removed file"));
        }

        if request.flags.replication {
            if request.flags.verify_size && file.size != request.size {
                return Err(MgmError::bad_size("replication commit size mismatch"));
            }
            if request.flags.verify_checksum && file.checksum != request.checksum {
                return Err(MgmError::bad_checksum("replication commit checksum mismatch"));
            }
        }

        let node_id = self.quota.find_node_for(file.parent_id.unwrap_or(file.id)).await.ok().flatten();
        let old_physical = file.physical_size();

        if !file.locations.contains(&request.fs_id) {
            file.locations.push(request.fs_id);
        }
        file.unlinked_locations.retain(|&fs| fs != request.fs_id);

        if request.flags.commit_size {
            file.size = request.size;
        }
        if request.flags.commit_checksum {
            file.checksum = request.checksum.clone();
        }
        file.mtime = crate::namespace::Timestamp::now();

        if let Some(drop_fs_id) = request.drop_fs_id {
            if file.locations.contains(&drop_fs_id) {
                file.locations.retain(|&fs| fs != drop_fs_id);
                file.unlinked_locations.push(drop_fs_id);
            }
        }

        let new_physical = file.physical_size();
        self.namespace.update_file(file.clone()).await?;

        if let Some(node_id) = node_id {
            // File-count delta is 0 here: a commit only ever adds or
            // moves a replica of a file that was already counted at
            // creation (open/mod.rs), never counts a new inode.
            let delta = new_physical as i64 - old_physical as i64;
            self.quota.apply_delta(node_id, file.owner_uid, file.owner_gid, delta, delta, 0);
        }

        let _ = &self.fsview;
        Ok(())
    }
}
