//! Deletion Dispatcher (spec §4.9): a single periodic thread that, for
//! each file-system id, walks the File-System View's *unlinked-files*
//! set, batches up to 1024 ids, mints a delete capability per id, and
//! pushes a transfer job onto the node's queue.

use std::sync::Arc;
use std::time::Duration;

use crate::capability::{AccessMode, CapabilityBindings, CapabilityEngine};
use crate::cluster::ClusterView;
use crate::error::MgmResult;
use crate::fsview::FileSystemView;
use crate::transfer::{QueueKind, TransferJob, TransferQueues};

/// Ids per fs-id per tick (spec §4.9 "batches up to 1024 ids").
pub const DELETE_BATCH: usize = 1024;

pub struct DeletionDispatcher {
    cluster: Arc<ClusterView>,
    fsview: Arc<FileSystemView>,
    capabilities: Arc<CapabilityEngine>,
    queues: Arc<TransferQueues>,
    manager_identity: String,
}

impl DeletionDispatcher {
    pub fn new(
        cluster: Arc<ClusterView>,
        fsview: Arc<FileSystemView>,
        capabilities: Arc<CapabilityEngine>,
        queues: Arc<TransferQueues>,
        manager_identity: impl Into<String>,
    ) -> Self {
        Self { cluster, fsview, capabilities, queues, manager_identity: manager_identity.into() }
    }

    pub fn spawn(self: Arc<Self>, tick_period: Duration, cancel: crate::engines::CancelToken) -> tokio::task::JoinHandle<()> {
        crate::engines::spawn_periodic("deletion-dispatcher", tick_period, cancel, move || {
            let this = self.clone();
            async move { this.tick().await }
        })
    }

    /// One dispatch pass over every known file system.
    pub async fn tick(&self) -> MgmResult<()> {
        for fs_id in self.cluster.all_file_system_ids().await {
            self.dispatch_for(fs_id).await;
        }
        Ok(())
    }

    async fn dispatch_for(&self, fs_id: u32) {
        let pending = self.fsview.unlinked_files(fs_id);
        let local_prefix = self.cluster.fs_config(fs_id, "local.prefix").await.unwrap_or_else(|| "/data/".to_string());

        for file_id in pending.into_iter().take(DELETE_BATCH) {
            let bindings = CapabilityBindings {
                access: AccessMode::Delete,
                layout_id: 0,
                container_id: 0,
                ruid: 0,
                rgid: 0,
                uid: 0,
                gid: 0,
                path: String::new(),
                manager: self.manager_identity.clone(),
                file_id,
                booking_size: 0,
                fs_id,
                local_prefix: local_prefix.clone(),
                replicas: Vec::new(),
            };
            let capability = match self.capabilities.mint(bindings) {
                Ok(cap) => cap,
                Err(err) => {
                    tracing::warn!(fs_id, file_id, error = %err, "failed to mint delete capability");
                    continue;
                }
            };
            let job = TransferJob { file_id, source_fs_id: Some(fs_id), target_fs_id: fs_id, read_capability: None, write_capability: capability };
            if let Err(_job) = self.queues.push(fs_id, QueueKind::Extern, job) {
                tracing::debug!(fs_id, "delete queue full, deferring to next tick");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KeyStore;
    use crate::namespace::{FileAction, FileEvent};
    use std::time::Duration as StdDuration;

    async fn harness() -> (Arc<ClusterView>, Arc<FileSystemView>, Arc<CapabilityEngine>, Arc<TransferQueues>) {
        let cluster = Arc::new(ClusterView::new(StdDuration::from_secs(60)));
        cluster.register_space("default").await;
        cluster.register_group("default.0", "default").await;
        cluster.register_file_system(1, "n1:1095", "default.0").await;
        let fsview = FileSystemView::new();
        fsview.apply(FileEvent { action: FileAction::LocationUnlinked, file_id: 42, old_location: Some(1), new_location: None });
        let capabilities = Arc::new(CapabilityEngine::new(KeyStore::new_with_random_key(), StdDuration::from_secs(60)));
        let queues = Arc::new(TransferQueues::new(10));
        (cluster, fsview, capabilities, queues)
    }

    #[tokio::test]
    async fn tick_pushes_one_delete_job_per_unlinked_file() {
        let (cluster, fsview, capabilities, queues) = harness().await;
        let dispatcher = DeletionDispatcher::new(cluster, fsview, capabilities, queues.clone(), "mgm1:1094");
        dispatcher.tick().await.unwrap();
        assert_eq!(queues.len(1, QueueKind::Extern), 1);
        let job = queues.pop(1, QueueKind::Extern).unwrap();
        assert_eq!(job.file_id, 42);
    }
}
