//! Drain Coordinator (spec §4.9): when a file system enters drain,
//! schedules replication of each file it still holds to a different
//! file system in the same group; a successful commit drops the
//! source (spec §4.8 `drop-fs-id`); drain completes once the fs's
//! live set is empty.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::capability::{AccessMode, CapabilityBindings, CapabilityEngine};
use crate::cluster::{ClusterView, DrainSignal, DrainState};
use crate::error::MgmResult;
use crate::fsview::FileSystemView;
use crate::transfer::{QueueKind, TransferJob, TransferQueues};

pub struct DrainCoordinator {
    cluster: Arc<ClusterView>,
    fsview: Arc<FileSystemView>,
    capabilities: Arc<CapabilityEngine>,
    queues: Arc<TransferQueues>,
    manager_identity: String,
    /// (draining fs, file id) pairs with a replication job already
    /// pushed, so a tick never double-schedules the same file.
    in_flight: Mutex<HashSet<(u32, u64)>>,
}

impl DrainCoordinator {
    pub fn new(
        cluster: Arc<ClusterView>,
        fsview: Arc<FileSystemView>,
        capabilities: Arc<CapabilityEngine>,
        queues: Arc<TransferQueues>,
        manager_identity: impl Into<String>,
    ) -> Self {
        Self { cluster, fsview, capabilities, queues, manager_identity: manager_identity.into(), in_flight: Mutex::new(HashSet::new()) }
    }

    pub fn spawn(self: Arc<Self>, tick_period: Duration, cancel: crate::engines::CancelToken) -> tokio::task::JoinHandle<()> {
        crate::engines::spawn_periodic("drain-coordinator", tick_period, cancel, move || {
            let this = self.clone();
            async move { this.tick().await }
        })
    }

    pub async fn tick(&self) -> MgmResult<()> {
        for signal in self.cluster.take_drain_signals() {
            match signal {
                DrainSignal::Start(fs_id) => self.start_drain(fs_id).await,
                DrainSignal::Stop(fs_id) => self.stop_drain(fs_id).await,
            }
        }
        for fs_id in self.draining_fs_ids().await {
            self.schedule_group(fs_id).await;
            self.check_completion(fs_id).await;
        }
        Ok(())
    }

    async fn draining_fs_ids(&self) -> Vec<u32> {
        let mut draining = Vec::new();
        for fs_id in self.cluster.all_file_system_ids().await {
            if let Ok(snapshot) = self.cluster.snapshot(fs_id).await {
                if matches!(snapshot.drain, DrainState::Prepare | DrainState::Wait | DrainState::Draining) {
                    draining.push(fs_id);
                }
            }
        }
        draining
    }

    async fn start_drain(&self, fs_id: u32) {
        let _ = self.cluster.set_drain_state(fs_id, DrainState::Prepare).await;
        tracing::info!(fs_id, "drain started");
    }

    async fn stop_drain(&self, fs_id: u32) {
        let _ = self.cluster.set_drain_state(fs_id, DrainState::None).await;
        self.in_flight.lock().await.retain(|&(f, _)| f != fs_id);
        tracing::info!(fs_id, "drain stopped");
    }

    async fn schedule_group(&self, draining_fs: u32) {
        let _ = self.cluster.set_drain_state(draining_fs, DrainState::Draining).await;
        let Some(group) = self.cluster.group_of(draining_fs).await else { return };
        let peers: Vec<u32> = self.cluster.group_members(&group).await.into_iter().filter(|&fs| fs != draining_fs).collect();
        if peers.is_empty() {
            let _ = self.cluster.set_drain_state(draining_fs, DrainState::Stalling).await;
            return;
        }

        let live = self.fsview.snapshot(draining_fs).live;
        let mut in_flight = self.in_flight.lock().await;
        for (index, file_id) in live.into_iter().enumerate() {
            if !in_flight.insert((draining_fs, file_id)) {
                continue;
            }
            let target_fs = peers[index % peers.len()];
            let write_bindings = CapabilityBindings {
                access: AccessMode::Update,
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
                fs_id: target_fs,
                local_prefix: String::new(),
                replicas: Vec::new(),
            };
            let read_bindings = CapabilityBindings { access: AccessMode::Read, fs_id: draining_fs, ..write_bindings.clone() };
            let (Ok(write_cap), Ok(read_cap)) = (self.capabilities.mint(write_bindings), self.capabilities.mint(read_bindings)) else {
                in_flight.remove(&(draining_fs, file_id));
                continue;
            };
            let job = TransferJob { file_id, source_fs_id: Some(draining_fs), target_fs_id: target_fs, read_capability: Some(read_cap), write_capability: write_cap };
            if self.queues.push(target_fs, QueueKind::Drain, job).is_err() {
                in_flight.remove(&(draining_fs, file_id));
            }
        }
    }

    async fn check_completion(&self, fs_id: u32) {
        if self.fsview.snapshot(fs_id).live.is_empty() {
            let _ = self.cluster.set_drain_state(fs_id, DrainState::Drained).await;
            self.in_flight.lock().await.retain(|&(f, _)| f != fs_id);
            tracing::info!(fs_id, "drain complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KeyStore;
    use crate::namespace::{FileAction, FileEvent};
    use std::time::Duration as StdDuration;

    async fn harness() -> (Arc<ClusterView>, Arc<FileSystemView>, DrainCoordinator) {
        let cluster = Arc::new(ClusterView::new(StdDuration::from_secs(60)));
        cluster.register_space("default").await;
        cluster.register_group("default.0", "default").await;
        cluster.register_file_system(1, "n1:1095", "default.0").await;
        cluster.register_file_system(2, "n2:1095", "default.0").await;
        let fsview = FileSystemView::new();
        fsview.apply(FileEvent { action: FileAction::LocationAdded, file_id: 9, old_location: None, new_location: Some(1) });
        let capabilities = Arc::new(CapabilityEngine::new(KeyStore::new_with_random_key(), StdDuration::from_secs(60)));
        let queues = Arc::new(TransferQueues::new(10));
        let coordinator = DrainCoordinator::new(cluster.clone(), fsview.clone(), capabilities, queues, "mgm1:1094");
        (cluster, fsview, coordinator)
    }

    #[tokio::test]
    async fn start_signal_schedules_replication_to_a_group_peer() {
        let (cluster, _fsview, coordinator) = harness().await;
        cluster.report_errc(1, 7).await.unwrap();
        coordinator.tick().await.unwrap();
        let snapshot = cluster.snapshot(1).await.unwrap();
        assert_eq!(snapshot.drain, DrainState::Draining);
    }

    #[tokio::test]
    async fn drain_completes_once_live_set_is_empty() {
        let (cluster, fsview, coordinator) = harness().await;
        cluster.report_errc(1, 7).await.unwrap();
        coordinator.tick().await.unwrap();
        fsview.apply(FileEvent { action: FileAction::LocationUnlinked, file_id: 9, old_location: Some(1), new_location: None });
        coordinator.tick().await.unwrap();
        let snapshot = cluster.snapshot(1).await.unwrap();
        assert_eq!(snapshot.drain, DrainState::Drained);
    }
}
