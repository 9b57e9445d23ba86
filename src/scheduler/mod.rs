//! Placement/Access Scheduler (spec §4.5): both operations execute
//! under a read lock of the cluster view, consult the quota engine
//! advisorily, and pick deterministic tie-breaks off a per-request
//! random seed so that a retry lands on a different replica.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::cluster::{ClusterView, FileSystemStatSnapshot};
use crate::error::{MgmError, MgmResult};
use crate::quota::QuotaEngine;

/// Inputs to a placement decision (spec §4.5 Placement steps 1-2).
pub struct PlacementRequest<'a> {
    pub space_name: &'a str,
    pub stripe_count: usize,
    pub booking_size_bytes: u64,
    pub headroom_bytes: u64,
    pub uid: u32,
    pub gid: u32,
    pub quota_node_id: Option<u64>,
    /// Per-request seed so retries land on a different replica
    /// (spec §4.5 "Tie-breaks are deterministic given a fixed random
    /// seed per request").
    pub seed: u64,
}

/// Inputs to an access decision (spec §4.5 Access steps 1-3).
pub struct AccessRequest {
    pub locations: Vec<u32>,
    pub pinned_fs_id: Option<u32>,
    pub seed: u64,
}

pub struct Scheduler {
    cluster: std::sync::Arc<ClusterView>,
    quota: std::sync::Arc<QuotaEngine>,
}

fn fs_is_writable(snapshot: &FileSystemStatSnapshot, booking_size: u64, headroom: u64) -> bool {
    use crate::cluster::{ActiveState, BootState, ConfigState};
    snapshot.active == ActiveState::Online
        && snapshot.boot == BootState::Booted
        && snapshot.config_state >= ConfigState::WriteOnly
        && snapshot.free_bytes >= booking_size.saturating_add(headroom)
}

fn fs_is_readable(snapshot: &FileSystemStatSnapshot) -> bool {
    use crate::cluster::ActiveState;
    snapshot.active == ActiveState::Online && snapshot.boot == crate::cluster::BootState::Booted && !snapshot.config_state.read_forbidden()
}

impl Scheduler {
    pub fn new(cluster: std::sync::Arc<ClusterView>, quota: std::sync::Arc<QuotaEngine>) -> Self {
        Self { cluster, quota }
    }

    /// Placement for a new file, or a truncate-from-zero of a
    /// replicated file (spec §4.5 Placement).
    pub async fn place(&self, request: PlacementRequest<'_>) -> MgmResult<Vec<u32>> {
        let mut rng = StdRng::seed_from_u64(request.seed);
        let groups = self.cluster.groups_in_space(request.space_name).await;
        if groups.is_empty() {
            return Err(MgmError::no_space("space has no groups"));
        }
        let mut rotated_groups = groups;
        rotated_groups.shuffle(&mut rng);

        let mut selected = Vec::new();
        let mut quota_rejected = false;
        self.select_from_groups(&rotated_groups, &request, &mut selected, &mut quota_rejected).await?;

        if selected.len() < request.stripe_count {
            // Relaxed pass: same group list, but candidates already
            // selected are excluded and every remaining fs in the
            // space is eligible regardless of group (spec §4.5 step 4
            // "cross-group selection within the space").
            let all = self.cluster.snapshot_space(request.space_name).await;
            for snapshot in all {
                if selected.len() >= request.stripe_count {
                    break;
                }
                if selected.contains(&snapshot.fs_id) {
                    continue;
                }
                if !fs_is_writable(&snapshot, request.booking_size_bytes, request.headroom_bytes) {
                    continue;
                }
                if self.quota_would_reject(&request, &snapshot) {
                    quota_rejected = true;
                    continue;
                }
                selected.push(snapshot.fs_id);
            }
        }

        if selected.len() < request.stripe_count {
            if quota_rejected && selected.is_empty() {
                return Err(MgmError::no_space("all candidates rejected by quota"));
            }
            return Err(MgmError::no_space("not enough eligible file systems for placement"));
        }
        Ok(selected)
    }

    async fn select_from_groups(
        &self,
        groups: &[String],
        request: &PlacementRequest<'_>,
        selected: &mut Vec<u32>,
        quota_rejected: &mut bool,
    ) -> MgmResult<()> {
        for group in groups {
            if selected.len() >= request.stripe_count {
                break;
            }
            let members = self.cluster.group_members(group).await;
            let mut picked_from_group = None;
            for fs_id in members {
                if selected.contains(&fs_id) {
                    continue;
                }
                let Ok(snapshot) = self.cluster.snapshot(fs_id).await else { continue };
                if !fs_is_writable(&snapshot, request.booking_size_bytes, request.headroom_bytes) {
                    continue;
                }
                if self.quota_would_reject(request, &snapshot) {
                    *quota_rejected = true;
                    continue;
                }
                picked_from_group = Some(fs_id);
                break;
            }
            if let Some(fs_id) = picked_from_group {
                selected.push(fs_id);
            }
        }
        Ok(())
    }

    fn quota_would_reject(&self, request: &PlacementRequest<'_>, snapshot: &FileSystemStatSnapshot) -> bool {
        let Some(node_id) = request.quota_node_id else { return false };
        let physical = request.booking_size_bytes;
        let _ = snapshot;
        self.quota.would_exceed_uid_limit(node_id, request.uid, physical)
            || self.quota.would_exceed_gid_limit(node_id, request.gid, physical)
            || self.quota.would_exceed_uid_file_limit(node_id, request.uid, 1)
            || self.quota.would_exceed_gid_file_limit(node_id, request.gid, 1)
    }

    /// Access (open an existing file) (spec §4.5 Access).
    pub async fn access(&self, request: AccessRequest) -> MgmResult<u32> {
        if request.locations.is_empty() {
            return Err(MgmError::no_entry("file has no locations"));
        }
        let mut surviving = Vec::new();
        for &fs_id in &request.locations {
            if let Ok(snapshot) = self.cluster.snapshot(fs_id).await {
                if fs_is_readable(&snapshot) {
                    surviving.push(fs_id);
                }
            }
        }
        if surviving.is_empty() {
            return Err(MgmError::no_network("no surviving replica for this file"));
        }
        if let Some(pinned) = request.pinned_fs_id {
            if surviving.contains(&pinned) {
                return Ok(pinned);
            }
        }
        let mut rng = StdRng::seed_from_u64(request.seed);
        Ok(*surviving.choose(&mut rng).expect("surviving is non-empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn setup() -> (std::sync::Arc<ClusterView>, std::sync::Arc<QuotaEngine>) {
        let cluster = std::sync::Arc::new(ClusterView::new(Duration::from_secs(60)));
        cluster.register_space("default").await;
        cluster.register_group("default.0", "default").await;
        cluster.register_group("default.1", "default").await;
        cluster.register_file_system(1, "n1:1095", "default.0").await;
        cluster.register_file_system(2, "n2:1095", "default.1").await;
        for fs_id in [1, 2] {
            cluster.set_config_state(fs_id, crate::cluster::ConfigState::ReadWrite).await.unwrap();
            cluster.set_free_bytes(fs_id, 10_000_000, 20_000_000).await.unwrap();
            cluster.record_heartbeat(fs_id).await.unwrap();
            cluster.report_errc(fs_id, 0).await.unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let ns = crate::namespace::NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log")).await.unwrap();
        std::mem::forget(dir);
        let quota = std::sync::Arc::new(QuotaEngine::new(ns));
        (cluster, quota)
    }

    async fn boot_all(cluster: &ClusterView) {
        for fs_id in [1u32, 2u32] {
            cluster.set_boot_state(fs_id, crate::cluster::BootState::Booted).await.unwrap();
        }
    }

    #[tokio::test]
    async fn placement_picks_one_fs_per_group() {
        let (cluster, quota) = setup().await;
        boot_all(&cluster).await;
        let scheduler = Scheduler::new(cluster, quota);
        let request = PlacementRequest {
            space_name: "default",
            stripe_count: 2,
            booking_size_bytes: 1000,
            headroom_bytes: 0,
            uid: 1,
            gid: 1,
            quota_node_id: None,
            seed: 42,
        };
        let selected = scheduler.place(request).await.unwrap();
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&1));
        assert!(selected.contains(&2));
    }

    #[tokio::test]
    async fn placement_rejects_when_file_count_quota_is_spent() {
        let (cluster, quota) = setup().await;
        boot_all(&cluster).await;
        quota.register(1);
        quota.set_uid_file_limit(1, 1, 0).unwrap();
        let scheduler = Scheduler::new(cluster, quota);
        let request = PlacementRequest {
            space_name: "default",
            stripe_count: 2,
            booking_size_bytes: 1000,
            headroom_bytes: 0,
            uid: 1,
            gid: 1,
            quota_node_id: Some(1),
            seed: 42,
        };
        let err = scheduler.place(request).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoSpace);
    }

    #[tokio::test]
    async fn placement_returns_nospace_when_nothing_booted() {
        let (cluster, quota) = setup().await;
        let scheduler = Scheduler::new(cluster, quota);
        let request = PlacementRequest {
            space_name: "default",
            stripe_count: 2,
            booking_size_bytes: 1000,
            headroom_bytes: 0,
            uid: 1,
            gid: 1,
            quota_node_id: None,
            seed: 42,
        };
        // Fixture file systems never reach BootState::Booted, so
        // placement must fail with NoSpace regardless of capacity.
        let result = scheduler.place(request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn access_rejects_when_all_locations_missing_from_view() {
        let (cluster, quota) = setup().await;
        let scheduler = Scheduler::new(cluster, quota);
        let request = AccessRequest { locations: vec![999], pinned_fs_id: None, seed: 1 };
        assert!(scheduler.access(request).await.is_err());
    }

    #[tokio::test]
    async fn access_with_no_locations_is_noentry() {
        let (cluster, quota) = setup().await;
        let scheduler = Scheduler::new(cluster, quota);
        let request = AccessRequest { locations: vec![], pinned_fs_id: None, seed: 1 };
        let err = scheduler.access(request).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoEntry);
    }

    #[tokio::test]
    async fn access_prefers_pinned_fs_id_when_it_survives() {
        let (cluster, quota) = setup().await;
        boot_all(&cluster).await;
        let scheduler = Scheduler::new(cluster, quota);
        let request = AccessRequest { locations: vec![1, 2], pinned_fs_id: Some(2), seed: 7 };
        let chosen = scheduler.access(request).await.unwrap();
        assert_eq!(chosen, 2);
    }

    #[tokio::test]
    async fn access_falls_back_to_drain_filtering() {
        let (cluster, quota) = setup().await;
        boot_all(&cluster).await;
        cluster.set_config_state(1, crate::cluster::ConfigState::Drain).await.unwrap();
        let scheduler = Scheduler::new(cluster, quota);
        let request = AccessRequest { locations: vec![1, 2], pinned_fs_id: None, seed: 7 };
        let chosen = scheduler.access(request).await.unwrap();
        assert_eq!(chosen, 2);
    }
}
