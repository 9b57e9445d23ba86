//! Balancer (spec §4.9): one thread per space that, on a deviation of
//! `stat.statfs.filled` above a configured threshold, writes a nominal
//! fill target to each file system in the affected groups. Setting or
//! clearing that target is how an FST decides to pull balancing work
//! (§4.9); this engine never moves bytes itself.
//!
//! Grounded on `mgm/Balancer.cc`: per group, compute average and max
//! deviation of fill fraction; skip (and zero the target on) any group
//! with a drain job running, since drain and balance must never
//! interfere with each other's scheduling.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::ClusterView;
use crate::error::MgmResult;

const NOMINAL_FILLED_KEY: &str = "stat.nominal.filled";

pub struct Balancer {
    cluster: Arc<ClusterView>,
    space_name: String,
    default_threshold: f64,
}

impl Balancer {
    pub fn new(cluster: Arc<ClusterView>, space_name: impl Into<String>, default_threshold: f64) -> Self {
        Self { cluster, space_name: space_name.into(), default_threshold }
    }

    pub fn spawn(self: Arc<Self>, tick_period: Duration, cancel: crate::engines::CancelToken) -> tokio::task::JoinHandle<()> {
        crate::engines::spawn_periodic("balancer", tick_period, cancel, move || {
            let this = self.clone();
            async move { this.tick().await }
        })
    }

    pub async fn tick(&self) -> MgmResult<()> {
        let enabled = self.cluster.space_config(&self.space_name, "balancer").await.as_deref() == Some("on");
        let threshold = self
            .cluster
            .space_config(&self.space_name, "balancer.threshold")
            .await
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(self.default_threshold);

        for group in self.cluster.groups_in_space(&self.space_name).await {
            if !enabled {
                self.idle_group(&group).await;
                continue;
            }
            self.balance_group(&group, threshold).await;
        }
        Ok(())
    }

    async fn balance_group(&self, group: &str, threshold: f64) {
        let members = self.cluster.group_members(group).await;
        let mut fills = Vec::with_capacity(members.len());
        let mut has_drain_job = false;
        for &fs_id in &members {
            let Ok(snapshot) = self.cluster.snapshot(fs_id).await else { continue };
            if snapshot.drain != crate::cluster::DrainState::None {
                has_drain_job = true;
            }
            if snapshot.capacity_bytes > 0 {
                let used = snapshot.capacity_bytes.saturating_sub(snapshot.free_bytes) as f64;
                fills.push((fs_id, used / snapshot.capacity_bytes as f64));
            }
        }
        if fills.is_empty() {
            return;
        }
        let avg = fills.iter().map(|(_, f)| f).sum::<f64>() / fills.len() as f64;
        let max_dev = fills.iter().map(|(_, f)| (f - avg).abs()).fold(0.0_f64, f64::max);

        if max_dev > threshold {
            for &(fs_id, _) in &fills {
                let target = if has_drain_job { 0.0 } else { avg };
                self.set_nominal_filled(fs_id, target).await;
            }
        } else {
            self.idle_group(group).await;
        }
    }

    async fn idle_group(&self, group: &str) {
        for fs_id in self.cluster.group_members(group).await {
            self.set_nominal_filled(fs_id, 0.0).await;
        }
    }

    async fn set_nominal_filled(&self, fs_id: u32, value: f64) {
        let current = self.cluster.fs_config(fs_id, NOMINAL_FILLED_KEY).await.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        if (current - value).abs() > 0.005 {
            let _ = self.cluster.set_config(fs_id, NOMINAL_FILLED_KEY, &format!("{value:.4}")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    async fn setup() -> Arc<ClusterView> {
        let cluster = Arc::new(ClusterView::new(StdDuration::from_secs(60)));
        cluster.register_space("default").await;
        cluster.register_group("default.0", "default").await;
        cluster.register_file_system(1, "n1:1095", "default.0").await;
        cluster.register_file_system(2, "n2:1095", "default.0").await;
        cluster.set_free_bytes(1, 1_000, 10_000).await.unwrap();
        cluster.set_free_bytes(2, 9_000, 10_000).await.unwrap();
        cluster
    }

    #[tokio::test]
    async fn deviation_above_threshold_sets_nominal_target_to_average() {
        let cluster = setup().await;
        cluster.set_space_config("default", "balancer", "on").await.unwrap();
        cluster.set_space_config("default", "balancer.threshold", "0.1").await.unwrap();
        let balancer = Balancer::new(cluster.clone(), "default", 0.2);
        balancer.tick().await.unwrap();
        let target1 = cluster.fs_config(1, NOMINAL_FILLED_KEY).await.unwrap();
        assert_eq!(target1, format!("{:.4}", 0.5));
    }

    #[tokio::test]
    async fn balancer_off_idles_the_group() {
        let cluster = setup().await;
        cluster.set_space_config("default", "balancer", "off").await.unwrap();
        let balancer = Balancer::new(cluster.clone(), "default", 0.01);
        balancer.tick().await.unwrap();
        assert_eq!(cluster.fs_config(1, NOMINAL_FILLED_KEY).await.unwrap(), "0.0000");
    }

    #[tokio::test]
    async fn drain_job_in_group_zeroes_the_target_instead_of_balancing() {
        let cluster = setup().await;
        cluster.set_space_config("default", "balancer", "on").await.unwrap();
        cluster.set_space_config("default", "balancer.threshold", "0.1").await.unwrap();
        cluster.set_drain_state(1, crate::cluster::DrainState::Draining).await.unwrap();
        let balancer = Balancer::new(cluster.clone(), "default", 0.2);
        balancer.tick().await.unwrap();
        assert_eq!(cluster.fs_config(1, NOMINAL_FILLED_KEY).await.unwrap(), "0.0000");
        assert_eq!(cluster.fs_config(2, NOMINAL_FILLED_KEY).await.unwrap(), "0.0000");
    }
}
