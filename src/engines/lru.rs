//! LRU policy engine (spec §4.9): walks directories carrying a policy
//! extended attribute and applies age-based transitions to the files
//! underneath them — delete, convert layout, or move to another
//! directory.
//!
//! Grounded on `mgm/LRU.hh`: a single periodic worker with a
//! configurable sleep interval between scans (`mMs`) and a namespace-
//! wide attribute prefix (`gLRUPolicyPrefix`) marking which
//! directories carry a policy.

use std::sync::Arc;
use std::time::Duration;

use crate::error::MgmResult;
use crate::namespace::file::LayoutId;
use crate::namespace::store::ChildRef;
use crate::namespace::{Container, NamespaceStore};

/// Extended-attribute key prefix marking a directory as LRU-managed.
pub const POLICY_PREFIX: &str = "sys.lru.";

#[derive(Debug, Default, Clone, Copy)]
struct Policy {
    /// `sys.lru.expire.match`: age in seconds after which a file is unlinked.
    expire_after: Option<i64>,
    /// `sys.lru.convert.match`: `<age-seconds>:<layout-id>`.
    convert: Option<(i64, u32)>,
}

struct MovePolicy {
    age_after: i64,
    destination: String,
}

impl Policy {
    fn parse(container: &Container) -> (Self, Option<MovePolicy>) {
        let mut policy = Policy::default();
        let mut mv = None;
        if let Some(value) = container.xattrs.get("sys.lru.expire.match") {
            policy.expire_after = value.parse::<i64>().ok();
        }
        if let Some(value) = container.xattrs.get("sys.lru.convert.match") {
            if let Some((age, layout)) = value.split_once(':') {
                if let (Ok(age), Ok(layout)) = (age.parse::<i64>(), layout.parse::<u32>()) {
                    policy.convert = Some((age, layout));
                }
            }
        }
        if let Some(value) = container.xattrs.get("sys.lru.move.match") {
            if let Some((age, dest)) = value.split_once(':') {
                if let Ok(age) = age.parse::<i64>() {
                    mv = Some(MovePolicy { age_after: age, destination: dest.to_string() });
                }
            }
        }
        (policy, mv)
    }

    fn is_active(&self) -> bool {
        self.expire_after.is_some() || self.convert.is_some()
    }
}

/// Counts of transitions applied during one scan, surfaced for
/// logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LruReport {
    pub deleted: u64,
    pub converted: u64,
    pub moved: u64,
}

impl std::ops::AddAssign for LruReport {
    fn add_assign(&mut self, other: Self) {
        self.deleted += other.deleted;
        self.converted += other.converted;
        self.moved += other.moved;
    }
}

pub struct LruEngine {
    namespace: Arc<NamespaceStore>,
}

impl LruEngine {
    pub fn new(namespace: Arc<NamespaceStore>) -> Self {
        Self { namespace }
    }

    pub fn spawn(self: Arc<Self>, tick_period: Duration, cancel: crate::engines::CancelToken) -> tokio::task::JoinHandle<()> {
        crate::engines::spawn_periodic("lru", tick_period, cancel, move || {
            let this = self.clone();
            async move { this.tick().await.map(|_| ()) }
        })
    }

    pub async fn tick(&self) -> MgmResult<LruReport> {
        self.walk(crate::ids::ROOT_CONTAINER_ID).await
    }

    async fn walk(&self, container_id: u64) -> MgmResult<LruReport> {
        let mut report = LruReport::default();
        let container = self.namespace.get_container(container_id).await?;
        let (policy, move_policy) = Policy::parse(&container);
        let path = self.namespace.path_of_container(container_id).await?;
        let base = path.trim_end_matches('/').to_string();

        if policy.is_active() || move_policy.is_some() {
            let (_, child_files) = self.namespace.list_children(container_id).await?;
            for name in child_files {
                let file_path = format!("{base}/{name}");
                self.apply_policy(&file_path, policy, &move_policy, &mut report).await;
            }
        }

        let (child_containers, _) = self.namespace.list_children(container_id).await?;
        for name in child_containers {
            let child_path = format!("{base}/{name}");
            if let Ok(ChildRef::Container(child_id)) = self.namespace.resolve(&child_path).await {
                report += Box::pin(self.walk(child_id)).await?;
            }
        }
        Ok(report)
    }

    async fn apply_policy(&self, file_path: &str, policy: Policy, move_policy: &Option<MovePolicy>, report: &mut LruReport) {
        let Ok(ChildRef::File(file_id)) = self.namespace.resolve(file_path).await else { return };
        let Ok(file) = self.namespace.get_file(file_id).await else { return };
        let age = crate::namespace::Timestamp::now().seconds - file.mtime.seconds;

        if let Some(expire_after) = policy.expire_after {
            if age >= expire_after {
                if self.namespace.unlink_file(file_path).await.is_ok() {
                    report.deleted += 1;
                }
                return;
            }
        }
        if let Some((convert_after, layout_id)) = policy.convert {
            if age >= convert_after {
                if let Ok(new_layout) = LayoutId::decode(layout_id) {
                    let mut updated = file.clone();
                    updated.layout_id = new_layout;
                    if self.namespace.update_file(updated).await.is_ok() {
                        report.converted += 1;
                    }
                }
                return;
            }
        }
        if let Some(mv) = move_policy {
            if age >= mv.age_after {
                let name = file.name.clone();
                let destination = format!("{}/{}", mv.destination.trim_end_matches('/'), name);
                if self.namespace.rename(file_path, &destination, file.owner_uid, file.owner_gid, false).await.is_ok() {
                    report.moved += 1;
                }
            }
        }
    }
}
