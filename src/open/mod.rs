//! Redirecting Open Front-End (spec §4.6): the single control path a
//! client's `open` call goes through before it is told which storage
//! node to actually talk to. Grounded on `XrdMgmOfs::_open` — global
//! stall/redirect rules first, then proc delegation, then permission
//! and placement/access, then a signed capability naming the chosen
//! replica(s).
//!
//! This module never moves bytes; it only ever answers with a
//! redirect target plus an opaque capability, a stall, a proc result,
//! or an [`crate::error::MgmError`].

pub mod acl;

use std::sync::Arc;

use crate::capability::{AccessMode, Capability, CapabilityBindings, CapabilityEngine, ReplicaTarget};
use crate::cluster::ClusterView;
use crate::config::Config;
use crate::error::{ErrorKind, MgmError, MgmResult};
use crate::identity::ClientIdentity;
use crate::namespace::store::ChildRef;
use crate::namespace::{Container, LayoutId, NamespaceStore};
use crate::proc::{ProcInterface, ProcRequest, ProcResult};
use crate::quota::QuotaEngine;
use crate::scheduler::{AccessRequest, PlacementRequest, Scheduler};
use crate::transfer::{QueueKind, TransferJob, TransferQueues};

pub use acl::{Acl, AclGrant};

/// `O_CREAT`/`O_TRUNC` intent a client's open call carries (spec §4.6
/// step 7 "create-or-error", step 8 "truncate handling").
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub create: bool,
    pub truncate: bool,
    pub write: bool,
}

/// One `open` call (spec §4.6).
pub struct OpenRequest {
    pub path: String,
    pub client: ClientIdentity,
    pub flags: OpenFlags,
    /// Layout to use if this open creates a new file; ignored otherwise.
    pub layout: LayoutId,
    /// Per-request seed handed to the scheduler so a retry after a
    /// heal-unavailable loop lands on a different replica (spec §4.5).
    pub seed: u64,
    /// Raw query string, only consulted when `path` is under `/proc/`.
    pub query: String,
}

/// The outcome a client's `open` eventually carries back.
pub enum OpenOutcome {
    /// Redirect to `host:port` with `opaque` as the CGI string
    /// (spec §4.6 step 14).
    Redirect { host: String, port: u16, opaque: String },
    /// Retry after `seconds` (spec §4.6 step 2, §7 `ServiceBusy`).
    Stall { seconds: u32, message: String },
    /// A `/proc/` path was delegated instead of opened (spec §4.6 step 4).
    Proc(ProcResult),
}

pub struct RedirectingOpenFrontEnd {
    config: Arc<Config>,
    namespace: Arc<NamespaceStore>,
    cluster: Arc<ClusterView>,
    quota: Arc<QuotaEngine>,
    scheduler: Arc<Scheduler>,
    capabilities: Arc<CapabilityEngine>,
    proc: Arc<ProcInterface>,
    queues: Arc<TransferQueues>,
    manager_identity: String,
    /// Per-file count of self-heal attempts already spent against
    /// `sys.heal.unavailable`'s bound (spec §4.6 step 9); expires on
    /// its own so a file that later recovers doesn't carry a stale
    /// count forever.
    heal_attempts: moka::sync::Cache<u64, u32>,
}

impl RedirectingOpenFrontEnd {
    pub fn new(
        config: Arc<Config>,
        namespace: Arc<NamespaceStore>,
        cluster: Arc<ClusterView>,
        quota: Arc<QuotaEngine>,
        scheduler: Arc<Scheduler>,
        capabilities: Arc<CapabilityEngine>,
        proc: Arc<ProcInterface>,
        queues: Arc<TransferQueues>,
        manager_identity: impl Into<String>,
    ) -> Self {
        Self {
            config,
            namespace,
            cluster,
            quota,
            scheduler,
            capabilities,
            proc,
            queues,
            manager_identity: manager_identity.into(),
            heal_attempts: moka::sync::Cache::new(10_000),
        }
    }

    /// Runs the full redirecting-open algorithm (spec §4.6).
    pub async fn open(&self, request: OpenRequest) -> MgmResult<OpenOutcome> {
        let path = self.config.remap_path(&request.path);

        if self.config.access_rules.is_user_banned(&request.client.host) {
            return Err(MgmError::permission_denied("client host is banned"));
        }

        if let Some(stall) = self.config.access_rules.matching_stall(&path) {
            return Ok(OpenOutcome::Stall { seconds: stall.seconds, message: stall.message.clone() });
        }

        if let Some(redirect) = self.config.access_rules.matching_redirect(&path) {
            return Ok(OpenOutcome::Redirect { host: redirect.host.clone(), port: redirect.port, opaque: String::new() });
        }

        if ProcInterface::is_proc_path(&path) {
            let proc_request = ProcRequest::parse(&path, &request.query)?;
            return Ok(OpenOutcome::Proc(self.proc.execute(&proc_request, &request.client).await));
        }

        let (parent_path, _name) = split_parent(&path)?;
        let parent_id = self.namespace.resolve_container(parent_path).await?;
        let parent = self.namespace.get_container(parent_id).await?;
        let acl = Acl::parse(&parent.xattrs);

        if request.flags.write || request.flags.create {
            let mode_allows = parent.allows_write_execute(request.client.uid, request.client.gid);
            let acl_allows = acl.grants_write(request.client.uid, request.client.gid);
            if !mode_allows && !acl_allows {
                return Err(MgmError::permission_denied("parent denies write"));
            }
        } else {
            let mode_allows = parent.allows_read_execute(request.client.uid, request.client.gid);
            let acl_allows = acl.grants_read(request.client.uid, request.client.gid);
            if !mode_allows && !acl_allows {
                return Err(MgmError::permission_denied("parent denies read"));
            }
        }

        let existing = self.namespace.resolve(&path).await.ok();
        if let Some(ChildRef::Container(_)) = existing {
            return Err(MgmError::is_a_directory(path.as_str()));
        }

        let mut newly_created = false;
        let file_id = match existing {
            Some(ChildRef::File(id)) => {
                if request.flags.create && !request.flags.truncate {
                    return Err(MgmError::existing_entry(path.as_str()));
                }
                let file = self.namespace.get_file(id).await?;
                if request.flags.truncate && acl.write_once && !file.locations.is_empty() {
                    return Err(MgmError::permission_denied("write-once file cannot be overwritten"));
                }
                id
            }
            None => {
                if !request.flags.create {
                    if let Some((host, port)) = parse_redirect_target(parent.xattrs.get("sys.redirect.enoent")) {
                        return Ok(OpenOutcome::Redirect { host, port, opaque: String::new() });
                    }
                    return Err(MgmError::missing_entry(path.as_str()));
                }
                newly_created = true;
                self.namespace.create_file(&path, request.client.uid, request.client.gid, request.layout).await?
            }
            Some(ChildRef::Container(_)) => unreachable!("handled above"),
        };

        let mut file = self.namespace.get_file(file_id).await?;

        // Spec §4.6 step 7: `O_CREAT` always calls Placement, not only
        // a truncating open; step 8 additionally re-places an existing
        // replicated file on a truncating write (spec §8 scenario 2).
        let needs_placement =
            request.flags.truncate || newly_created || (request.flags.write && file.locations.is_empty());
        if needs_placement {
            let quota_node_id = self.quota.find_node_for(parent_id).await?;
            let placement = self
                .scheduler
                .place(PlacementRequest {
                    space_name: self.space_for(parent_id).await,
                    stripe_count: file.layout_id.stripe_count(),
                    booking_size_bytes: 0,
                    headroom_bytes: 0,
                    uid: request.client.uid,
                    gid: request.client.gid,
                    quota_node_id,
                    seed: request.seed,
                })
                .await;
            let locations = match placement {
                Ok(locations) => locations,
                Err(err) if err.kind() == ErrorKind::NoSpace => {
                    if let Some(seconds) = parent.xattrs.get("sys.stall.unavailable").and_then(|s| s.parse::<u32>().ok()) {
                        return Ok(OpenOutcome::Stall { seconds, message: "no space available for placement".to_string() });
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            file.locations = locations;
            file.unlinked_locations.clear();
            file.size = 0;
            self.namespace.update_file(file.clone()).await?;

            if newly_created {
                if let Some(node_id) = quota_node_id {
                    self.quota.apply_delta(node_id, file.owner_uid, file.owner_gid, 0, 0, 1);
                }
            }
        }

        let (primary_fs_id, effective_layout, surviving) = if request.flags.write || request.flags.truncate {
            let primary = *file.locations.first().ok_or_else(|| MgmError::no_entry("no placement target"))?;
            (primary, file.layout_id, file.locations.clone())
        } else {
            let accessed = self
                .scheduler
                .access(AccessRequest { locations: file.locations.clone(), pinned_fs_id: None, seed: request.seed })
                .await;
            let chosen = match accessed {
                Ok(chosen) => chosen,
                Err(err) if err.kind() == ErrorKind::NoNetwork => {
                    return self.handle_no_network(&parent, file_id, &path, file.layout_id, &file.locations).await;
                }
                Err(err) => return Err(err),
            };
            let mut surviving = Vec::new();
            for &fs_id in &file.locations {
                if let Ok(snapshot) = self.cluster.snapshot(fs_id).await {
                    if snapshot.active == crate::cluster::ActiveState::Online
                        && snapshot.boot == crate::cluster::BootState::Booted
                        && !snapshot.config_state.read_forbidden()
                    {
                        surviving.push(fs_id);
                    }
                }
            }
            (chosen, file.layout_id.with_surviving_stripes(surviving.len()), surviving)
        };

        let primary_snapshot = self.cluster.snapshot(primary_fs_id).await?;
        let primary_prefix = self.cluster.fs_config(primary_fs_id, "local_prefix").await.unwrap_or_default();

        let mut replicas = Vec::new();
        for &fs_id in &surviving {
            if fs_id == primary_fs_id {
                continue;
            }
            let Ok(snapshot) = self.cluster.snapshot(fs_id).await else { continue };
            let prefix = self.cluster.fs_config(fs_id, "local_prefix").await.unwrap_or_default();
            replicas.push(ReplicaTarget { fs_id, host: snapshot.host().to_string(), port: snapshot.port(), local_prefix: prefix });
        }

        let access = if request.flags.create && !request.flags.truncate {
            AccessMode::Create
        } else if request.flags.write || request.flags.truncate {
            AccessMode::Update
        } else {
            AccessMode::Read
        };

        let bindings = CapabilityBindings {
            access,
            layout_id: effective_layout.encode(),
            container_id: parent_id,
            ruid: request.client.uid,
            rgid: request.client.gid,
            uid: file.owner_uid,
            gid: file.owner_gid,
            path: path.clone(),
            manager: self.manager_identity.clone(),
            file_id,
            booking_size: 0,
            fs_id: primary_fs_id,
            local_prefix: primary_prefix,
            replicas,
        };
        let capability: Capability = self.capabilities.mint(bindings)?;

        Ok(OpenOutcome::Redirect { host: primary_snapshot.host().to_string(), port: primary_snapshot.port(), opaque: capability.encode() })
    }

    async fn space_for(&self, _container_id: u64) -> &str {
        self.config.setting("default.space").unwrap_or("default")
    }

    /// Spec §4.6 step 9: when reading hits `NoNetwork` and the parent
    /// carries `sys.heal.unavailable=N`, submit up to `N` adjust-replica
    /// repair jobs (one per call) and stall the client instead of
    /// failing outright; surrender with an error once `N` is spent.
    /// Falls back to `sys.redirect.enonet` (spec §7) when healing isn't
    /// configured or has been exhausted.
    async fn handle_no_network(
        &self,
        parent: &Container,
        file_id: u64,
        path: &str,
        layout_id: LayoutId,
        locations: &[u32],
    ) -> MgmResult<OpenOutcome> {
        if let Some(limit) = parent.xattrs.get("sys.heal.unavailable").and_then(|s| s.parse::<u32>().ok()) {
            let attempts = self.heal_attempts.get(&file_id).unwrap_or(0) + 1;
            self.heal_attempts.insert(file_id, attempts);
            if attempts <= limit {
                let _ = self.submit_heal_job(file_id, path, layout_id.encode(), locations).await;
                return Ok(OpenOutcome::Stall { seconds: self.heal_period_seconds(), message: "healing unavailable replica".to_string() });
            }
            self.heal_attempts.invalidate(&file_id);
        }
        if let Some((host, port)) = parse_redirect_target(parent.xattrs.get("sys.redirect.enonet")) {
            return Ok(OpenOutcome::Redirect { host, port, opaque: String::new() });
        }
        Err(MgmError::no_network("no surviving replica for this file"))
    }

    /// Picks the first online, booted, writable file system not
    /// already holding this file, as a target for a self-heal
    /// replication job.
    async fn pick_heal_target(&self, exclude: &[u32]) -> Option<u32> {
        use crate::cluster::{ActiveState, BootState, ConfigState};
        for fs_id in self.cluster.all_file_system_ids().await {
            if exclude.contains(&fs_id) {
                continue;
            }
            if let Ok(snapshot) = self.cluster.snapshot(fs_id).await {
                if snapshot.active == ActiveState::Online
                    && snapshot.boot == BootState::Booted
                    && snapshot.config_state >= ConfigState::WriteOnly
                {
                    return Some(fs_id);
                }
            }
        }
        None
    }

    /// Mints a write capability for a fresh replica and pushes it onto
    /// the chosen target's `Extern` queue (spec §4.6 step 9 "submit up
    /// to N adjust-replica proc commands"); the proc interface's own
    /// `file` command is the client-facing equivalent, this is the
    /// front-end issuing the same repair internally.
    async fn submit_heal_job(&self, file_id: u64, path: &str, layout_id: u32, exclude: &[u32]) -> MgmResult<()> {
        let target_fs = self.pick_heal_target(exclude).await.ok_or_else(|| MgmError::no_network("no healing target available"))?;
        let bindings = CapabilityBindings {
            access: AccessMode::Create,
            layout_id,
            container_id: 0,
            ruid: 0,
            rgid: 0,
            uid: 0,
            gid: 0,
            path: path.to_string(),
            manager: self.manager_identity.clone(),
            file_id,
            booking_size: 0,
            fs_id: target_fs,
            local_prefix: String::new(),
            replicas: Vec::new(),
        };
        let write_capability = self.capabilities.mint(bindings)?;
        let job = TransferJob { file_id, source_fs_id: None, target_fs_id: target_fs, read_capability: None, write_capability };
        self.queues.push(target_fs, QueueKind::Extern, job).map_err(|_| MgmError::no_space("heal queue full"))
    }

    fn heal_period_seconds(&self) -> u32 {
        self.config.setting("heal.period").and_then(|s| s.parse().ok()).unwrap_or(60)
    }
}

/// Parses a `"host:port"` xattr value (spec §4.6 `sys.redirect.enoent`/
/// `sys.redirect.enonet`).
fn parse_redirect_target(value: Option<&String>) -> Option<(String, u16)> {
    let (host, port) = value?.split_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

/// Splits `path` into its parent directory and final component
/// (`"/a/b/c"` -> `("/a/b", "c")`). The namespace store keeps its own
/// equivalent split private, so the front-end carries a local copy
/// rather than widen that module's API for one caller.
fn split_parent(path: &str) -> MgmResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(MgmError::invalid("cannot open the root container"));
    }
    match trimmed.rfind('/') {
        Some(0) => Ok(("/", &trimmed[1..])),
        Some(idx) => Ok((&trimmed[..idx], &trimmed[idx + 1..])),
        None => Err(MgmError::invalid("path must be absolute")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KeyStore;
    use crate::cluster::{BootState, ConfigState};
    use crate::namespace::{ChecksumAlgo, LayoutType};
    use crate::transfer::TransferQueues;
    use std::time::Duration;

    async fn harness() -> (tempfile::TempDir, RedirectingOpenFrontEnd) {
        let dir = tempfile::tempdir().unwrap();
        let namespace = NamespaceStore::open(dir.path().join("c.log"), dir.path().join("f.log")).await.unwrap();
        let cluster = Arc::new(ClusterView::new(Duration::from_secs(60)));
        cluster.register_space("default").await;
        cluster.register_group("default.0", "default").await;
        cluster.register_file_system(1, "fst1:1095", "default.0").await;
        cluster.set_boot_state(1, BootState::Booted).await.unwrap();
        cluster.set_config_state(1, ConfigState::ReadWrite).await.unwrap();
        cluster.set_free_bytes(1, 10_000_000, 20_000_000).await.unwrap();
        cluster.record_heartbeat(1).await.unwrap();
        cluster.report_errc(1, 0).await.unwrap();

        let quota = Arc::new(QuotaEngine::new(namespace.clone()));
        let scheduler = Arc::new(Scheduler::new(cluster.clone(), quota.clone()));
        let capabilities = Arc::new(CapabilityEngine::new(KeyStore::new_with_random_key(), Duration::from_secs(60)));
        let queues = Arc::new(TransferQueues::new(16));
        let fsck = Arc::new(crate::engines::fsck::FsckEngine::new(namespace.clone(), capabilities.clone(), queues.clone(), "mgm1:1094", false));
        let config = Arc::new(Config::default());
        let proc = Arc::new(ProcInterface::new(namespace.clone(), cluster.clone(), quota.clone(), fsck, queues.clone(), config.clone()));

        let frontend = RedirectingOpenFrontEnd::new(
            config,
            namespace.clone(),
            cluster,
            quota,
            scheduler,
            capabilities,
            proc,
            queues,
            "mgm1:1094",
        );
        (dir, frontend)
    }

    fn root() -> ClientIdentity {
        ClientIdentity::root("client1")
    }

    #[tokio::test]
    async fn create_on_missing_file_places_and_mints_a_capability() {
        let (_dir, frontend) = harness().await;
        let request = OpenRequest {
            path: "/a/f".to_string(),
            client: root(),
            flags: OpenFlags { create: true, truncate: true, write: true },
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 7,
            query: String::new(),
        };
        frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let outcome = frontend.open(request).await.unwrap();
        match outcome {
            OpenOutcome::Redirect { host, port, opaque } => {
                assert_eq!(host, "fst1");
                assert_eq!(port, 1095);
                assert!(opaque.contains("mgm.access=create"));
            }
            _ => panic!("expected a redirect"),
        }
    }

    /// Spec §8 scenario 2: `O_CREAT|O_RDWR` without `O_TRUNC` on a space
    /// with 3 online Booted RW file systems still runs Placement (spec
    /// §4.6 step 7), so the file ends up with `stripes` locations from
    /// distinct groups instead of erroring with `NoEntry`.
    #[tokio::test]
    async fn create_without_truncate_still_places_the_file() {
        let (_dir, frontend) = harness().await;
        frontend.cluster.register_group("default.1", "default").await;
        frontend.cluster.register_file_system(2, "fst2:1095", "default.1").await;
        frontend.cluster.set_boot_state(2, BootState::Booted).await.unwrap();
        frontend.cluster.set_config_state(2, ConfigState::ReadWrite).await.unwrap();
        frontend.cluster.set_free_bytes(2, 10_000_000, 20_000_000).await.unwrap();
        frontend.cluster.record_heartbeat(2).await.unwrap();
        frontend.cluster.report_errc(2, 0).await.unwrap();

        frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let request = OpenRequest {
            path: "/a/file".to_string(),
            client: root(),
            flags: OpenFlags { create: true, truncate: false, write: true },
            layout: LayoutId::new(LayoutType::Replica, 2, ChecksumAlgo::None),
            seed: 7,
            query: String::new(),
        };
        let outcome = frontend.open(request).await.unwrap();
        assert!(matches!(outcome, OpenOutcome::Redirect { .. }));

        let file_id = match frontend.namespace.resolve("/a/file").await.unwrap() {
            ChildRef::File(id) => id,
            _ => panic!("expected a file"),
        };
        let file = frontend.namespace.get_file(file_id).await.unwrap();
        assert_eq!(file.locations.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_without_create_flag_is_missing_entry() {
        let (_dir, frontend) = harness().await;
        frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let request = OpenRequest {
            path: "/a/nope".to_string(),
            client: root(),
            flags: OpenFlags::default(),
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 1,
            query: String::new(),
        };
        let err = frontend.open(request).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingEntry);
    }

    #[tokio::test]
    async fn stall_rule_short_circuits_before_namespace_lookup() {
        let (_dir, frontend) = harness().await;
        let mut config = Config::default();
        config.access_rules.stall_rules.push(crate::config::StallRule {
            target: "/eos/banned".to_string(),
            seconds: 30,
            message: "busy".to_string(),
        });
        let frontend = RedirectingOpenFrontEnd { config: Arc::new(config), ..frontend };
        let request = OpenRequest {
            path: "/eos/banned/x".to_string(),
            client: root(),
            flags: OpenFlags::default(),
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 1,
            query: String::new(),
        };
        let outcome = frontend.open(request).await.unwrap();
        assert!(matches!(outcome, OpenOutcome::Stall { seconds: 30, .. }));
    }

    #[tokio::test]
    async fn read_rebuilds_layout_to_surviving_stripe_count() {
        let (_dir, frontend) = harness().await;
        frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let file_id = frontend
            .namespace
            .create_file("/a/f", 0, 0, LayoutId::new(LayoutType::Replica, 2, ChecksumAlgo::None))
            .await
            .unwrap();
        let mut file = frontend.namespace.get_file(file_id).await.unwrap();
        file.locations = vec![1];
        frontend.namespace.update_file(file).await.unwrap();

        let request = OpenRequest {
            path: "/a/f".to_string(),
            client: root(),
            flags: OpenFlags::default(),
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 3,
            query: String::new(),
        };
        let outcome = frontend.open(request).await.unwrap();
        match outcome {
            OpenOutcome::Redirect { opaque, .. } => assert!(opaque.contains("mgm.access=read")),
            _ => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn missing_file_redirects_when_parent_configures_enoent_redirect() {
        let (_dir, frontend) = harness().await;
        let parent_id = frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let mut parent = frontend.namespace.get_container(parent_id).await.unwrap();
        parent.xattrs.insert("sys.redirect.enoent".to_string(), "redirector:2094".to_string());
        frontend.namespace.update_container(parent).await.unwrap();

        let request = OpenRequest {
            path: "/a/nope".to_string(),
            client: root(),
            flags: OpenFlags::default(),
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 1,
            query: String::new(),
        };
        let outcome = frontend.open(request).await.unwrap();
        match outcome {
            OpenOutcome::Redirect { host, port, .. } => {
                assert_eq!(host, "redirector");
                assert_eq!(port, 2094);
            }
            _ => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn truncate_stalls_when_parent_configures_stall_unavailable() {
        let (_dir, frontend) = harness().await;
        frontend.cluster.set_config_state(1, crate::cluster::ConfigState::ReadOnly).await.unwrap();
        let parent_id = frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let mut parent = frontend.namespace.get_container(parent_id).await.unwrap();
        parent.xattrs.insert("sys.stall.unavailable".to_string(), "15".to_string());
        frontend.namespace.update_container(parent).await.unwrap();

        let request = OpenRequest {
            path: "/a/f".to_string(),
            client: root(),
            flags: OpenFlags { create: true, truncate: true, write: true },
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 1,
            query: String::new(),
        };
        let outcome = frontend.open(request).await.unwrap();
        assert!(matches!(outcome, OpenOutcome::Stall { seconds: 15, .. }));
    }

    /// Spec §8 scenario 3: two unavailable-replica opens stall while
    /// healing is attempted, a third with still no surviving replica
    /// surrenders with `ENONET`.
    #[tokio::test]
    async fn heal_unavailable_stalls_twice_then_errors_on_the_third_attempt() {
        let (_dir, frontend) = harness().await;
        frontend.cluster.register_group("default.1", "default").await;
        frontend.cluster.register_file_system(2, "fst2:1095", "default.1").await;
        // fs 2 is registered but never booted, so it never survives the access filter.

        let parent_id = frontend.namespace.create_container("/a", false, 0, 0).await.unwrap();
        let mut parent = frontend.namespace.get_container(parent_id).await.unwrap();
        parent.xattrs.insert("sys.heal.unavailable".to_string(), "2".to_string());
        frontend.namespace.update_container(parent).await.unwrap();

        let file_id = frontend
            .namespace
            .create_file("/a/f", 0, 0, LayoutId::new(LayoutType::Replica, 1, ChecksumAlgo::None))
            .await
            .unwrap();
        let mut file = frontend.namespace.get_file(file_id).await.unwrap();
        file.locations = vec![2];
        frontend.namespace.update_file(file).await.unwrap();

        let make_request = || OpenRequest {
            path: "/a/f".to_string(),
            client: root(),
            flags: OpenFlags::default(),
            layout: LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None),
            seed: 1,
            query: String::new(),
        };

        let first = frontend.open(make_request()).await.unwrap();
        assert!(matches!(first, OpenOutcome::Stall { .. }), "first attempt should heal-stall");
        let second = frontend.open(make_request()).await.unwrap();
        assert!(matches!(second, OpenOutcome::Stall { .. }), "second attempt should heal-stall");
        let third = frontend.open(make_request()).await.unwrap_err();
        assert_eq!(third.kind(), crate::error::ErrorKind::NoNetwork);
    }
}
