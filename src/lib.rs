//! `eos-mgm-core`: the metadata-server core of a federated disk
//! storage system (spec OVERVIEW) — namespace, file-system view, quota
//! engine, cluster view, placement/access scheduler, capability
//! engine, commit protocol, background engines, master/slave
//! replication, proc interface, and the redirecting open front-end
//! that ties them together.
//!
//! Everything that moves bytes (storage nodes, the wire protocol
//! between client and manager, the messaging bus carrying cluster
//! config broadcasts) is out of scope (spec §1); this crate only
//! decides *where* bytes should go and *whether* a client is allowed
//! to put them there.
//!
//! Global singletons are composed once, at [`MgmRuntime::init`], into
//! a single owned struct rather than `static`s (Design Notes "Global
//! singletons"; grounded on `XrdMgmOfs.hh`'s `gOFS` being the one
//! process-wide instance every subsystem reaches through).

pub mod capability;
pub mod cluster;
pub mod commit;
pub mod config;
pub mod engines;
pub mod error;
pub mod fsview;
pub mod identity;
pub mod ids;
pub mod namespace;
pub mod open;
pub mod proc;
pub mod quota;
pub mod replication;
pub mod scheduler;
pub mod transfer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::capability::{CapabilityEngine, KeyStore};
use crate::cluster::ClusterView;
use crate::commit::CommitProtocol;
use crate::config::Config;
use crate::engines::balancer::Balancer;
use crate::engines::deletion::DeletionDispatcher;
use crate::engines::drain::DrainCoordinator;
use crate::engines::fsck::FsckEngine;
use crate::engines::lru::LruEngine;
use crate::engines::CancelToken;
use crate::error::MgmResult;
use crate::fsview::FileSystemView;
use crate::namespace::NamespaceStore;
use crate::open::RedirectingOpenFrontEnd;
use crate::proc::ProcInterface;
use crate::quota::QuotaEngine;
use crate::replication::Replicator;
use crate::scheduler::Scheduler;
use crate::transfer::TransferQueues;

/// Everything [`MgmRuntime::init`] needs that isn't already inside a
/// loaded [`Config`]: where the change logs live on disk, this
/// manager's own bus identity, and whether it should start as a
/// replication slave of another manager.
pub struct RuntimeConfig {
    pub config: Config,
    pub container_log_path: PathBuf,
    pub file_log_path: PathBuf,
    /// This manager's `host:port`, embedded in every minted capability
    /// (spec §6 `mgm.manager`).
    pub manager_identity: String,
    /// `Some((container_log, file_log))` of a master to tail, if this
    /// process is starting as a slave (spec §4.10).
    pub replicate_from: Option<(PathBuf, PathBuf)>,
    pub capability_validity: Duration,
    pub max_heartbeat_age: Duration,
    pub transfer_queue_capacity: usize,
    pub engine_tick_period: Duration,
    /// Balancer fill-deviation threshold applied to every space that
    /// doesn't set its own `balance.threshold` setting.
    pub default_balance_threshold: f64,
    pub fsck_repair: bool,
}

/// The composed, running process (Design Notes "Global singletons").
/// Every subsystem a request handler needs hangs off this struct as an
/// `Arc`, so handlers clone cheaply and background engines can each
/// hold their own reference without borrowing from the runtime itself.
pub struct MgmRuntime {
    pub config: Arc<Config>,
    pub namespace: Arc<NamespaceStore>,
    pub fsview: Arc<FileSystemView>,
    pub quota: Arc<QuotaEngine>,
    pub cluster: Arc<ClusterView>,
    pub scheduler: Arc<Scheduler>,
    pub capabilities: Arc<CapabilityEngine>,
    pub commit: Arc<CommitProtocol>,
    pub queues: Arc<TransferQueues>,
    pub proc: Arc<ProcInterface>,
    pub open: Arc<RedirectingOpenFrontEnd>,
    pub replicator: Option<Arc<Replicator>>,
    cancel: CancelToken,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MgmRuntime {
    /// Brings up every subsystem and starts the background engines
    /// (Deletion Dispatcher, Drain Coordinator, one Balancer per
    /// space, Fsck Engine, LRU Engine, and — if `replicate_from` is
    /// set — the Replicator's polling loop).
    pub async fn init(runtime_config: RuntimeConfig) -> MgmResult<Arc<Self>> {
        let config = Arc::new(runtime_config.config);
        let namespace = NamespaceStore::open(&runtime_config.container_log_path, &runtime_config.file_log_path).await?;
        let fsview = FileSystemView::new();
        namespace.register_listener(fsview.listener());

        let quota = Arc::new(QuotaEngine::new(namespace.clone()));
        let cluster = Arc::new(ClusterView::new(runtime_config.max_heartbeat_age));
        let scheduler = Arc::new(Scheduler::new(cluster.clone(), quota.clone()));
        let capabilities = Arc::new(CapabilityEngine::new(KeyStore::new_with_random_key(), runtime_config.capability_validity));
        let commit = Arc::new(CommitProtocol::new(namespace.clone(), fsview.clone(), quota.clone()));
        let queues = Arc::new(TransferQueues::new(runtime_config.transfer_queue_capacity));

        let fsck = Arc::new(FsckEngine::new(
            namespace.clone(),
            capabilities.clone(),
            queues.clone(),
            runtime_config.manager_identity.clone(),
            runtime_config.fsck_repair,
        ));
        let proc = Arc::new(ProcInterface::new(
            namespace.clone(),
            cluster.clone(),
            quota.clone(),
            fsck.clone(),
            queues.clone(),
            config.clone(),
        ));
        let open = Arc::new(RedirectingOpenFrontEnd::new(
            config.clone(),
            namespace.clone(),
            cluster.clone(),
            quota.clone(),
            scheduler.clone(),
            capabilities.clone(),
            proc.clone(),
            queues.clone(),
            runtime_config.manager_identity.clone(),
        ));

        let cancel = CancelToken::new();
        let mut background = Vec::new();

        let deletion = Arc::new(DeletionDispatcher::new(
            cluster.clone(),
            fsview.clone(),
            capabilities.clone(),
            queues.clone(),
            runtime_config.manager_identity.clone(),
        ));
        background.push(deletion.spawn(runtime_config.engine_tick_period, cancel.clone()));

        let drain = Arc::new(DrainCoordinator::new(
            cluster.clone(),
            fsview.clone(),
            capabilities.clone(),
            queues.clone(),
            runtime_config.manager_identity.clone(),
        ));
        background.push(drain.spawn(runtime_config.engine_tick_period, cancel.clone()));

        background.push(fsck.clone().spawn(runtime_config.engine_tick_period, cancel.clone()));

        let lru = Arc::new(LruEngine::new(namespace.clone()));
        background.push(lru.spawn(runtime_config.engine_tick_period, cancel.clone()));

        for space_name in cluster.all_space_names().await {
            let threshold = config
                .setting(&format!("{space_name}.balance.threshold"))
                .and_then(|s| s.parse().ok())
                .unwrap_or(runtime_config.default_balance_threshold);
            let balancer = Arc::new(Balancer::new(cluster.clone(), space_name, threshold));
            background.push(balancer.spawn(runtime_config.engine_tick_period, cancel.clone()));
        }

        let replicator = match runtime_config.replicate_from {
            Some((master_container_log, master_file_log)) => {
                let replicator = Arc::new(Replicator::new(
                    namespace.clone(),
                    master_container_log,
                    master_file_log,
                    runtime_config.manager_identity.clone(),
                )?);
                background.push(replicator.clone().spawn(runtime_config.engine_tick_period, cancel.clone()));
                Some(replicator)
            }
            None => None,
        };

        Ok(Arc::new(Self {
            config,
            namespace,
            fsview,
            quota,
            cluster,
            scheduler,
            capabilities,
            commit,
            queues,
            proc,
            open,
            replicator,
            cancel,
            background: std::sync::Mutex::new(background),
        }))
    }

    /// Signals every background engine to stop and waits for each to
    /// notice (`spawn_periodic` polls the cancel token once per tick,
    /// so this returns once the slowest engine's current tick drains).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.background.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
