//! Fsck engine (spec §4.9): compares what the namespace declares a
//! file's replicas to be against what storage nodes actually report
//! back from periodic scans, and categorizes the mismatches.
//!
//! The scan itself — walking a file system's local disk and hashing
//! each object — runs on the FST side (out of scope, spec §1); this
//! engine only consumes the scan results storage nodes push back and
//! reconciles them against the namespace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::capability::{AccessMode, CapabilityBindings, CapabilityEngine};
use crate::error::MgmResult;
use crate::namespace::NamespaceStore;
use crate::transfer::{QueueKind, TransferJob, TransferQueues};

/// What one storage node reports finding for one file during its
/// periodic local scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub fs_id: u32,
    pub file_id: u64,
    pub checksum: Vec<u8>,
}

/// One categorized discrepancy (spec §4.9 "{checksum-mismatch,
/// not-registered, orphaned, wrong-layout-count, missing-replica}").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsckFinding {
    /// Reported checksum disagrees with the file's declared checksum.
    ChecksumMismatch { file_id: u64, fs_id: u32 },
    /// A node reports a replica the namespace never recorded for it.
    NotRegistered { file_id: u64, fs_id: u32 },
    /// A node reports an object for a file id the namespace has no
    /// record of at all.
    Orphaned { file_id: u64, fs_id: u32 },
    /// The file's live location count does not match its layout's
    /// stripe count.
    WrongLayoutCount { file_id: u64, expected: usize, actual: usize },
    /// A declared location never reported back this scan round.
    MissingReplica { file_id: u64, fs_id: u32 },
}

pub struct FsckEngine {
    namespace: Arc<NamespaceStore>,
    capabilities: Arc<CapabilityEngine>,
    queues: Arc<TransferQueues>,
    manager_identity: String,
    pending: Mutex<Vec<ScanReport>>,
    repair: bool,
}

impl FsckEngine {
    pub fn new(
        namespace: Arc<NamespaceStore>,
        capabilities: Arc<CapabilityEngine>,
        queues: Arc<TransferQueues>,
        manager_identity: impl Into<String>,
        repair: bool,
    ) -> Self {
        Self { namespace, capabilities, queues, manager_identity: manager_identity.into(), pending: Mutex::new(Vec::new()), repair }
    }

    pub fn spawn(self: Arc<Self>, tick_period: Duration, cancel: crate::engines::CancelToken) -> tokio::task::JoinHandle<()> {
        crate::engines::spawn_periodic("fsck", tick_period, cancel, move || {
            let this = self.clone();
            async move { this.tick().await.map(|_| ()) }
        })
    }

    /// A storage node's periodic scan submits its results here; the
    /// next tick reconciles them.
    pub async fn submit_report(&self, report: ScanReport) {
        self.pending.lock().await.push(report);
    }

    pub async fn tick(&self) -> MgmResult<Vec<FsckFinding>> {
        let reports = std::mem::take(&mut *self.pending.lock().await);
        let findings = self.reconcile(reports).await;
        if self.repair {
            for finding in &findings {
                self.trigger_repair(finding).await;
            }
        }
        Ok(findings)
    }

    async fn reconcile(&self, reports: Vec<ScanReport>) -> Vec<FsckFinding> {
        let mut findings = Vec::new();
        let mut reported_by_file: HashMap<u64, Vec<&ScanReport>> = HashMap::new();
        for report in &reports {
            reported_by_file.entry(report.file_id).or_default().push(report);

            let Ok(file) = self.namespace.get_file(report.file_id).await else {
                findings.push(FsckFinding::Orphaned { file_id: report.file_id, fs_id: report.fs_id });
                continue;
            };
            if !file.locations.contains(&report.fs_id) {
                findings.push(FsckFinding::NotRegistered { file_id: report.file_id, fs_id: report.fs_id });
                continue;
            }
            if !file.checksum.is_empty() && file.checksum != report.checksum {
                findings.push(FsckFinding::ChecksumMismatch { file_id: report.file_id, fs_id: report.fs_id });
            }
        }

        for (file_id, seen) in &reported_by_file {
            if let Ok(file) = self.namespace.get_file(*file_id).await {
                let expected = file.layout_id.stripe_count();
                if file.locations.len() != expected {
                    findings.push(FsckFinding::WrongLayoutCount { file_id: *file_id, expected, actual: file.locations.len() });
                }
                let seen_fs: std::collections::HashSet<u32> = seen.iter().map(|r| r.fs_id).collect();
                for &fs_id in &file.locations {
                    if !seen_fs.contains(&fs_id) {
                        findings.push(FsckFinding::MissingReplica { file_id: *file_id, fs_id });
                    }
                }
            }
        }
        findings
    }

    /// For a missing or not-registered replica, queues a fresh
    /// replication job (an "adjust-replica" repair) on the `Balance`
    /// queue — repair traffic is background work like rebalancing, not
    /// the drain or client-visible paths, so it shares that queue kind.
    async fn trigger_repair(&self, finding: &FsckFinding) {
        let (file_id, target_fs_id) = match finding {
            FsckFinding::MissingReplica { file_id, fs_id } => (*file_id, *fs_id),
            _ => return,
        };
        let bindings = CapabilityBindings {
            access: AccessMode::Create,
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
            fs_id: target_fs_id,
            local_prefix: String::new(),
            replicas: Vec::new(),
        };
        let Ok(write_cap) = self.capabilities.mint(bindings) else { return };
        let job = TransferJob { file_id, source_fs_id: None, target_fs_id, read_capability: None, write_capability: write_cap };
        let _ = self.queues.push(target_fs_id, QueueKind::Balance, job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KeyStore;
    use crate::namespace::file::{ChecksumAlgo, LayoutId, LayoutType};
    use std::time::Duration as StdDuration;

    async fn harness(dir: &tempfile::TempDir) -> (Arc<NamespaceStore>, Arc<FsckEngine>) {
        let namespace = NamespaceStore::open(dir.path().join("containers.log"), dir.path().join("files.log")).await.unwrap();
        let file_id = namespace.create_file("/f", 0, 0, LayoutId::new(LayoutType::Replica, 1, ChecksumAlgo::None)).await.unwrap();
        let mut file = namespace.get_file(file_id).await.unwrap();
        file.locations = vec![1];
        namespace.update_file(file).await.unwrap();

        let capabilities = Arc::new(CapabilityEngine::new(KeyStore::new_with_random_key(), StdDuration::from_secs(60)));
        let queues = Arc::new(TransferQueues::new(10));
        let engine = Arc::new(FsckEngine::new(namespace.clone(), capabilities, queues, "mgm1:1094", true));
        (namespace, engine)
    }

    #[tokio::test]
    async fn missing_replica_is_flagged_and_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let (_namespace, engine) = harness(&dir).await;
        let findings = engine.tick().await.unwrap();
        assert!(findings.iter().any(|f| matches!(f, FsckFinding::MissingReplica { fs_id: 1, .. })));
    }

    #[tokio::test]
    async fn orphaned_report_for_unknown_file_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let (_namespace, engine) = harness(&dir).await;
        engine.submit_report(ScanReport { fs_id: 1, file_id: 999, checksum: vec![1, 2, 3] }).await;
        let findings = engine.tick().await.unwrap();
        assert!(findings.contains(&FsckFinding::Orphaned { file_id: 999, fs_id: 1 }));
    }

    #[tokio::test]
    async fn not_registered_replica_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let (namespace, engine) = harness(&dir).await;
        let other = namespace.create_file("/g", 0, 0, LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None)).await.unwrap();
        engine.submit_report(ScanReport { fs_id: 2, file_id: other, checksum: vec![] }).await;
        let findings = engine.tick().await.unwrap();
        assert!(findings.iter().any(|f| matches!(f, FsckFinding::NotRegistered { fs_id: 2, .. })));
    }
}
