//! Master/Slave Replicator (spec §4.10): a slave opens the master's
//! change logs read-only and tails them — periodically replaying
//! whatever is new, applying it to its own in-memory trees under the
//! namespace write lock, then releasing. Promotion stops the polling
//! loop and flips the process into accepting writes directly.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::MgmResult;
use crate::namespace::changelog::{ChangeLog, Record};
use crate::namespace::container::Container;
use crate::namespace::file::File;
use crate::namespace::NamespaceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// Tails a master's container and file logs and replays new records
/// into a local [`NamespaceStore`] (spec §4.10). Constructed against
/// explicit log paths rather than the target store's own, since the
/// whole point is that a slave's namespace is not the thing producing
/// those logs.
pub struct Replicator {
    namespace: Arc<NamespaceStore>,
    container_log: ChangeLog,
    file_log: ChangeLog,
    role: Mutex<Role>,
    next_container_seq: AtomicU64,
    next_file_seq: AtomicU64,
    manager_identity: String,
}

impl Replicator {
    pub fn new(
        namespace: Arc<NamespaceStore>,
        master_container_log_path: impl AsRef<Path>,
        master_file_log_path: impl AsRef<Path>,
        manager_identity: impl Into<String>,
    ) -> MgmResult<Self> {
        Ok(Self {
            namespace,
            container_log: ChangeLog::open(master_container_log_path.as_ref().to_path_buf())?,
            file_log: ChangeLog::open(master_file_log_path.as_ref().to_path_buf())?,
            role: Mutex::new(Role::Slave),
            next_container_seq: AtomicU64::new(0),
            next_file_seq: AtomicU64::new(0),
            manager_identity: manager_identity.into(),
        })
    }

    pub fn spawn(self: Arc<Self>, tick_period: Duration, cancel: crate::engines::CancelToken) -> tokio::task::JoinHandle<()> {
        crate::engines::spawn_periodic("replicator", tick_period, cancel, move || {
            let this = self.clone();
            async move { this.tick().await }
        })
    }

    pub async fn tick(&self) -> MgmResult<()> {
        if *self.role.lock().await == Role::Master {
            return Ok(());
        }
        self.poll_once().await
    }

    /// One read-apply-release pass over both logs (spec §4.10: "the
    /// slave periodically acquires the write side of a lock, reads new
    /// records, applies them ... and releases").
    pub async fn poll_once(&self) -> MgmResult<()> {
        let container_records: Vec<Record<Container>> = self.container_log.replay().await?;
        for record in container_records {
            if record.sequence < self.next_container_seq.load(Ordering::SeqCst) {
                continue;
            }
            self.namespace.apply_external_container(record.tag, record.id, record.payload).await?;
            self.next_container_seq.store(record.sequence + 1, Ordering::SeqCst);
        }

        let file_records: Vec<Record<File>> = self.file_log.replay().await?;
        for record in file_records {
            if record.sequence < self.next_file_seq.load(Ordering::SeqCst) {
                continue;
            }
            self.namespace.apply_external_file(record.tag, record.id, record.payload).await?;
            self.next_file_seq.store(record.sequence + 1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Stops polling and takes over as master (spec §4.10 "Failover":
    /// "ensures all records are applied, takes over the master queue
    /// identity on the bus, and starts accepting writes"). Catching up
    /// on the bus identity itself is the caller's job; this only flips
    /// the local role once the logs are fully drained.
    pub async fn promote(&self) -> MgmResult<()> {
        self.poll_once().await?;
        *self.role.lock().await = Role::Master;
        tracing::info!(manager = %self.manager_identity, "promoted to master");
        Ok(())
    }

    pub async fn is_master(&self) -> bool {
        *self.role.lock().await == Role::Master
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::file::{ChecksumAlgo, LayoutId, LayoutType};

    #[tokio::test]
    async fn slave_catches_up_on_container_and_file_creation() {
        let master_dir = tempfile::tempdir().unwrap();
        let master = NamespaceStore::open(master_dir.path().join("c.log"), master_dir.path().join("f.log")).await.unwrap();
        master.create_container("/a", true, 0, 0).await.unwrap();
        master.create_file("/a/f", 0, 0, LayoutId::new(LayoutType::Plain, 1, ChecksumAlgo::None)).await.unwrap();

        let slave_dir = tempfile::tempdir().unwrap();
        let slave = NamespaceStore::open(slave_dir.path().join("c.log"), slave_dir.path().join("f.log")).await.unwrap();
        let (container_path, file_path) = master.log_paths();
        let replicator = Replicator::new(slave.clone(), container_path, file_path, "slave1:1094").unwrap();

        replicator.poll_once().await.unwrap();
        assert!(slave.resolve("/a/f").await.is_ok());
    }

    #[tokio::test]
    async fn polling_twice_does_not_reapply_already_seen_records() {
        let master_dir = tempfile::tempdir().unwrap();
        let master = NamespaceStore::open(master_dir.path().join("c.log"), master_dir.path().join("f.log")).await.unwrap();
        master.create_container("/a", true, 0, 0).await.unwrap();

        let slave_dir = tempfile::tempdir().unwrap();
        let slave = NamespaceStore::open(slave_dir.path().join("c.log"), slave_dir.path().join("f.log")).await.unwrap();
        let (container_path, file_path) = master.log_paths();
        let replicator = Replicator::new(slave.clone(), container_path, file_path, "slave1:1094").unwrap();

        replicator.poll_once().await.unwrap();
        replicator.poll_once().await.unwrap();
        let (containers, _) = slave.list_children(crate::ids::ROOT_CONTAINER_ID).await.unwrap();
        assert_eq!(containers, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn promotion_stops_polling() {
        let master_dir = tempfile::tempdir().unwrap();
        let master = NamespaceStore::open(master_dir.path().join("c.log"), master_dir.path().join("f.log")).await.unwrap();
        let slave_dir = tempfile::tempdir().unwrap();
        let slave = NamespaceStore::open(slave_dir.path().join("c.log"), slave_dir.path().join("f.log")).await.unwrap();
        let (container_path, file_path) = master.log_paths();
        let replicator = Replicator::new(slave.clone(), container_path, file_path, "slave1:1094").unwrap();

        replicator.promote().await.unwrap();
        assert!(replicator.is_master().await);
        master.create_container("/late", true, 0, 0).await.unwrap();
        replicator.tick().await.unwrap();
        assert!(slave.resolve("/late").await.is_err());
    }
}
