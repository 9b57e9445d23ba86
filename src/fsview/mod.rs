//! File-System View (spec §4.2): the secondary index from storage-node
//! (file-system) id to the set of file ids replicated there.
//!
//! The view never reads or writes the change logs itself; it is kept
//! in sync purely by subscribing to [`crate::namespace::FileEvent`]s
//! emitted by the [`crate::namespace::NamespaceStore`] while the
//! namespace write lock is held, so a snapshot taken immediately after
//! a mutation returns is always consistent with it (spec §8
//! "File-system view consistency").

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::namespace::{FileAction, FileEvent};

#[derive(Default)]
struct PerFileSystem {
    live: HashSet<u64>,
    unlinked: HashSet<u64>,
}

struct Inner {
    by_fs: HashMap<u32, PerFileSystem>,
    /// Files with `|locations| + |unlinked_locations| == 0` (spec §4.2,
    /// consumed by the fsck engine).
    zero_replica: HashSet<u64>,
}

impl Inner {
    fn new() -> Self {
        Self { by_fs: HashMap::new(), zero_replica: HashSet::new() }
    }

    fn entry(&mut self, fs_id: u32) -> &mut PerFileSystem {
        self.by_fs.entry(fs_id).or_default()
    }

    fn has_any_location(&self, file_id: u64) -> bool {
        self.by_fs.values().any(|v| v.live.contains(&file_id) || v.unlinked.contains(&file_id))
    }

    fn recompute_zero_replica(&mut self, file_id: u64) {
        if self.has_any_location(file_id) {
            self.zero_replica.remove(&file_id);
        } else {
            self.zero_replica.insert(file_id);
        }
    }
}

/// Read-only snapshot of one storage node's replica sets. Cloning is
/// cheap: both fields are plain `HashSet<u64>` copies taken under a
/// single read lock, never mutated once handed out (spec §4.2
/// "iterators over a set are read-only snapshots").
#[derive(Debug, Clone, Default)]
pub struct FileSystemSnapshot {
    pub live: HashSet<u64>,
    pub unlinked: HashSet<u64>,
}

/// The File-System View itself. Cheaply clonable (`Arc` inside);
/// register with [`crate::namespace::NamespaceStore::register_listener`]
/// via [`FileSystemView::listener`].
pub struct FileSystemView {
    inner: RwLock<Inner>,
}

impl FileSystemView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: RwLock::new(Inner::new()) })
    }

    /// Returns a boxed closure suitable for
    /// [`crate::namespace::NamespaceStore::register_listener`]. The
    /// namespace store invokes listeners synchronously while still
    /// holding its write lock, so this must never block.
    pub fn listener(self: &Arc<Self>) -> Box<dyn Fn(FileEvent) + Send + Sync> {
        let view = Arc::clone(self);
        Box::new(move |event| view.apply(event))
    }

    /// Applies one namespace event to the replica index. `pub(crate)`
    /// rather than private so engine tests can drive the view directly
    /// without going through a registered listener closure.
    pub(crate) fn apply(&self, event: FileEvent) {
        let mut inner = self.inner.write().unwrap();
        match event.action {
            FileAction::Created => {
                inner.recompute_zero_replica(event.file_id);
            }
            FileAction::LocationAdded => {
                if let Some(fs_id) = event.new_location {
                    inner.entry(fs_id as u32).live.insert(event.file_id);
                }
                inner.recompute_zero_replica(event.file_id);
            }
            FileAction::LocationReplaced => {
                if let Some(fs_id) = event.old_location {
                    inner.entry(fs_id as u32).live.remove(&event.file_id);
                }
                if let Some(fs_id) = event.new_location {
                    inner.entry(fs_id as u32).live.insert(event.file_id);
                }
                inner.recompute_zero_replica(event.file_id);
            }
            FileAction::LocationRemoved => {
                if let Some(fs_id) = event.old_location {
                    inner.entry(fs_id as u32).live.remove(&event.file_id);
                }
                inner.recompute_zero_replica(event.file_id);
            }
            FileAction::LocationUnlinked => {
                if let Some(fs_id) = event.old_location {
                    let entry = inner.entry(fs_id as u32);
                    entry.live.remove(&event.file_id);
                    entry.unlinked.insert(event.file_id);
                }
                inner.recompute_zero_replica(event.file_id);
            }
            FileAction::Deleted => {
                let fs_ids: Vec<u32> = inner.by_fs.keys().copied().collect();
                for fs_id in fs_ids {
                    let entry = inner.entry(fs_id);
                    if entry.live.remove(&event.file_id) {
                        entry.unlinked.insert(event.file_id);
                    }
                }
                inner.recompute_zero_replica(event.file_id);
            }
        }
    }

    /// Read-only snapshot of one file-system's replica sets (spec §4.2).
    pub fn snapshot(&self, fs_id: u32) -> FileSystemSnapshot {
        let inner = self.inner.read().unwrap();
        match inner.by_fs.get(&fs_id) {
            Some(per_fs) => FileSystemSnapshot { live: per_fs.live.clone(), unlinked: per_fs.unlinked.clone() },
            None => FileSystemSnapshot::default(),
        }
    }

    /// Snapshot of the zero-replica set, consumed by the fsck engine
    /// (spec §4.2, §4.9).
    pub fn zero_replica_files(&self) -> HashSet<u64> {
        self.inner.read().unwrap().zero_replica.clone()
    }

    /// Files currently scheduled for physical deletion on `fs_id`,
    /// batched by the Deletion Dispatcher (spec §4.9, up to 1024 at a
    /// time — batching is the dispatcher's job, not this view's).
    pub fn unlinked_files(&self, fs_id: u32) -> HashSet<u64> {
        self.inner.read().unwrap().by_fs.get(&fs_id).map(|p| p.unlinked.clone()).unwrap_or_default()
    }

    /// Drops `file_id` from `fs_id`'s unlinked set once the Deletion
    /// Dispatcher confirms physical removal (spec §4.9 step for
    /// acknowledging a completed delete).
    pub fn acknowledge_deleted(&self, fs_id: u32, file_id: u64) {
        let mut inner = self.inner.write().unwrap();
        if let Some(per_fs) = inner.by_fs.get_mut(&fs_id) {
            per_fs.unlinked.remove(&file_id);
        }
        inner.recompute_zero_replica(file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_file_starts_zero_replica() {
        let view = FileSystemView::new();
        view.apply(FileEvent { action: FileAction::Created, file_id: 1, old_location: None, new_location: None });
        assert!(view.zero_replica_files().contains(&1));
    }

    #[test]
    fn location_added_clears_zero_replica_and_populates_live_set() {
        let view = FileSystemView::new();
        view.apply(FileEvent { action: FileAction::Created, file_id: 1, old_location: None, new_location: None });
        view.apply(FileEvent { action: FileAction::LocationAdded, file_id: 1, old_location: None, new_location: Some(7) });
        assert!(!view.zero_replica_files().contains(&1));
        assert!(view.snapshot(7).live.contains(&1));
    }

    #[test]
    fn unlink_moves_file_from_live_to_unlinked_per_fs() {
        let view = FileSystemView::new();
        view.apply(FileEvent { action: FileAction::LocationAdded, file_id: 1, old_location: None, new_location: Some(7) });
        view.apply(FileEvent { action: FileAction::LocationUnlinked, file_id: 1, old_location: Some(7), new_location: None });
        let snap = view.snapshot(7);
        assert!(!snap.live.contains(&1));
        assert!(snap.unlinked.contains(&1));
    }

    #[test]
    fn deleted_moves_every_live_location_to_unlinked() {
        let view = FileSystemView::new();
        view.apply(FileEvent { action: FileAction::LocationAdded, file_id: 1, old_location: None, new_location: Some(7) });
        view.apply(FileEvent { action: FileAction::LocationAdded, file_id: 1, old_location: None, new_location: Some(8) });
        view.apply(FileEvent { action: FileAction::Deleted, file_id: 1, old_location: None, new_location: None });
        assert!(view.snapshot(7).unlinked.contains(&1));
        assert!(view.snapshot(8).unlinked.contains(&1));
        assert!(!view.snapshot(7).live.contains(&1));
    }

    #[test]
    fn acknowledging_delete_clears_unlinked_and_restores_zero_replica() {
        let view = FileSystemView::new();
        view.apply(FileEvent { action: FileAction::LocationUnlinked, file_id: 1, old_location: Some(7), new_location: None });
        view.acknowledge_deleted(7, 1);
        assert!(!view.snapshot(7).unlinked.contains(&1));
        assert!(view.zero_replica_files().contains(&1));
    }
}
