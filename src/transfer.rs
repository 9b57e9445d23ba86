//! Transfer jobs and the per-file-system bounded queues that carry
//! them (spec §3 "Transfer Job", "File System ... three bounded
//! transfer queues (drain, balance, extern)").
//!
//! A job is produced by the MGM (a background engine) and consumed by
//! the target FST; once pushed, the queue owns it until popped (spec
//! §5 "a pushed job is owned by the queue until consumed"). Deletion
//! messages ride the `Extern` queue — the spec names `drain`,
//! `balance`, `extern` and lists deletion under the background
//! engines rather than under the per-fs queue kinds, so `Extern` is
//! the closest fit; recorded in `DESIGN.md`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crossbeam_queue::ArrayQueue;

use crate::capability::Capability;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Drain,
    Balance,
    Extern,
}

/// A pair of signed capabilities (read side + write side) plus
/// source/target endpoints (spec §3 "Transfer Job"). The read side is
/// absent for a plain deletion, which only ever needs a delete
/// capability against the target.
pub struct TransferJob {
    pub file_id: u64,
    pub source_fs_id: Option<u32>,
    pub target_fs_id: u32,
    pub read_capability: Option<Capability>,
    pub write_capability: Capability,
}

/// Bounded, per-(file-system, kind) FIFO queues.
pub struct TransferQueues {
    capacity: usize,
    queues: RwLock<HashMap<(u32, QueueKind), Arc<ArrayQueue<TransferJob>>>>,
}

impl TransferQueues {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, queues: RwLock::new(HashMap::new()) }
    }

    fn queue_for(&self, fs_id: u32, kind: QueueKind) -> Arc<ArrayQueue<TransferJob>> {
        if let Some(queue) = self.queues.read().unwrap().get(&(fs_id, kind)) {
            return queue.clone();
        }
        let mut queues = self.queues.write().unwrap();
        queues.entry((fs_id, kind)).or_insert_with(|| Arc::new(ArrayQueue::new(self.capacity))).clone()
    }

    /// Pushes `job` onto `fs_id`'s `kind` queue; returns the job back
    /// on overflow so the caller (a background engine) can retry on
    /// its next tick rather than block.
    pub fn push(&self, fs_id: u32, kind: QueueKind, job: TransferJob) -> Result<(), TransferJob> {
        self.queue_for(fs_id, kind).push(job)
    }

    /// Pops the next job for the target FST to consume.
    pub fn pop(&self, fs_id: u32, kind: QueueKind) -> Option<TransferJob> {
        self.queue_for(fs_id, kind).pop()
    }

    pub fn len(&self, fs_id: u32, kind: QueueKind) -> usize {
        self.queue_for(fs_id, kind).len()
    }

    pub fn is_empty(&self, fs_id: u32, kind: QueueKind) -> bool {
        self.len(fs_id, kind) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AccessMode, CapabilityBindings, CapabilityEngine, KeyStore};
    use std::time::Duration;

    fn cap() -> Capability {
        let keys = KeyStore::new_with_random_key();
        let engine = CapabilityEngine::new(keys, Duration::from_secs(60));
        engine
            .mint(CapabilityBindings {
                access: AccessMode::Delete,
                layout_id: 0,
                container_id: 0,
                ruid: 0,
                rgid: 0,
                uid: 0,
                gid: 0,
                path: "/a/f".into(),
                manager: "mgm1:1094".into(),
                file_id: 7,
                booking_size: 0,
                fs_id: 1,
                local_prefix: "/data/1/".into(),
                replicas: vec![],
            })
            .unwrap()
    }

    #[test]
    fn push_then_pop_preserves_fifo_order() {
        let queues = TransferQueues::new(4);
        queues.push(1, QueueKind::Extern, TransferJob { file_id: 1, source_fs_id: None, target_fs_id: 1, read_capability: None, write_capability: cap() }).unwrap();
        queues.push(1, QueueKind::Extern, TransferJob { file_id: 2, source_fs_id: None, target_fs_id: 1, read_capability: None, write_capability: cap() }).unwrap();
        let first = queues.pop(1, QueueKind::Extern).unwrap();
        assert_eq!(first.file_id, 1);
    }

    #[test]
    fn queue_kinds_are_independent_per_fs() {
        let queues = TransferQueues::new(4);
        queues.push(1, QueueKind::Drain, TransferJob { file_id: 1, source_fs_id: Some(2), target_fs_id: 1, read_capability: None, write_capability: cap() }).unwrap();
        assert!(queues.is_empty(1, QueueKind::Balance));
        assert_eq!(queues.len(1, QueueKind::Drain), 1);
    }

    #[test]
    fn push_fails_once_capacity_is_reached() {
        let queues = TransferQueues::new(1);
        queues.push(1, QueueKind::Extern, TransferJob { file_id: 1, source_fs_id: None, target_fs_id: 1, read_capability: None, write_capability: cap() }).unwrap();
        let overflow = queues.push(1, QueueKind::Extern, TransferJob { file_id: 2, source_fs_id: None, target_fs_id: 1, read_capability: None, write_capability: cap() });
        assert!(overflow.is_err());
    }
}
