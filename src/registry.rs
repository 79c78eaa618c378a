//! Worker Registry (spec.md §3): a mapping keyed by stable tag, mutated
//! only on the moderator actor.
use crate::model::{ChunkId, TaskId};
use crate::workers::chunk_worker::ChunkWorkerHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// `chunk:<id>` or `merge:<task id>` — the Worker Registry's key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKey {
    Chunk(ChunkId),
    Merge(TaskId),
}

/// A live worker's join handle plus its cooperative interrupt flag.
pub struct WorkerEntry {
    pub join: JoinHandle<()>,
    pub interrupt: Arc<AtomicBool>,
    /// Present only for chunk workers; used by `split_large_chunk` to read
    /// `remaining_bytes()` and to narrow the live range.
    pub chunk: Option<ChunkWorkerHandle>,
}

impl WorkerEntry {
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }
}

/// Registry of every worker currently live, keyed by [`WorkerKey`].
/// Invariant: at most one handle per key; mutated only on the moderator
/// actor (spec.md §3).
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKey, WorkerEntry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, key: &WorkerKey) -> bool {
        self.workers.contains_key(key)
    }

    pub fn insert(&mut self, key: WorkerKey, entry: WorkerEntry) {
        self.workers.insert(key, entry);
    }

    pub fn remove(&mut self, key: &WorkerKey) -> Option<WorkerEntry> {
        self.workers.remove(key)
    }

    /// Chunk-worker handles belonging to one task, snapshotted into a
    /// `Vec` before the caller sorts/iterates — spec.md §9's answer to the
    /// "mutable map read during split" open question.
    pub fn chunk_workers_of(&self, task_id: TaskId) -> Vec<(ChunkId, ChunkWorkerHandle)> {
        self.workers
            .iter()
            .filter_map(|(key, entry)| match key {
                WorkerKey::Chunk(chunk_id) => entry
                    .chunk
                    .clone()
                    .filter(|h| h.task_id == task_id)
                    .map(|h| (*chunk_id, h)),
                WorkerKey::Merge(_) => None,
            })
            .collect()
    }

    /// The owning task of a live chunk worker, looked up by chunk id alone
    /// — used when a worker's terminal event only carries its own chunk id
    /// (the chunk worker has no back-reference to scheduler state, per
    /// spec.md §9).
    pub fn task_of_chunk(&self, chunk_id: ChunkId) -> Option<TaskId> {
        self.workers
            .get(&WorkerKey::Chunk(chunk_id))
            .and_then(|entry| entry.chunk.as_ref())
            .map(|h| h.task_id)
    }

    /// All entries belonging to one task (chunk workers and its merge
    /// worker, if any) — used by cancellation cleanup.
    pub fn keys_of_task(&self, task_id: TaskId) -> Vec<WorkerKey> {
        self.workers
            .iter()
            .filter(|(key, entry)| match key {
                WorkerKey::Chunk(_) => entry.chunk.as_ref().map(|h| h.task_id) == Some(task_id),
                WorkerKey::Merge(id) => *id == task_id,
            })
            .map(|(key, _)| *key)
            .collect()
    }

    /// Interrupt and drop every entry, returning their join handles so the
    /// caller can await them (used by `pause()` and cancellation cleanup).
    pub fn drain_interrupting(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.workers.len());
        for (_, entry) in self.workers.drain() {
            entry.interrupt();
            handles.push(entry.join);
        }
        handles
    }
}
