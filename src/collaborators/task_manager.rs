//! Task Manager collaborator (spec.md §6).
//!
//! Persistent storage of Task/Chunk records is explicitly out of scope
//! (spec.md §1); this crate ships only the concurrency-safe in-memory
//! implementation the Moderator and Chunk Workers need to actually run
//! against, grounded in the teacher's `Mutex`-guarded `HashMap`s in
//! `commands::download_control::DownloadManager`.
use crate::model::{Chunk, Task, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// CRUD for Task and Chunk records with stable ids (spec.md §6). Must be
/// safe for concurrent access by the Moderator and by Chunk Workers, which
/// only ever touch their own chunk's `downloaded`/`finished` fields.
#[async_trait]
pub trait TaskManager: Send + Sync {
    async fn insert_task(&self, task: Task) -> Task;
    async fn get_task(&self, id: TaskId) -> Option<Task>;
    async fn update_task(&self, task: Task);
    /// All tasks whose state is not FINISHED/FAILED, in insertion order.
    async fn undone_tasks(&self) -> Vec<Task>;
    async fn chunks_of(&self, task_id: TaskId) -> Vec<Chunk>;
    async fn insert_chunk(&self, chunk: Chunk) -> Chunk;
    async fn update_chunk(&self, chunk: Chunk);
    async fn remove_chunks_of(&self, task_id: TaskId);
}

#[derive(Default)]
struct Tables {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    chunks: HashMap<TaskId, Vec<Chunk>>,
}

/// In-memory `TaskManager`. Ids are assigned from monotonic counters, not
/// reused even after a task/chunk is removed.
pub struct InMemoryTaskManager {
    tables: RwLock<Tables>,
    next_task_id: AtomicU64,
    next_chunk_id: AtomicU64,
}

impl InMemoryTaskManager {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_task_id: AtomicU64::new(1),
            next_chunk_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskManager for InMemoryTaskManager {
    async fn insert_task(&self, mut task: Task) -> Task {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        task.id = id;
        let mut tables = self.tables.write().await;
        tables.order.push(id);
        tables.tasks.insert(id, task.clone());
        task
    }

    async fn get_task(&self, id: TaskId) -> Option<Task> {
        self.tables.read().await.tasks.get(&id).cloned()
    }

    async fn update_task(&self, task: Task) {
        self.tables.write().await.tasks.insert(task.id, task);
    }

    async fn undone_tasks(&self) -> Vec<Task> {
        let tables = self.tables.read().await;
        tables
            .order
            .iter()
            .filter_map(|id| tables.tasks.get(id))
            .filter(|t| !t.state.is_terminal())
            .cloned()
            .collect()
    }

    async fn chunks_of(&self, task_id: TaskId) -> Vec<Chunk> {
        self.tables
            .read()
            .await
            .chunks
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn insert_chunk(&self, mut chunk: Chunk) -> Chunk {
        let id = self.next_chunk_id.fetch_add(1, Ordering::Relaxed);
        chunk.id = id;
        let mut tables = self.tables.write().await;
        tables.chunks.entry(chunk.task_id).or_default().push(chunk.clone());
        chunk
    }

    async fn update_chunk(&self, chunk: Chunk) {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .chunks
            .get_mut(&chunk.task_id)
            .and_then(|chunks| chunks.iter_mut().find(|c| c.id == chunk.id))
        {
            *existing = chunk;
        }
    }

    async fn remove_chunks_of(&self, task_id: TaskId) {
        self.tables.write().await.chunks.remove(&task_id);
    }
}

/// Helper used by `init_task`/tests, not part of the trait: every chunk
/// belonging to `task_id` is finished (spec.md §4.1 step c).
pub async fn all_chunks_finished(manager: &dyn TaskManager, task_id: TaskId) -> bool {
    let chunks = manager.chunks_of(task_id).await;
    !chunks.is_empty() && chunks.iter().all(|c| c.is_finished())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ByteRange;

    fn sample_task() -> Task {
        Task::new_request("https://example.com/a", "/tmp/a", 4, 4)
    }

    #[tokio::test]
    async fn inserted_tasks_get_stable_increasing_ids() {
        let manager = InMemoryTaskManager::new();
        let a = manager.insert_task(sample_task()).await;
        let b = manager.insert_task(sample_task()).await;
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn undone_tasks_excludes_terminal_states() {
        let manager = InMemoryTaskManager::new();
        let mut a = manager.insert_task(sample_task()).await;
        let b = manager.insert_task(sample_task()).await;
        a.state = TaskState::Finished;
        manager.update_task(a).await;

        let undone = manager.undone_tasks().await;
        assert_eq!(undone.len(), 1);
        assert_eq!(undone[0].id, b.id);
    }

    #[tokio::test]
    async fn chunk_updates_only_touch_the_matching_chunk() {
        let manager = InMemoryTaskManager::new();
        let task = manager.insert_task(sample_task()).await;
        let c1 = manager
            .insert_chunk(Chunk::new_request(task.id, Some(ByteRange::new(0, 9))))
            .await;
        let mut updated = c1.clone();
        updated.downloaded = 10;
        updated.finished = true;
        manager.update_chunk(updated).await;

        let chunks = manager.chunks_of(task.id).await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_finished());
    }

    #[tokio::test]
    async fn remove_chunks_of_clears_only_that_task() {
        let manager = InMemoryTaskManager::new();
        let t1 = manager.insert_task(sample_task()).await;
        let t2 = manager.insert_task(sample_task()).await;
        manager
            .insert_chunk(Chunk::new_request(t1.id, Some(ByteRange::new(0, 9))))
            .await;
        manager
            .insert_chunk(Chunk::new_request(t2.id, Some(ByteRange::new(0, 9))))
            .await;

        manager.remove_chunks_of(t1.id).await;

        assert!(manager.chunks_of(t1.id).await.is_empty());
        assert_eq!(manager.chunks_of(t2.id).await.len(), 1);
    }
}
