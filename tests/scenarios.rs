//! End-to-end scenarios from spec.md §8 not already covered by the
//! in-crate `src/lib.rs` test module: dynamic splitting, pause/resume, and
//! a couple of boundary behaviors.
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use swarmdl::collaborators::{
    ByteSource, HttpClient, InMemoryTaskManager, TaskManager, TokioFileManager,
};
use swarmdl::config::ModeratorConfig;
use swarmdl::{ByteRange, DownloadError, Moderator, Task, TaskId, TaskState};

fn test_config() -> ModeratorConfig {
    ModeratorConfig {
        max_workers: 8,
        default_max_chunks: 8,
        default_max_parallel_connections: 4,
        min_chunk_length: 1_000_000,
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
    }
}

struct FakeHttp {
    total_len: u64,
    resumable: bool,
    frame_size: u64,
    frame_delay: Duration,
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn fetch_content_length(&self, _task: &Task) -> Result<u64, DownloadError> {
        Ok(self.total_len)
    }

    async fn get_range(
        &self,
        _task: &Task,
        range: Option<ByteRange>,
    ) -> Result<Box<dyn ByteSource>, DownloadError> {
        let (begin, end) = match range {
            Some(r) if self.resumable => (r.begin, r.end),
            _ => (0, self.total_len - 1),
        };
        Ok(Box::new(FakeByteSource {
            next: begin,
            end,
            frame_size: self.frame_size,
            frame_delay: self.frame_delay,
        }))
    }
}

struct FakeByteSource {
    next: u64,
    end: u64,
    frame_size: u64,
    frame_delay: Duration,
}

#[async_trait]
impl ByteSource for FakeByteSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        if self.next > self.end {
            return Ok(None);
        }
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }
        let remaining = self.end - self.next + 1;
        let len = remaining.min(self.frame_size) as usize;
        let bytes = Bytes::from(vec![b'x'; len]);
        self.next += len as u64;
        Ok(Some(bytes))
    }
}

async fn wait_for_state(task_manager: &InMemoryTaskManager, task_id: TaskId, expected: TaskState) {
    for _ in 0..400 {
        if let Some(task) = task_manager.get_task(task_id).await {
            if task.state == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached {expected:?}");
}

/// Scenario 4: an initial plan of 2 chunks grows via `split_large_chunk`
/// once workers start, up to the per-task connection budget.
#[tokio::test]
async fn dynamic_split_grows_chunk_count_beyond_the_initial_plan() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let http = Arc::new(FakeHttp {
        total_len: 8_000_000,
        resumable: true,
        frame_size: 32_768,
        frame_delay: Duration::from_millis(1),
    });
    let file_manager = Arc::new(TokioFileManager::new());
    let task_manager = Arc::new(InMemoryTaskManager::new());
    let mut config = test_config();
    config.min_chunk_length = 500_000; // small enough that splitting is legal
    let moderator = Moderator::new(config, http, file_manager, task_manager.clone());

    // max_chunks=2 at init, but max_parallel_connections=4 lets
    // split_large_chunk grow this task to 4 live chunk workers.
    let task = Task::new_request("https://example.com/f", dest.to_str().unwrap(), 2, 4)
        .with_resumable(true);
    let inserted = moderator.add_task(task).await;
    moderator.start();

    let mut max_chunks_seen = 0usize;
    for _ in 0..400 {
        let chunks = task_manager.chunks_of(inserted.id).await;
        max_chunks_seen = max_chunks_seen.max(chunks.len());
        if let Some(task) = task_manager.get_task(inserted.id).await {
            if task.state.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    wait_for_state(&task_manager, inserted.id, TaskState::Finished).await;
    assert!(
        max_chunks_seen > 2,
        "expected splitting to grow beyond the initial 2 chunks, saw {max_chunks_seen}"
    );

    let contents = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(contents.len(), 8_000_000);
    moderator.release().await;
}

/// Scenario 6: pausing mid-download freezes progress; starting again
/// resumes from the persisted offset and still produces a bit-exact file.
#[tokio::test]
async fn pause_then_resume_produces_the_same_file_as_an_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let http = Arc::new(FakeHttp {
        total_len: 2_000_000,
        resumable: true,
        frame_size: 50_000,
        frame_delay: Duration::from_millis(15),
    });
    let file_manager = Arc::new(TokioFileManager::new());
    let task_manager = Arc::new(InMemoryTaskManager::new());
    let config = test_config();
    let moderator = Moderator::new(config, http, file_manager, task_manager.clone());

    let task = Task::new_request("https://example.com/f", dest.to_str().unwrap(), 1, 1)
        .with_resumable(true);
    let inserted = moderator.add_task(task).await;
    moderator.start();

    wait_for_state(&task_manager, inserted.id, TaskState::Waiting).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    moderator.pause();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(moderator.get_speed(), 0);

    let chunks_paused = task_manager.chunks_of(inserted.id).await;
    let downloaded_at_pause: u64 = chunks_paused.iter().map(|c| c.downloaded).sum();
    assert!(downloaded_at_pause > 0, "expected some progress before pause");
    assert!(
        downloaded_at_pause < 2_000_000,
        "expected the download to still be in flight at pause time"
    );

    // downloaded counters stay put while paused.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let chunks_still_paused = task_manager.chunks_of(inserted.id).await;
    let downloaded_still: u64 = chunks_still_paused.iter().map(|c| c.downloaded).sum();
    assert_eq!(downloaded_at_pause, downloaded_still);

    moderator.start();
    wait_for_state(&task_manager, inserted.id, TaskState::Finished).await;

    let contents = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(contents.len(), 2_000_000);
    assert!(contents.iter().all(|&b| b == b'x'));
    moderator.release().await;
}

/// spec.md §8 boundary: `length < 2 * MIN_CHUNK_LENGTH` creates exactly one
/// chunk even though the task is resumable and allows more.
#[tokio::test]
async fn small_resumable_file_below_threshold_gets_one_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let http = Arc::new(FakeHttp {
        total_len: 1_500_000, // < 2 * 1_000_000
        resumable: true,
        frame_size: 100_000,
        frame_delay: Duration::from_millis(0),
    });
    let file_manager = Arc::new(TokioFileManager::new());
    let task_manager = Arc::new(InMemoryTaskManager::new());
    let moderator = Moderator::new(test_config(), http, file_manager, task_manager.clone());

    let task = Task::new_request("https://example.com/f", dest.to_str().unwrap(), 8, 4)
        .with_resumable(true);
    let inserted = moderator.add_task(task).await;
    moderator.start();

    wait_for_state(&task_manager, inserted.id, TaskState::Waiting).await;
    let chunks = task_manager.chunks_of(inserted.id).await;
    assert_eq!(chunks.len(), 1);

    wait_for_state(&task_manager, inserted.id, TaskState::Finished).await;
    moderator.release().await;
}

/// spec.md §8 boundary: a non-resumable task always gets exactly one
/// chunk, regardless of `max_chunks`.
#[tokio::test]
async fn non_resumable_task_gets_exactly_one_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.bin");

    let http = Arc::new(FakeHttp {
        total_len: 20_000_000,
        resumable: false,
        frame_size: 200_000,
        frame_delay: Duration::from_millis(0),
    });
    let file_manager = Arc::new(TokioFileManager::new());
    let task_manager = Arc::new(InMemoryTaskManager::new());
    let moderator = Moderator::new(test_config(), http, file_manager, task_manager.clone());

    // resumable defaults to false — not called with `.with_resumable(true)`.
    let task = Task::new_request("https://example.com/f", dest.to_str().unwrap(), 8, 4);
    let inserted = moderator.add_task(task).await;
    moderator.start();

    wait_for_state(&task_manager, inserted.id, TaskState::Waiting).await;
    let chunks = task_manager.chunks_of(inserted.id).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].range.is_none());

    wait_for_state(&task_manager, inserted.id, TaskState::Finished).await;
    moderator.release().await;
}

/// `set_max_workers(n)` called twice with the same `n` should not disturb
/// an already-running task (no-op per spec.md §8).
#[tokio::test]
async fn set_max_workers_same_value_twice_is_a_no_op() {
    let http = Arc::new(FakeHttp {
        total_len: 10,
        resumable: false,
        frame_size: 10,
        frame_delay: Duration::from_millis(0),
    });
    let file_manager = Arc::new(TokioFileManager::new());
    let task_manager = Arc::new(InMemoryTaskManager::new());
    let moderator = Moderator::new(test_config(), http, file_manager, task_manager);

    assert!(moderator.set_max_workers(4).is_ok());
    assert_eq!(moderator.get_max_workers(), 4);
    assert!(moderator.set_max_workers(4).is_ok());
    assert_eq!(moderator.get_max_workers(), 4);
    moderator.release().await;
}
