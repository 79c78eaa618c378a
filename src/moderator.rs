//! The Moderator (spec.md §4.1): the sole scheduler. Owns the Worker
//! Registry and all task-state transitions, realized as a single `tokio`
//! task draining a command queue (spec.md §9: "model as a task with an
//! incoming command/event channel").
use crate::collaborators::{FileManager, HttpClient, TaskManager};
use crate::config::ModeratorConfig;
use crate::dispatch::{EventDispatcher, Executor, Listener, ListenerId};
use crate::error::DownloadError;
use crate::events::DownloadEvent;
use crate::model::{ByteRange, Chunk, ChunkId, Task, TaskId, TaskState};
use crate::registry::{WorkerEntry, WorkerKey, WorkerRegistry};
use crate::speed::SpeedMeter;
use crate::workers::chunk_worker::{self, ChunkEventSink, ChunkWorkerHandle};
use crate::workers::merge_worker::{self, MergeEventSink};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Jobs the moderator actor consumes. Every public API call that isn't
/// answered directly (`add_task`'s/`cancel_task`'s synchronous parts) is
/// forwarded here (spec.md §4.1).
enum Command {
    SpawnPass,
    /// Interrupt/join every chunk worker of `task_id`, delete their spill
    /// files, and record `message` on the task if it isn't already
    /// terminal (spec.md §4.6 "cancel_task_internal").
    Cleanup { task_id: TaskId, message: String },
    Pause,
    Shutdown(oneshot::Sender<()>),
    ChunkFinished { chunk_id: ChunkId },
    ChunkError { chunk_id: ChunkId, reason: String },
    ChunkInterrupted { chunk_id: ChunkId },
    MergeFinished { task_id: TaskId },
    MergeError { task_id: TaskId, reason: String },
    MergeInterrupted { task_id: TaskId },
}

/// The `running`/`max_workers`/`released` triple, guarded by one lock per
/// spec.md §5 ("a small internal lock guards the running flag, the
/// max_workers field, and the combined visibility...").
struct SharedState {
    running: bool,
    max_workers: usize,
    released: bool,
}

/// Handle the embedding application holds and calls the public API on
/// (spec.md SPEC_FULL §2 "Moderator handle"). Cheap to clone; every clone
/// talks to the same actor.
#[derive(Clone)]
pub struct Moderator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<SharedState>>,
    task_manager: Arc<dyn TaskManager>,
    dispatcher: Arc<EventDispatcher>,
    speed: Arc<SpeedMeter>,
}

impl Moderator {
    /// Construct a Moderator and spawn its actor task onto the ambient
    /// `tokio` runtime.
    pub fn new(
        config: ModeratorConfig,
        http: Arc<dyn HttpClient>,
        file_manager: Arc<dyn FileManager>,
        task_manager: Arc<dyn TaskManager>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SharedState {
            running: false,
            max_workers: config.max_workers,
            released: false,
        }));
        let dispatcher = Arc::new(EventDispatcher::new());
        let speed = Arc::new(SpeedMeter::new());

        let actor = Actor {
            registry: WorkerRegistry::new(),
            rx: cmd_rx,
            cmd_tx: cmd_tx.clone(),
            config,
            http,
            file_manager,
            task_manager: task_manager.clone(),
            dispatcher: dispatcher.clone(),
            speed: speed.clone(),
            state: state.clone(),
        };
        tokio::spawn(actor.run());
        tokio::spawn(sample_speed_while_alive(
            speed.clone(),
            dispatcher.clone(),
            state.clone(),
        ));

        Self {
            cmd_tx,
            state,
            task_manager,
            dispatcher,
            speed,
        }
    }

    fn send(&self, cmd: Command) {
        // The actor task only ever stops after `release()`; a send past
        // that point is a deliberate no-op rather than a panic.
        let _ = self.cmd_tx.send(cmd);
    }

    fn enqueue_spawn_pass_if_running(&self) {
        if self.state.lock().unwrap().running {
            self.send(Command::SpawnPass);
        }
    }

    /// Insert into the Task Manager directly (spec.md §4.1: "*sync
    /// insert*"), then enqueue a spawn-pass if running.
    pub async fn add_task(&self, task: Task) -> Task {
        let inserted = self.task_manager.insert_task(task).await;
        self.enqueue_spawn_pass_if_running();
        inserted
    }

    /// Mark the task FAILED with reason "Cancelled" synchronously, then
    /// enqueue the asynchronous cleanup job (spec.md §4.1, §5).
    pub async fn cancel_task(&self, id: TaskId) -> Result<(), DownloadError> {
        let mut task = self
            .task_manager
            .get_task(id)
            .await
            .ok_or(DownloadError::TaskNotFound(id))?;

        // Idempotent: cancelling an already-terminal task is a no-op past
        // the first call (spec.md §8).
        if !task.state.is_terminal() {
            task.state = TaskState::Failed;
            task.message = Some("Cancelled".to_string());
            self.task_manager.update_task(task.clone()).await;
            self.dispatcher.dispatch(DownloadEvent::TaskStateChanged {
                task_id: id,
                state: TaskState::Failed,
                message: task.message.clone(),
            });
        }

        self.send(Command::Cleanup {
            task_id: id,
            message: "Cancelled".to_string(),
        });
        Ok(())
    }

    pub fn start(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.released {
                return;
            }
            state.running = true;
        }
        self.speed.resume();
        self.send(Command::SpawnPass);
    }

    pub fn pause(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.released {
                return;
            }
            state.running = false;
        }
        self.speed.pause();
        self.send(Command::Pause);
    }

    /// Pause, drain pending jobs to completion, and release the actor's
    /// collaborators. Terminal: subsequent calls have no effect (spec.md §5).
    pub async fn release(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.released {
                return;
            }
            state.running = false;
        }
        self.speed.pause();

        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Command::Shutdown(ack_tx));
        let _ = ack_rx.await;

        self.state.lock().unwrap().released = true;
    }

    /// Reject negative values as an argument error; `0` is accepted and
    /// leaves every task WAITING indefinitely (spec.md §9's resolved open
    /// question).
    pub fn set_max_workers(&self, n: i64) -> Result<(), DownloadError> {
        if n < 0 {
            return Err(DownloadError::ArgumentError(
                "max_workers must be non-negative".to_string(),
            ));
        }
        let n = n as usize;
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed = state.max_workers != n;
            state.max_workers = n;
            changed
        };
        if changed {
            self.enqueue_spawn_pass_if_running();
        }
        Ok(())
    }

    pub fn get_max_workers(&self) -> usize {
        self.state.lock().unwrap().max_workers
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    pub fn get_speed(&self) -> u64 {
        self.speed.bytes_per_second()
    }

    pub fn register_listener(
        &self,
        listener: Arc<dyn Listener>,
        executor: Arc<dyn Executor>,
    ) -> ListenerId {
        self.dispatcher.register(listener, executor)
    }

    pub fn unregister_listener(&self, id: ListenerId) {
        self.dispatcher.unregister(id);
    }

    pub fn clear_all_listeners(&self) {
        self.dispatcher.clear();
    }
}

/// Fans out `get_speed()` as a [`DownloadEvent::SpeedSample`] once a
/// second, for listeners wanting live aggregate throughput without
/// polling `Moderator::get_speed` themselves (spec.md §1: "live aggregate
/// throughput measurement"). Exits once the Moderator is released.
async fn sample_speed_while_alive(
    speed: Arc<SpeedMeter>,
    dispatcher: Arc<EventDispatcher>,
    state: Arc<Mutex<SharedState>>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        interval.tick().await;
        if state.lock().unwrap().released {
            return;
        }
        dispatcher.dispatch(DownloadEvent::SpeedSample {
            bytes_per_second: speed.bytes_per_second(),
        });
    }
}

/// Sink passed into each spawned Chunk Worker; forwards its one terminal
/// event back to the actor as a [`Command`] (spec.md §9: "avoid cycles by
/// passing only a narrow callback sink... the worker never reaches back
/// into scheduler state").
struct ModeratorChunkSink {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ChunkEventSink for ModeratorChunkSink {
    fn on_finished(&self, chunk_id: ChunkId) {
        // The owning task is recovered on the actor side from the registry
        // entry that's about to be removed; the sink never reaches into
        // scheduler state (spec.md §9).
        let _ = self.cmd_tx.send(Command::ChunkFinished { chunk_id });
    }
    fn on_error(&self, chunk_id: ChunkId, reason: String) {
        let _ = self.cmd_tx.send(Command::ChunkError { chunk_id, reason });
    }
    fn on_interrupted(&self, chunk_id: ChunkId) {
        let _ = self.cmd_tx.send(Command::ChunkInterrupted { chunk_id });
    }
}

struct ModeratorMergeSink {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl MergeEventSink for ModeratorMergeSink {
    fn on_finished(&self, task_id: TaskId) {
        let _ = self.cmd_tx.send(Command::MergeFinished { task_id });
    }
    fn on_error(&self, task_id: TaskId, reason: String) {
        let _ = self.cmd_tx.send(Command::MergeError { task_id, reason });
    }
    fn on_interrupted(&self, task_id: TaskId) {
        let _ = self.cmd_tx.send(Command::MergeInterrupted { task_id });
    }
}

/// The moderator actor: the single task that owns the Worker Registry and
/// drains [`Command`]s. Everything in here runs serialized, one command at
/// a time (spec.md §4.1, §5).
struct Actor {
    registry: WorkerRegistry,
    rx: mpsc::UnboundedReceiver<Command>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    config: ModeratorConfig,
    http: Arc<dyn HttpClient>,
    file_manager: Arc<dyn FileManager>,
    task_manager: Arc<dyn TaskManager>,
    dispatcher: Arc<EventDispatcher>,
    speed: Arc<SpeedMeter>,
    state: Arc<Mutex<SharedState>>,
}

impl Actor {
    fn running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    fn max_workers(&self) -> usize {
        self.state.lock().unwrap().max_workers
    }

    async fn run(mut self) {
        let span = tracing::info_span!("moderator", name = crate::config::MODERATOR_SPAN_NAME);
        let _enter = span.enter();
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::SpawnPass => self.spawn_pass().await,
                Command::Cleanup { task_id, message } => {
                    self.cancel_task_internal(task_id, message).await;
                    if self.running() {
                        self.spawn_pass().await;
                    }
                }
                Command::Pause => self.drain_registry().await,
                Command::Shutdown(ack) => {
                    self.drain_registry().await;
                    let _ = ack.send(());
                    break;
                }
                Command::ChunkFinished { chunk_id } => {
                    self.registry.remove(&WorkerKey::Chunk(chunk_id));
                    if self.running() {
                        self.spawn_pass().await;
                    }
                }
                Command::ChunkError { chunk_id, reason } => {
                    if let Some(task_id) = self.registry.task_of_chunk(chunk_id) {
                        self.cancel_task_internal(task_id, reason).await;
                        if self.running() {
                            self.spawn_pass().await;
                        }
                    }
                }
                Command::ChunkInterrupted { chunk_id } => {
                    self.registry.remove(&WorkerKey::Chunk(chunk_id));
                }
                Command::MergeFinished { task_id } => {
                    self.registry.remove(&WorkerKey::Merge(task_id));
                    self.finish_merge(task_id).await;
                    if self.running() {
                        self.spawn_pass().await;
                    }
                }
                Command::MergeError { task_id, reason } => {
                    self.registry.remove(&WorkerKey::Merge(task_id));
                    self.cancel_task_internal(task_id, reason).await;
                    if self.running() {
                        self.spawn_pass().await;
                    }
                }
                Command::MergeInterrupted { task_id } => {
                    self.registry.remove(&WorkerKey::Merge(task_id));
                }
            }
        }
    }

    async fn drain_registry(&mut self) {
        let handles = self.registry.drain_interrupting();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// One traversal of undone tasks: init, split, dispatch workers up to
    /// budget (spec.md §4.1). No-ops if not running.
    async fn spawn_pass(&mut self) {
        if !self.running() {
            return;
        }
        let tasks = self.task_manager.undone_tasks().await;
        for mut task in tasks {
            if !self.running() {
                return;
            }

            if task.state == TaskState::Idle {
                match self.init_task(&mut task).await {
                    Ok(()) => {}
                    Err(e) => {
                        task.state = TaskState::Failed;
                        task.message = Some(e.to_string());
                        self.task_manager.update_task(task.clone()).await;
                        self.dispatcher.dispatch(DownloadEvent::TaskStateChanged {
                            task_id: task.id,
                            state: TaskState::Failed,
                            message: task.message.clone(),
                        });
                        continue;
                    }
                }
            }

            if self.registry.len() >= self.max_workers() {
                continue;
            }

            let chunks = self.task_manager.chunks_of(task.id).await;
            let all_finished = !chunks.is_empty() && chunks.iter().all(|c| c.is_finished());
            if all_finished {
                if task.state != TaskState::Merging {
                    task.state = TaskState::Merging;
                    self.task_manager.update_task(task.clone()).await;
                    self.dispatcher.dispatch(DownloadEvent::TaskStateChanged {
                        task_id: task.id,
                        state: TaskState::Merging,
                        message: None,
                    });
                }
                if !self.registry.contains(&WorkerKey::Merge(task.id)) {
                    self.spawn_merge_worker(&task, chunks).await;
                }
            } else {
                for chunk in &chunks {
                    if self.registry.len() >= self.max_workers() {
                        break;
                    }
                    if chunk.is_finished() {
                        continue;
                    }
                    let key = WorkerKey::Chunk(chunk.id);
                    if self.registry.contains(&key) {
                        continue;
                    }
                    self.spawn_chunk_worker(&task, chunk).await;
                }
                self.split_large_chunk(&task).await;
            }
        }
    }

    /// spec.md §4.2.
    async fn init_task(&mut self, task: &mut Task) -> Result<(), DownloadError> {
        self.task_manager.remove_chunks_of(task.id).await;

        if task.length.is_none() {
            let length = self.http.fetch_content_length(task).await?;
            task.length = Some(length);
        }
        let length = task.length.expect("just populated above");

        if !task.resumable {
            let chunk = Chunk::new_request(task.id, None);
            self.task_manager.insert_chunk(chunk).await;
        } else {
            let k = choose_chunk_count(length, task.max_chunks, self.config.min_chunk_length);
            for range in partition_ranges(length, k) {
                let chunk = Chunk::new_request(task.id, Some(range));
                self.task_manager.insert_chunk(chunk).await;
            }
        }

        task.state = TaskState::Waiting;
        self.task_manager.update_task(task.clone()).await;
        self.dispatcher.dispatch(DownloadEvent::TaskStateChanged {
            task_id: task.id,
            state: TaskState::Waiting,
            message: None,
        });
        Ok(())
    }

    async fn spawn_chunk_worker(&mut self, task: &Task, chunk: &Chunk) {
        let path = self.file_manager.chunk_file_path(task, chunk.id);
        let handle = ChunkWorkerHandle::new(
            chunk.id,
            task.id,
            chunk.range,
            chunk.downloaded,
            self.config.min_chunk_length,
        );
        let interrupt = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(ModeratorChunkSink {
            cmd_tx: self.cmd_tx.clone(),
        });

        let join = tokio::spawn(chunk_worker::run(
            chunk.id,
            task.clone(),
            handle.clone(),
            path,
            self.http.clone(),
            self.file_manager.clone(),
            self.task_manager.clone(),
            self.speed.clone(),
            interrupt.clone(),
            sink,
        ));

        self.registry.insert(
            WorkerKey::Chunk(chunk.id),
            WorkerEntry {
                join,
                interrupt,
                chunk: Some(handle),
            },
        );
    }

    async fn spawn_merge_worker(&mut self, task: &Task, chunks: Vec<Chunk>) {
        let dest = PathBuf::from(&task.destination);
        let paths: Vec<PathBuf> = chunks
            .iter()
            .map(|c| self.file_manager.chunk_file_path(task, c.id))
            .collect();
        let interrupt = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(ModeratorMergeSink {
            cmd_tx: self.cmd_tx.clone(),
        });

        let join = tokio::spawn(merge_worker::run(
            task.id,
            dest,
            chunks,
            paths,
            self.file_manager.clone(),
            interrupt.clone(),
            sink,
        ));

        self.registry.insert(
            WorkerKey::Merge(task.id),
            WorkerEntry {
                join,
                interrupt,
                chunk: None,
            },
        );
    }

    /// spec.md §4.4: split the largest live chunk of `task` repeatedly,
    /// bounded by the remaining global and per-task worker budget.
    async fn split_large_chunk(&mut self, task: &Task) {
        if !task.resumable {
            return;
        }
        let workers = self.registry.chunk_workers_of(task.id);
        let total_workers = self.registry.len() as i64;
        let max_workers = self.max_workers() as i64;
        let budget_global = max_workers - total_workers;
        let budget_task = task.max_parallel_connections as i64 - workers.len() as i64;
        let mut budget = budget_global.min(budget_task);
        if budget <= 0 {
            return;
        }

        let mut snapshot = workers;
        snapshot.sort_by(|a, b| {
            let ra = a.1.remaining_bytes().unwrap_or(0);
            let rb = b.1.remaining_bytes().unwrap_or(0);
            rb.cmp(&ra)
        });

        for (_chunk_id, handle) in snapshot {
            if budget <= 0 {
                break;
            }
            match handle.split_chunk() {
                Some(new_range) => {
                    let chunk = Chunk::new_request(task.id, Some(new_range));
                    let inserted = self.task_manager.insert_chunk(chunk).await;
                    self.spawn_chunk_worker(task, &inserted).await;
                    budget -= 1;
                }
                None => break,
            }
        }
    }

    /// spec.md §4.6 "cancel_task_internal": mark FAILED if not already
    /// terminal, then interrupt/join every registered worker of the task
    /// and delete its chunk spill files.
    async fn cancel_task_internal(&mut self, task_id: TaskId, message: String) {
        let Some(mut task) = self.task_manager.get_task(task_id).await else {
            return;
        };

        if !task.state.is_terminal() {
            task.state = TaskState::Failed;
            task.message = Some(message.clone());
            self.task_manager.update_task(task.clone()).await;
            self.dispatcher.dispatch(DownloadEvent::TaskStateChanged {
                task_id,
                state: TaskState::Failed,
                message: Some(message),
            });
        }

        for key in self.registry.keys_of_task(task_id) {
            if let Some(entry) = self.registry.remove(&key) {
                entry.interrupt();
                let _ = entry.join.await;
            }
        }

        let chunks = self.task_manager.chunks_of(task_id).await;
        for chunk in &chunks {
            let path = self.file_manager.chunk_file_path(&task, chunk.id);
            let _ = self.file_manager.delete(&path).await;
        }
        self.task_manager.remove_chunks_of(task_id).await;
    }

    /// spec.md §4.6 `onMergeFileFinished`: delete every chunk spill file,
    /// then transition the task to FINISHED.
    async fn finish_merge(&mut self, task_id: TaskId) {
        let Some(mut task) = self.task_manager.get_task(task_id).await else {
            return;
        };
        let chunks = self.task_manager.chunks_of(task_id).await;
        for chunk in &chunks {
            let path = self.file_manager.chunk_file_path(&task, chunk.id);
            let _ = self.file_manager.delete(&path).await;
        }
        self.task_manager.remove_chunks_of(task_id).await;

        task.state = TaskState::Finished;
        task.message = None;
        self.task_manager.update_task(task.clone()).await;
        self.dispatcher.dispatch(DownloadEvent::TaskStateChanged {
            task_id,
            state: TaskState::Finished,
            message: None,
        });
    }
}

/// spec.md §4.2 step 4: the largest `k` in `[1, max_chunks]` with
/// `length / (k+1) > min_chunk_length`, falling back to `1` if even `k=1`
/// fails the condition (a file always gets at least one chunk — spec.md
/// §8's "`length < 2 * MIN_CHUNK_LENGTH`: exactly one chunk is created").
fn choose_chunk_count(length: u64, max_chunks: usize, min_chunk_length: u64) -> usize {
    let max_chunks = max_chunks.max(1);
    let mut k = 1usize;
    for candidate in 2..=max_chunks {
        if length / (candidate as u64 + 1) > min_chunk_length {
            k = candidate;
        } else {
            break;
        }
    }
    k
}

/// spec.md §4.2 step 4: partition `[0, length-1]` into `k` contiguous
/// ranges, the first `k-1` of length `floor(length/k)`, the last absorbing
/// the remainder.
fn partition_ranges(length: u64, k: usize) -> Vec<ByteRange> {
    let size = length / k as u64;
    let mut ranges = Vec::with_capacity(k);
    let mut begin = 0u64;
    for i in 0..k {
        let end = if i == k - 1 { length - 1 } else { begin + size - 1 };
        ranges.push(ByteRange::new(begin, end));
        begin = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_chunk_count_respects_min_chunk_length() {
        // length / (k+1) > 1_000_000 picks k=4 here (the scenario-2 seed).
        assert_eq!(choose_chunk_count(10_000_000, 4, 1_000_000), 4);
    }

    #[test]
    fn choose_chunk_count_falls_back_to_one_below_threshold() {
        assert_eq!(choose_chunk_count(1_500_000, 8, 1_000_000), 1);
    }

    #[test]
    fn choose_chunk_count_is_capped_by_max_chunks() {
        assert_eq!(choose_chunk_count(100_000_000, 2, 1_000_000), 2);
    }

    #[test]
    fn partition_ranges_covers_the_whole_file_disjointly() {
        let ranges = partition_ranges(10_000_000, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].begin, 0);
        assert_eq!(ranges[0].len(), 2_500_000);
        assert_eq!(ranges.last().unwrap().end, 9_999_999);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].begin);
        }
    }

    #[test]
    fn partition_ranges_of_one_chunk_spans_whole_file() {
        let ranges = partition_ranges(500, 1);
        assert_eq!(ranges, vec![ByteRange::new(0, 499)]);
    }
}
