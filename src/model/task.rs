use serde::{Deserialize, Serialize};

/// Stable id of a [`Task`], assigned by the Task Manager on insert.
pub type TaskId = u64;

/// The state machine a [`Task`] moves through (spec.md §3).
///
/// `FINISHED` and `FAILED` are absorbing: once reached, no further
/// transition is made by the Moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Newly inserted, not yet probed.
    Idle,
    /// Chunks planned; none, some, or all running.
    Waiting,
    /// All chunks finished; concatenation underway.
    Merging,
    /// Success, terminal.
    Finished,
    /// Terminal, with `Task::message` carrying the reason.
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

/// A requested download (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub destination: String,
    /// Total length in bytes. `None` until learned at init (the spec's
    /// `UNSET` sentinel, modeled directly as an `Option`).
    pub length: Option<u64>,
    /// True if the server supports byte-range GETs.
    pub resumable: bool,
    /// Upper bound on how many ranges this task may be split into.
    pub max_chunks: usize,
    /// Upper bound on simultaneous chunk workers for this task.
    pub max_parallel_connections: usize,
    pub state: TaskState,
    /// Last status text (e.g. a failure reason).
    pub message: Option<String>,
}

impl Task {
    /// Construct a task as it looks right after `add_task`, before the
    /// Task Manager assigns it a stable id.
    pub fn new_request(
        url: impl Into<String>,
        destination: impl Into<String>,
        max_chunks: usize,
        max_parallel_connections: usize,
    ) -> Self {
        Self {
            id: 0,
            url: url.into(),
            destination: destination.into(),
            length: None,
            resumable: false,
            max_chunks,
            max_parallel_connections,
            state: TaskState::Idle,
            message: None,
        }
    }

    /// Mark the task resumable (the server is known to support byte-range
    /// GETs). The core's `HttpClient` contract (spec.md §6) only probes
    /// content-length, not range support, so this is the caller's to set —
    /// typically from a prior HEAD/range check done before `add_task`.
    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    /// Supply a known length up front, skipping the content-length probe
    /// during `init_task` (spec.md §4.2 step 2).
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}
