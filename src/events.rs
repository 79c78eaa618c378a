//! Observable events fanned out by the Event Dispatcher (spec.md §2, §6).
use crate::model::{ChunkId, TaskId, TaskState};

/// Events the Moderator and workers emit for consumption by registered
/// listeners. The teacher emits ad hoc `&str`/`u64` payloads straight to a
/// single hard-coded Tauri channel (`app.emit("download-progress", ...)`);
/// this enum is the typed generalization a listener-registry design needs.
#[derive(Debug, Clone, serde::Serialize)]
pub enum DownloadEvent {
    /// A task transitioned to a new state. `message` carries the failure
    /// reason when `state == Failed`.
    TaskStateChanged {
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
    },
    /// A chunk worker reported newly-downloaded bytes.
    ChunkProgress {
        task_id: TaskId,
        chunk_id: ChunkId,
        downloaded: u64,
    },
    /// An aggregate throughput sample.
    SpeedSample { bytes_per_second: u64 },
}
