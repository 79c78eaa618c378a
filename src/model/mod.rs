//! Data model (spec.md §3): Task, Chunk, and the byte ranges between them.
mod chunk;
mod task;

pub use chunk::{ByteRange, Chunk};
pub use task::{Task, TaskId, TaskState};

/// Stable id of a [`Chunk`], assigned by the Task Manager on insert.
pub type ChunkId = u64;
