//! A concurrent, resumable, multi-connection file downloader core.
//!
//! The [`Moderator`] is the sole scheduler: it owns the Worker Registry and
//! every task-state transition, splitting tasks into byte-range chunks,
//! dispatching Chunk/Merge Workers under a global worker budget, and
//! concatenating finished chunks into the final file. HTTP transport,
//! filesystem operations, and persistent storage of Task/Chunk records are
//! external collaborators the embedding application supplies (or the
//! production defaults this crate ships in [`collaborators`]).

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
mod moderator;
mod registry;
mod speed;
pub mod workers;

pub use error::DownloadError;
pub use events::DownloadEvent;
pub use model::{ByteRange, Chunk, ChunkId, Task, TaskId, TaskState};
pub use moderator::Moderator;
