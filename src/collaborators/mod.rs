//! External collaborator contracts (spec.md §6): HTTP transport, filesystem
//! operations, and persistent Task/Chunk storage. The core only ever talks
//! to these through the traits below; a conforming embedding application
//! may swap in its own implementations (a SQLite-backed `TaskManager`, an
//! S3-backed `FileManager`, ...). Each trait ships one production-ready
//! default implementation, mirroring the concrete `network::client` /
//! `utils::filesystem` modules the teacher crate carries.
pub mod file_manager;
pub mod http;
pub mod task_manager;

pub use file_manager::{FileManager, TokioFileManager};
pub use http::{ByteSource, HttpClient, ReqwestHttpClient};
pub use task_manager::{InMemoryTaskManager, TaskManager};
