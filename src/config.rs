//! Moderator-wide tunables (spec.md §6 named constants, collected).
use std::time::Duration;

/// Lower bound below which a chunk is not worth splitting further.
/// Order of magnitude matches the teacher's smallest `calculate_chunk_size`
/// tier (512 KiB - 4 MiB); this crate uses a flat 1 MiB default.
pub const MIN_CHUNK_LENGTH: u64 = 1024 * 1024;

/// Tracing span name for the moderator actor. Used only for log
/// correlation; nothing depends on it at runtime (spec.md §9).
pub const MODERATOR_SPAN_NAME: &str = "ModeratorThread";

/// Configuration for a [`crate::Moderator`] instance.
#[derive(Debug, Clone)]
pub struct ModeratorConfig {
    /// Global cap on simultaneously live workers (chunk + merge).
    pub max_workers: usize,
    /// Default upper bound on how many chunks a task may be split into,
    /// used when a task doesn't specify its own.
    pub default_max_chunks: usize,
    /// Default upper bound on simultaneous chunk workers per task.
    pub default_max_parallel_connections: usize,
    /// Lower bound below which a chunk is not split further.
    pub min_chunk_length: u64,
    /// Connect timeout for the HTTP client.
    pub connect_timeout: Duration,
    /// Read timeout for the HTTP client.
    pub read_timeout: Duration,
}

impl Default for ModeratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            default_max_chunks: 8,
            default_max_parallel_connections: 4,
            min_chunk_length: MIN_CHUNK_LENGTH,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}
