use super::{ChunkId, TaskId};
use serde::{Deserialize, Serialize};

/// Inclusive byte range `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub begin: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Size of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.begin + 1
    }
}

/// A byte range belonging to one task (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub task_id: TaskId,
    /// `None` is the "whole file" marker used for non-resumable tasks.
    pub range: Option<ByteRange>,
    pub downloaded: u64,
    pub finished: bool,
}

impl Chunk {
    pub fn new_request(task_id: TaskId, range: Option<ByteRange>) -> Self {
        Self {
            id: 0,
            task_id,
            range,
            downloaded: 0,
            finished: false,
        }
    }

    /// `end - begin + 1` for a bounded range, `None` for "whole file".
    pub fn total_len(&self) -> Option<u64> {
        self.range.map(|r| r.len())
    }

    pub fn is_finished(&self) -> bool {
        match self.total_len() {
            Some(total) => self.downloaded >= total,
            None => self.finished,
        }
    }
}
