//! Chunk Worker (spec.md §4.3): downloads exactly one chunk's byte range
//! into a dedicated spill file.
use crate::collaborators::{FileManager, HttpClient, TaskManager};
use crate::model::{ByteRange, Chunk, ChunkId, Task, TaskId};
use crate::speed::SpeedMeter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The three terminal events a Chunk Worker (and, via the analogous merge
/// sink, a Merge Worker) may report — exactly one per worker lifetime
/// (spec.md §4.3).
pub trait ChunkEventSink: Send + Sync {
    fn on_finished(&self, chunk_id: ChunkId);
    fn on_error(&self, chunk_id: ChunkId, reason: String);
    fn on_interrupted(&self, chunk_id: ChunkId);
}

/// Live progress shared between the running worker task and the handle the
/// Moderator holds in the Worker Registry. Lock-free so `remaining_bytes`
/// and `split_chunk` never block on the worker's own I/O (spec.md §4.1's
/// implementation note).
struct ChunkProgress {
    begin: u64,
    /// Current (possibly narrowed by a split) inclusive end. Unused for
    /// non-resumable chunks.
    end: AtomicU64,
    downloaded: AtomicU64,
    resumable: bool,
    min_chunk_length: u64,
}

/// Handle to a live Chunk Worker's progress, cheap to clone and share
/// between the worker task and the Moderator.
#[derive(Clone)]
pub struct ChunkWorkerHandle {
    pub chunk_id: ChunkId,
    pub task_id: TaskId,
    inner: Arc<ChunkProgress>,
}

impl ChunkWorkerHandle {
    pub fn new(chunk_id: ChunkId, task_id: TaskId, range: Option<ByteRange>, downloaded: u64, min_chunk_length: u64) -> Self {
        let (begin, end, resumable) = match range {
            Some(r) => (r.begin, r.end, true),
            None => (0, 0, false),
        };
        Self {
            chunk_id,
            task_id,
            inner: Arc::new(ChunkProgress {
                begin,
                end: AtomicU64::new(end),
                downloaded: AtomicU64::new(downloaded),
                resumable,
                min_chunk_length,
            }),
        }
    }

    pub fn begin(&self) -> u64 {
        self.inner.begin
    }

    pub fn end(&self) -> u64 {
        self.inner.end.load(Ordering::Acquire)
    }

    pub fn downloaded(&self) -> u64 {
        self.inner.downloaded.load(Ordering::Acquire)
    }

    fn add_downloaded(&self, delta: u64) -> u64 {
        self.inner.downloaded.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// `end - begin + 1 - downloaded`, or `None` for the non-resumable
    /// "whole file" marker (the spec's "+∞ for unknown-length").
    pub fn remaining_bytes(&self) -> Option<u64> {
        if !self.inner.resumable {
            return None;
        }
        let end = self.end();
        let consumed = self.inner.begin + self.downloaded();
        Some(if consumed > end { 0 } else { end - consumed + 1 })
    }

    /// Atomically narrow this worker's effective `end` and return the new
    /// tail range, or `None` if the remaining range is too small to divide
    /// (spec.md §4.3; threshold is `2 * min_chunk_length`) or the chunk is
    /// non-resumable.
    pub fn split_chunk(&self) -> Option<ByteRange> {
        if !self.inner.resumable {
            return None;
        }
        loop {
            let old_end = self.inner.end.load(Ordering::Acquire);
            let downloaded = self.inner.downloaded.load(Ordering::Acquire);
            let consumed_begin = self.inner.begin + downloaded;
            if consumed_begin > old_end {
                return None;
            }
            let remaining = old_end - consumed_begin + 1;
            if remaining <= 2 * self.inner.min_chunk_length {
                return None;
            }
            let tail_len = remaining / 2;
            let new_begin = old_end - tail_len + 1;
            let narrowed_end = new_begin - 1;
            if self
                .inner
                .end
                .compare_exchange(old_end, narrowed_end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ByteRange::new(new_begin, old_end));
            }
            // Another split (or a fresh read of `downloaded`) raced us; retry.
        }
    }

    fn current_range(&self) -> Option<ByteRange> {
        if self.inner.resumable {
            Some(ByteRange::new(self.inner.begin, self.end()))
        } else {
            None
        }
    }
}

/// Download exactly one chunk's byte range into `path`, driving the
/// `HttpClient`/`FileManager`/`TaskManager` collaborators, until finished,
/// errored, or cooperatively interrupted.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    chunk_id: ChunkId,
    task: Task,
    handle: ChunkWorkerHandle,
    path: PathBuf,
    http: Arc<dyn HttpClient>,
    file_manager: Arc<dyn FileManager>,
    task_manager: Arc<dyn TaskManager>,
    speed_meter: Arc<SpeedMeter>,
    interrupt: Arc<AtomicBool>,
    sink: Arc<dyn ChunkEventSink>,
) {
    let span = tracing::info_span!("chunk_worker", chunk_id, task_id = task.id);
    let _enter = span.enter();

    let begin = handle.begin();
    let request_range = if task.resumable {
        Some(ByteRange::new(begin + handle.downloaded(), handle.end()))
    } else {
        None
    };

    let mut stream = match http.get_range(&task, request_range).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "chunk request failed");
            sink.on_error(chunk_id, e.to_string());
            return;
        }
    };

    loop {
        if interrupt.load(Ordering::Relaxed) {
            sink.on_interrupted(chunk_id);
            return;
        }

        let current_end = handle.end();
        let downloaded = handle.downloaded();
        if task.resumable && begin + downloaded > current_end {
            break; // a split already narrowed us below what we'd downloaded
        }

        match stream.next_chunk().await {
            Ok(Some(mut bytes)) => {
                if task.resumable {
                    let allowed = current_end - (begin + downloaded) + 1;
                    if (bytes.len() as u64) > allowed {
                        bytes = bytes.slice(0..allowed as usize);
                    }
                }
                if bytes.is_empty() {
                    continue;
                }
                if let Err(e) = file_manager.append(&path, &bytes).await {
                    tracing::warn!(error = %e, "chunk write failed");
                    sink.on_error(chunk_id, e.to_string());
                    return;
                }
                let total_downloaded = handle.add_downloaded(bytes.len() as u64);
                speed_meter.record(bytes.len() as u64);
                task_manager
                    .update_chunk(Chunk {
                        id: chunk_id,
                        task_id: task.id,
                        range: handle.current_range(),
                        downloaded: total_downloaded,
                        finished: false,
                    })
                    .await;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "chunk stream failed");
                sink.on_error(chunk_id, e.to_string());
                return;
            }
        }
    }

    finish(chunk_id, &task, &handle, task_manager.as_ref(), sink.as_ref()).await;
}

async fn finish(
    chunk_id: ChunkId,
    task: &Task,
    handle: &ChunkWorkerHandle,
    task_manager: &dyn TaskManager,
    sink: &dyn ChunkEventSink,
) {
    let downloaded = handle.downloaded();
    let finished = match handle.current_range() {
        Some(range) => downloaded == range.len(),
        None => true,
    };

    task_manager
        .update_chunk(Chunk {
            id: chunk_id,
            task_id: task.id,
            range: handle.current_range(),
            downloaded,
            finished,
        })
        .await;

    if finished {
        sink.on_finished(chunk_id);
    } else {
        sink.on_error(
            chunk_id,
            format!("stream ended early: {downloaded} bytes downloaded"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_bytes_tracks_downloaded() {
        let handle = ChunkWorkerHandle::new(1, 1, Some(ByteRange::new(0, 999)), 0, 100);
        assert_eq!(handle.remaining_bytes(), Some(1000));
        handle.add_downloaded(400);
        assert_eq!(handle.remaining_bytes(), Some(600));
    }

    #[test]
    fn remaining_bytes_is_none_for_non_resumable() {
        let handle = ChunkWorkerHandle::new(1, 1, None, 0, 100);
        assert_eq!(handle.remaining_bytes(), None);
    }

    #[test]
    fn split_chunk_halves_the_remaining_range() {
        let handle = ChunkWorkerHandle::new(1, 1, Some(ByteRange::new(0, 999)), 0, 100);
        let tail = handle.split_chunk().expect("range is large enough to split");
        assert_eq!(tail.begin, 500);
        assert_eq!(tail.end, 999);
        assert_eq!(handle.end(), 499);
    }

    #[test]
    fn split_chunk_refuses_when_remaining_is_too_small() {
        let handle = ChunkWorkerHandle::new(1, 1, Some(ByteRange::new(0, 150)), 0, 100);
        assert!(handle.split_chunk().is_none());
    }

    #[test]
    fn split_chunk_refuses_for_non_resumable() {
        let handle = ChunkWorkerHandle::new(1, 1, None, 0, 100);
        assert!(handle.split_chunk().is_none());
    }

    #[test]
    fn split_preserves_total_remaining_work() {
        let handle = ChunkWorkerHandle::new(1, 1, Some(ByteRange::new(0, 999)), 200, 100);
        let before = handle.remaining_bytes().unwrap();
        let tail = handle.split_chunk().unwrap();
        let after_head = handle.remaining_bytes().unwrap();
        let after_tail = tail.len();
        assert_eq!(before, after_head + after_tail);
    }
}
