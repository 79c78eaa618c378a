//! Merge Worker (spec.md §4.5): concatenates all spill files of one task,
//! in chunk order, into the final destination.
use crate::collaborators::FileManager;
use crate::model::{Chunk, TaskId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The single terminal event a Merge Worker reports (spec.md §4.5).
pub trait MergeEventSink: Send + Sync {
    fn on_finished(&self, task_id: TaskId);
    fn on_error(&self, task_id: TaskId, reason: String);
    fn on_interrupted(&self, task_id: TaskId);
}

/// Concatenate `chunks`' spill files, ordered by begin offset (id order at
/// init), into `dest`. Invariant expected from the Moderator: every chunk is
/// already finished and its spill file exists at the expected size — the
/// merge does not re-validate (spec.md §4.5).
pub async fn run(
    task_id: TaskId,
    dest: PathBuf,
    mut chunks: Vec<Chunk>,
    chunk_paths: Vec<PathBuf>,
    file_manager: Arc<dyn FileManager>,
    interrupt: Arc<AtomicBool>,
    sink: Arc<dyn MergeEventSink>,
) {
    let span = tracing::info_span!("merge_worker", task_id);
    let _enter = span.enter();

    if interrupt.load(Ordering::Relaxed) {
        sink.on_interrupted(task_id);
        return;
    }

    // Pair each chunk with its spill file path, then sort by begin offset
    // (falling back to chunk id for the non-resumable "whole file" marker,
    // where only one chunk ever exists anyway).
    let mut ordered: Vec<(Chunk, PathBuf)> = chunks.drain(..).zip(chunk_paths).collect();
    ordered.sort_by_key(|(chunk, _)| chunk.range.map(|r| r.begin).unwrap_or(0));
    let sources: Vec<PathBuf> = ordered.into_iter().map(|(_, path)| path).collect();

    if interrupt.load(Ordering::Relaxed) {
        sink.on_interrupted(task_id);
        return;
    }

    match file_manager.concatenate(&dest, &sources).await {
        Ok(()) => sink.on_finished(task_id),
        Err(e) => {
            tracing::warn!(error = %e, "merge failed");
            sink.on_error(task_id, e.to_string());
        }
    }
}
