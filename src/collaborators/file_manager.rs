//! File Manager collaborator (spec.md §6).
//!
//! Grounded in the teacher's `utils::filesystem` (file creation, seeking,
//! writing) minus sparse preallocation, which spec.md §1 names a non-goal.
use crate::error::DownloadError;
use crate::model::{ChunkId, Task};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Filesystem operations the Chunk Worker and Merge Worker consume
/// (spec.md §6). `append`/`delete`/`concatenate` are the only mutating
/// primitives the core needs; everything else (allocation strategy,
/// directory layout) is the implementation's choice.
#[async_trait]
pub trait FileManager: Send + Sync {
    /// Path of the spill file for one chunk of one task.
    fn chunk_file_path(&self, task: &Task, chunk_id: ChunkId) -> PathBuf;
    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DownloadError>;
    async fn delete(&self, path: &Path) -> Result<(), DownloadError>;
    /// Concatenate `sources`, in order, into `dest`.
    async fn concatenate(&self, dest: &Path, sources: &[PathBuf]) -> Result<(), DownloadError>;
}

/// Production `FileManager` built on `tokio::fs`. Spill files live
/// alongside the destination, named `<destination>.part<chunk_id>`.
pub struct TokioFileManager;

impl TokioFileManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioFileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileManager for TokioFileManager {
    fn chunk_file_path(&self, task: &Task, chunk_id: ChunkId) -> PathBuf {
        PathBuf::from(format!("{}.part{}", task.destination, chunk_id))
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<(), DownloadError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn concatenate(&self, dest: &Path, sources: &[PathBuf]) -> Result<(), DownloadError> {
        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dest)
            .await?;
        for source in sources {
            let mut input = tokio::fs::File::open(source).await?;
            tokio::io::copy(&mut input, &mut out).await?;
        }
        out.flush().await?;
        Ok(())
    }
}
