//! HTTP Client collaborator (spec.md §6).
//!
//! Grounded in the teacher's `network::client` (client builders, user agent,
//! timeouts) and `lib.rs::fetch_file_details` (HEAD-then-ranged-GET probe
//! fallback), generalized behind a trait per spec.md's external-interface
//! boundary.
use crate::error::DownloadError;
use crate::model::{ByteRange, Task};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use std::time::Duration;

/// A streaming source of response bytes. Signals EOF with `Ok(None)`.
#[async_trait]
pub trait ByteSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError>;
}

/// HTTP transport the Chunk Worker and `init_task` consume (spec.md §6).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Probe the server for the task's total length.
    async fn fetch_content_length(&self, task: &Task) -> Result<u64, DownloadError>;

    /// Issue a streaming GET. `range` is `None` for a non-resumable,
    /// unbounded request.
    async fn get_range(
        &self,
        task: &Task,
        range: Option<ByteRange>,
    ) -> Result<Box<dyn ByteSource>, DownloadError>;
}

/// Production `HttpClient` built on `reqwest`, the same crate the teacher
/// already depends on for its worker and metadata requests.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn fetch_content_length(&self, task: &Task) -> Result<u64, DownloadError> {
        let head = self.client.head(&task.url).send().await;
        let response = match head {
            Ok(resp) if resp.status().is_success() => resp,
            _ => self
                .client
                .get(&task.url)
                .header(RANGE, "bytes=0-0")
                .send()
                .await
                .map_err(|e| DownloadError::InitError(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(DownloadError::InitError(format!(
                "server returned {}",
                response.status()
            )));
        }

        response
            .content_length()
            .ok_or_else(|| DownloadError::InitError("no content-length in response".to_string()))
    }

    async fn get_range(
        &self,
        task: &Task,
        range: Option<ByteRange>,
    ) -> Result<Box<dyn ByteSource>, DownloadError> {
        let mut request = self.client.get(&task.url);
        if let Some(range) = range {
            request = request.header(RANGE, format!("bytes={}-{}", range.begin, range.end));
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::ChunkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::ChunkError(format!(
                "server returned {}",
                response.status()
            )));
        }
        Ok(Box::new(ReqwestByteSource { response }))
    }
}

struct ReqwestByteSource {
    response: reqwest::Response,
}

#[async_trait]
impl ByteSource for ReqwestByteSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        self.response
            .chunk()
            .await
            .map_err(|e| DownloadError::ChunkError(e.to_string()))
    }
}
