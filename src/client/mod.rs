//! Upload orchestrator: drives a local file through the chunked upload
//! protocol against a running server.
//!
//! The file is split into fixed-size fragments that are sent strictly one
//! after another; each must be acknowledged before the next is read. The
//! first failure aborts the whole upload and finalize is never called, so a
//! caller either gets a URL or an error, never a half-finished file. Retrying
//! means calling [`UploadClient::upload_path`] again from the start.

use crate::models::upload::{ChunkAck, FinalizeRequest, FinalizeResponse, InitUploadRequest, InitUploadResponse};
use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};
use std::{io, ops::Range, path::Path};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
};
use tracing::{debug, info};

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("file is {size} bytes, the maximum is {limit}")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("chunk size must be positive")]
    InvalidChunkSize,
    #[error("server rejected chunk {index} ({status}): {body}")]
    ChunkRejected {
        index: u32,
        status: StatusCode,
        body: String,
    },
    #[error("server rejected {stage} ({status}): {body}")]
    Rejected {
        stage: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Fragments acknowledged so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
}

impl Progress {
    /// Share of the upload done, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        f64::from(self.completed.min(self.total)) / f64::from(self.total)
    }
}

/// What a finished upload resolves to.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Absolute view link, `<server>/f/<id>`.
    pub url: String,
    pub raw_url: String,
    pub size: u64,
    pub checksum: String,
}

/// Byte ranges for each fragment of a `size`-byte file. An empty file is one
/// empty fragment so that finalize always has something to assemble.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<Range<u64>> {
    if size == 0 {
        return vec![0..0];
    }
    (0..size.div_ceil(chunk_size))
        .map(|i| {
            let start = i * chunk_size;
            start..(start + chunk_size).min(size)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    base_url: String,
    chunk_size: u64,
    max_file_size: u64,
}

impl UploadClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload the file at `path`, reporting progress after every fragment.
    pub async fn upload_path<F>(&self, path: &Path, on_progress: F) -> ClientResult<UploadOutcome>
    where
        F: FnMut(Progress),
    {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        self.upload_reader(file, &filename, size, on_progress).await
    }

    /// Upload `size` bytes read sequentially from `reader` under `filename`.
    pub async fn upload_reader<R, F>(
        &self,
        mut reader: R,
        filename: &str,
        size: u64,
        mut on_progress: F,
    ) -> ClientResult<UploadOutcome>
    where
        R: AsyncRead + Unpin,
        F: FnMut(Progress),
    {
        if self.chunk_size == 0 {
            return Err(ClientError::InvalidChunkSize);
        }
        if size > self.max_file_size {
            return Err(ClientError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        let upload_id = self.begin(filename, size).await?;
        let plan = plan_chunks(size, self.chunk_size);
        let total = plan.len() as u32;
        info!(filename, size, chunks = total, "starting upload");

        for (index, range) in (0u32..).zip(plan) {
            let mut buf = vec![0u8; (range.end - range.start) as usize];
            reader.read_exact(&mut buf).await?;
            self.send_chunk(&upload_id, filename, index, total, buf).await?;

            let progress = Progress {
                completed: index + 1,
                total,
            };
            debug!(index, fraction = progress.fraction(), "chunk acknowledged");
            on_progress(progress);
        }

        let outcome = self.finalize(&upload_id, filename, total).await?;
        info!(url = %outcome.url, "upload complete");
        Ok(outcome)
    }

    async fn begin(&self, filename: &str, size: u64) -> ClientResult<String> {
        let response = self
            .http
            .post(self.endpoint("/api/upload-init"))
            .json(&InitUploadRequest {
                filename: filename.to_string(),
                total_size: Some(size),
            })
            .send()
            .await?;
        let response = ensure_success(response, "upload init").await?;
        Ok(response.json::<InitUploadResponse>().await?.upload_id)
    }

    async fn send_chunk(
        &self,
        upload_id: &str,
        filename: &str,
        index: u32,
        total: u32,
        bytes: Vec<u8>,
    ) -> ClientResult<()> {
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name("blob"))
            .text("chunkIndex", index.to_string())
            .text("totalChunks", total.to_string())
            .text("filename", filename.to_string())
            .text("uploadId", upload_id.to_string());

        let response = self
            .http
            .post(self.endpoint("/api/upload-chunk"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::ChunkRejected { index, status, body });
        }
        let ack: ChunkAck = response.json().await?;
        if !ack.success {
            return Err(ClientError::ChunkRejected {
                index,
                status,
                body: ack.error.unwrap_or(ack.message),
            });
        }
        Ok(())
    }

    async fn finalize(&self, upload_id: &str, filename: &str, total: u32) -> ClientResult<UploadOutcome> {
        let response = self
            .http
            .post(self.endpoint("/api/upload-finalize"))
            .json(&FinalizeRequest {
                filename: filename.to_string(),
                upload_id: Some(upload_id.to_string()),
                total_chunks: Some(total),
            })
            .send()
            .await?;
        let finalized: FinalizeResponse = ensure_success(response, "finalize").await?.json().await?;

        let url = if finalized.url.starts_with('/') {
            self.endpoint(&finalized.url)
        } else {
            finalized.url
        };
        Ok(UploadOutcome {
            url,
            raw_url: finalized.raw_url,
            size: finalized.size,
            checksum: finalized.checksum,
        })
    }
}

async fn ensure_success(
    response: reqwest::Response,
    stage: &'static str,
) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Rejected { stage, status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn twenty_three_megabytes_in_ten_megabyte_chunks() {
        let plan = plan_chunks(23 * MB, 10 * MB);
        assert_eq!(plan, vec![0..10 * MB, 10 * MB..20 * MB, 20 * MB..23 * MB]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_chunk() {
        assert_eq!(plan_chunks(20, 10), vec![0..10, 10..20]);
    }

    #[test]
    fn empty_file_is_one_empty_chunk() {
        assert_eq!(plan_chunks(0, 10), vec![0..0]);
    }

    #[test]
    fn progress_fraction_is_bounded() {
        assert_eq!(Progress { completed: 0, total: 4 }.fraction(), 0.0);
        assert_eq!(Progress { completed: 2, total: 4 }.fraction(), 0.5);
        assert_eq!(Progress { completed: 4, total: 4 }.fraction(), 1.0);
        assert_eq!(Progress { completed: 0, total: 0 }.fraction(), 1.0);
    }

    #[tokio::test]
    async fn oversized_file_fails_before_any_request() {
        // Nothing listens on this address; reaching the network would surface
        // as an Http error instead.
        let client = UploadClient::new("http://127.0.0.1:9").with_max_file_size(10);
        let mut calls = 0;
        let result = client
            .upload_reader(&b"eleven bytes"[..], "x.bin", 11, |_| calls += 1)
            .await;
        assert!(matches!(result, Err(ClientError::FileTooLarge { size: 11, limit: 10 })));
        assert_eq!(calls, 0);
    }
}
