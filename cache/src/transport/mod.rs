//! Chunk Transport: the bounded-concurrency, resumable, multipart chunk uploader that
//! is the heart of this crate, together with its much simpler symmetric download path.
//!
//! The concurrency shape — one logical task per unit of work, a `JoinSet`, a bounded
//! `mpsc` progress channel, and a `Handler` trait generated by
//! [`crate::trait_event_handler`] — follows the teacher's batch downloader
//! (`download.rs`). Per-chunk cancellation on top of that shape is grounded on the
//! `tokio_util::sync::CancellationToken` pattern used by the pack's own chunked
//! uploaders (see DESIGN.md).

mod provider;
mod upload;
mod download;

pub use provider::{ByteSliceProvider, FileChunkProvider, StreamChunkProvider};
pub use upload::upload_chunks;
pub use download::download_with_retry;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::error::is_retryable_status;

/// A lazy source of chunk bytes, indexed by position. Three shapes are required by the
/// spec (§4.3.6): in-memory byte slices, a shared file handle, and a streamed proxy —
/// see [`provider`] for each.
#[async_trait]
pub trait ChunkProvider: Send + Sync {
    fn num_chunks(&self) -> usize;
    fn chunk_size(&self, index: usize) -> u64;
    async fn get_chunk(&self, index: usize) -> Result<Bytes, TransportError>;
}

/// One destination the chunk transport PUTs a chunk to, as handed back by the
/// orchestrator's `prepare` call.
#[derive(Debug, Clone)]
pub struct UploadUrl {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Tunables for one `upload_chunks` call (§4.3.1, §4.3.3).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub concurrency: usize,
    pub max_retry_per_chunk: u32,
    pub hung_threshold: Duration,
    pub http_client: Client,
}

impl TransportConfig {
    /// `min(max(cpuCount*3, 2), 20)` per §4.3.3.
    pub fn default_concurrency() -> usize {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        (cpus * 3).max(2).min(20)
    }
}

/// The chunk size plan derived from a total archive size and an effective concurrency
/// (§4.3.2): `cs = totalSize/concurrency`, halved if `>= 100 MiB`, clamped to
/// `[8 MiB, 100 MiB]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub last_chunk_size: u64,
}

pub const MIN_CHUNK_SIZE: u64 = 8 * 1024 * 1024;
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

pub fn plan_chunks(total_size: u64, concurrency: usize) -> ChunkPlan {
    let concurrency = concurrency.max(1) as u64;
    let mut chunk_size = total_size / concurrency;
    if chunk_size >= MAX_CHUNK_SIZE {
        chunk_size /= 2;
    }
    chunk_size = chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);

    if total_size == 0 {
        return ChunkPlan { chunk_size, chunk_count: 1, last_chunk_size: 0 };
    }

    let chunk_count = total_size.div_ceil(chunk_size);
    let last_chunk_size = total_size - (chunk_count - 1) * chunk_size;
    ChunkPlan { chunk_size, chunk_count, last_chunk_size }
}

/// Shared, mutex-guarded running average of successful chunk-upload durations, read by
/// the hung-chunk watcher and written by the collector (§4.3.4, §9 design notes).
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total: Duration,
    count: u32,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.total += elapsed;
        inner.count += 1;
    }

    /// `None` until at least one chunk has completed, matching the hung-watcher rule
    /// that it only acts once it has a baseline to compare against.
    pub fn average(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        if inner.count == 0 {
            None
        } else {
            Some(inner.total / inner.count)
        }
    }
}

crate::trait_event_handler! {
    /// Progress notifications for one `upload_chunks` or `download_with_retry` call.
    pub trait Handler {
        /// A chunk attempt finished successfully; `completed` counts chunks, not
        /// attempts, and is monotonic.
        fn chunk_done(completed: u64, total: u64);
        /// An attempt for `index` was cancelled by the hung-chunk watcher and will be
        /// retried.
        fn chunk_hung(index: u64, attempt: u32);
        /// Bytes received while streaming a download.
        fn download_progress(received: u64, total: Option<u64>);
    }
}

/// Crate-wide transport error kinds (§7): transient ones are retried within this
/// module; everything else is returned to the caller.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("chunk {index} failed with status {status}: {body}")]
    ChunkFailed { index: u64, status: u16, body: String },

    #[error("chunk {index} missing ETag on success response")]
    MissingEtag { index: u64 },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("cache entry not found")]
    NotFound,

    #[error("stream chunk {0} requested before it was added")]
    ChunkNotReady(u64),
}

impl TransportError {
    /// Transient per §7: 5xx, 429, or (when constructed from a request/IO error) any
    /// lower-level transport failure the caller should retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::ChunkFailed { status, .. } => is_retryable_status(*status),
            TransportError::MissingEtag { .. } => true,
            TransportError::Request(_) | TransportError::Io(_) => true,
            TransportError::Cancelled | TransportError::NotFound | TransportError::ChunkNotReady(_) => false,
        }
    }
}
