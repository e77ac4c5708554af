//! The three [`super::ChunkProvider`] flavours required by §4.3.6.

use std::io::SeekFrom;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Notify;

use super::{ChunkProvider, TransportError};

/// Fully in-memory provider: chunk `i` is `bytes[i]`.
pub struct ByteSliceProvider {
    chunks: Vec<Bytes>,
}

impl ByteSliceProvider {
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl ChunkProvider for ByteSliceProvider {
    fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    fn chunk_size(&self, index: usize) -> u64 {
        self.chunks[index].len() as u64
    }

    async fn get_chunk(&self, index: usize) -> Result<Bytes, TransportError> {
        Ok(self.chunks[index].clone())
    }
}

/// File-backed provider sharing one OS file handle across concurrent callers, guarded
/// by a mutex: each `get_chunk` seeks, reads into a fresh buffer, and releases the lock
/// before returning, matching the "no I/O while holding the lock boundary" rule in §5 —
/// the read itself happens with the lock held (seek+read must be atomic together), but
/// the returned buffer is independently owned so retries never re-touch the handle.
pub struct FileChunkProvider {
    file: Mutex<File>,
    chunk_size: u64,
    total_size: u64,
    num_chunks: usize,
}

impl FileChunkProvider {
    pub fn new(file: File, total_size: u64, chunk_size: u64) -> Self {
        let num_chunks = total_size.div_ceil(chunk_size.max(1)).max(1) as usize;
        Self { file: Mutex::new(file), chunk_size, total_size, num_chunks }
    }
}

#[async_trait]
impl ChunkProvider for FileChunkProvider {
    fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    fn chunk_size(&self, index: usize) -> u64 {
        let start = index as u64 * self.chunk_size;
        self.chunk_size.min(self.total_size.saturating_sub(start))
    }

    async fn get_chunk(&self, index: usize) -> Result<Bytes, TransportError> {
        let len = self.chunk_size(index) as usize;
        let offset = index as u64 * self.chunk_size;
        let mut buf = vec![0u8; len];

        // Hold the lock across seek+read (they must stay atomic together), but never
        // across any I/O beyond that: the buffer is fully ours once we unlock.
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let file: &mut File = &mut guard;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        drop(guard);

        Ok(Bytes::from(buf))
    }
}

/// Proxy-scenario provider: chunks arrive out of order from an upstream source and are
/// added by index before being requested.
#[derive(Default)]
pub struct StreamChunkProvider {
    expected: usize,
    slots: Mutex<Vec<Option<Bytes>>>,
    notify: Notify,
}

impl StreamChunkProvider {
    pub fn new(expected_chunks: usize) -> Self {
        Self {
            expected: expected_chunks,
            slots: Mutex::new(vec![None; expected_chunks]),
            notify: Notify::new(),
        }
    }

    /// Add chunk `index`'s bytes; `data` is copied defensively so the caller's buffer
    /// can be reused or dropped immediately afterwards.
    pub fn add_chunk(&self, index: usize, data: &[u8]) {
        let mut slots = self.slots.lock().unwrap();
        slots[index] = Some(Bytes::copy_from_slice(data));
        drop(slots);
        self.notify.notify_waiters();
    }

    pub fn is_complete(&self) -> bool {
        self.slots.lock().unwrap().iter().all(Option::is_some)
    }
}

#[async_trait]
impl ChunkProvider for StreamChunkProvider {
    fn num_chunks(&self) -> usize {
        self.expected
    }

    fn chunk_size(&self, index: usize) -> u64 {
        self.slots.lock().unwrap()[index].as_ref().map(|b| b.len() as u64).unwrap_or(0)
    }

    async fn get_chunk(&self, index: usize) -> Result<Bytes, TransportError> {
        let found = self.slots.lock().unwrap()[index].clone();
        found.ok_or(TransportError::ChunkNotReady(index as u64))
    }
}
