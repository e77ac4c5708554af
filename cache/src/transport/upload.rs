//! `upload_chunks`: bounded-concurrency driver with per-chunk retry and hung-chunk
//! detection (§4.3.3, §4.3.4, §4.3.5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{ChunkProvider, Handler, Stats, TransportConfig, TransportError, UploadUrl};

/// Drive the whole multipart upload and return ETags in chunk-index order.
///
/// `outer` is the caller's cancellation: cancelling it aborts every in-flight chunk.
pub async fn upload_chunks(
    provider: Arc<dyn ChunkProvider>,
    urls: Arc<Vec<UploadUrl>>,
    config: &TransportConfig,
    outer: CancellationToken,
    handler: &mut impl Handler,
) -> Result<Vec<String>, TransportError> {
    let num_chunks = provider.num_chunks();
    debug_assert_eq!(num_chunks, urls.len());

    let stats = Arc::new(Stats::new());
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let (progress_tx, mut progress_rx) = mpsc::channel(config.concurrency.max(1) * 2);

    let mut tasks = JoinSet::new();
    for index in 0..num_chunks {
        let provider = Arc::clone(&provider);
        let urls = Arc::clone(&urls);
        let stats = Arc::clone(&stats);
        let semaphore = Arc::clone(&semaphore);
        let outer = outer.clone();
        let config = config.clone();
        let progress_tx = progress_tx.clone();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = upload_one_chunk(index, &*provider, &urls[index], &config, &outer, &stats, &progress_tx).await;
            (index, result)
        });
    }
    drop(progress_tx);

    let mut etags: Vec<Option<String>> = vec![None; num_chunks];
    let mut completed = 0u64;
    let mut first_error = None;

    loop {
        tokio::select! {
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let (index, result) = joined.expect("chunk upload task panicked");
                match result {
                    Ok(etag) => {
                        etags[index] = Some(etag);
                        completed += 1;
                        handler.chunk_done(completed, num_chunks as u64);
                    }
                    Err(err) if first_error.is_none() => first_error = Some(err),
                    Err(_) => {}
                }
            }
            Some(HungEvent { index, attempt }) = progress_rx.recv() => {
                handler.chunk_hung(index as u64, attempt);
            }
            else => break,
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(etags.into_iter().map(|e| e.expect("every chunk produced a result")).collect())
}

struct HungEvent {
    index: usize,
    attempt: u32,
}

/// Per-chunk attempt loop following the algorithm in §4.3.4 verbatim.
async fn upload_one_chunk(
    index: usize,
    provider: &dyn ChunkProvider,
    url: &UploadUrl,
    config: &TransportConfig,
    outer: &CancellationToken,
    stats: &Arc<Stats>,
    hung_tx: &mpsc::Sender<HungEvent>,
) -> Result<String, TransportError> {
    let mut last_err = None;

    for attempt in 1..=config.max_retry_per_chunk {
        if outer.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let start = Instant::now();
        let chunk_cancel = CancellationToken::new();

        let watcher = if attempt < config.max_retry_per_chunk && !config.hung_threshold.is_zero() {
            Some(spawn_hung_watcher(
                chunk_cancel.clone(),
                start,
                Arc::clone(stats),
                config.hung_threshold,
                index,
                attempt,
                hung_tx.clone(),
            ))
        } else {
            None
        };

        enum Outcome {
            Done(Result<String, TransportError>),
            Hung,
            OuterCancelled,
        }

        let outcome = tokio::select! {
            res = do_upload(provider, url, index, config) => Outcome::Done(res),
            _ = chunk_cancel.cancelled() => Outcome::Hung,
            _ = outer.cancelled() => Outcome::OuterCancelled,
        };

        chunk_cancel.cancel();
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        match outcome {
            Outcome::OuterCancelled => return Err(TransportError::Cancelled),
            Outcome::Done(Ok(etag)) => {
                stats.record(start.elapsed());
                return Ok(etag);
            }
            Outcome::Done(Err(err)) => {
                if outer.is_cancelled() {
                    return Err(TransportError::Cancelled);
                }
                last_err = Some(err);
                continue;
            }
            Outcome::Hung => {
                let backoff = Duration::from_secs(attempt as u64 * 2);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = outer.cancelled() => return Err(TransportError::Cancelled),
                }
                last_err = Some(TransportError::Cancelled);
                continue;
            }
        }
    }

    Err(last_err.unwrap_or(TransportError::Cancelled))
}

#[allow(clippy::too_many_arguments)]
fn spawn_hung_watcher(
    chunk_cancel: CancellationToken,
    start: Instant,
    stats: Arc<Stats>,
    hung_threshold: Duration,
    index: usize,
    attempt: u32,
    hung_tx: mpsc::Sender<HungEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if chunk_cancel.is_cancelled() {
                return;
            }
            // No chunk has completed yet anywhere, so there's no baseline to compare
            // against; keep waiting rather than giving up on this chunk's watch.
            let Some(average) = stats.average() else { continue };
            let elapsed = start.elapsed();
            if elapsed.saturating_sub(average) > hung_threshold {
                chunk_cancel.cancel();
                let _ = hung_tx.send(HungEvent { index, attempt }).await;
                return;
            }
        }
    })
}

/// `doUpload` (§4.3.5): get the chunk, issue the HTTP request with an explicit
/// `Content-Length`, and require a non-empty `ETag` on a 2xx response.
async fn do_upload(
    provider: &dyn ChunkProvider,
    url: &UploadUrl,
    index: usize,
    config: &TransportConfig,
) -> Result<String, TransportError> {
    let bytes = provider.get_chunk(index).await?;
    let method = Method::from_bytes(url.method.as_bytes()).unwrap_or(Method::PUT);

    let mut req = config
        .http_client
        .request(method, &url.url)
        .header(reqwest::header::CONTENT_LENGTH, bytes.len());
    for (name, value) in &url.headers {
        req = req.header(name, value);
    }

    let response = req.body(bytes).send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = truncate_body(&response.text().await.unwrap_or_default());
        return Err(TransportError::ChunkFailed { index: index as u64, status: status.as_u16(), body });
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    etag.ok_or(TransportError::MissingEtag { index: index as u64 })
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 1024;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::transport::{plan_chunks, ByteSliceProvider};
    use bytes::Bytes;

    #[test]
    fn chunk_plan_clamps_and_halves() {
        let plan = plan_chunks(1_000 * 1024 * 1024, 2); // 500 MiB/chunk before clamping
        assert_eq!(plan.chunk_size, 100 * 1024 * 1024);

        let plan = plan_chunks(4 * 1024 * 1024, 8); // 512 KiB/chunk, clamp to minimum
        assert_eq!(plan.chunk_size, super::super::MIN_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn byte_slice_provider_concatenates_to_original() {
        let data = b"hello world, this is archive data".to_vec();
        let provider = ByteSliceProvider::new(vec![
            Bytes::copy_from_slice(&data[..10]),
            Bytes::copy_from_slice(&data[10..]),
        ]);
        let mut out = Vec::new();
        for i in 0..provider.num_chunks() {
            out.extend_from_slice(&provider.get_chunk(i).await.unwrap());
        }
        assert_eq!(out, data);
    }

    /// A provider whose one designated chunk never resolves on its first read, then
    /// behaves normally afterwards, simulating a chunk that genuinely stalls mid-upload.
    struct HangOnceProvider {
        chunks: Vec<Bytes>,
        hang_index: usize,
        hangs_remaining: AtomicUsize,
    }

    #[async_trait]
    impl ChunkProvider for HangOnceProvider {
        fn num_chunks(&self) -> usize {
            self.chunks.len()
        }

        fn chunk_size(&self, index: usize) -> u64 {
            self.chunks[index].len() as u64
        }

        async fn get_chunk(&self, index: usize) -> Result<Bytes, TransportError> {
            if index == self.hang_index && self.hangs_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                std::future::pending::<()>().await;
            }
            Ok(self.chunks[index].clone())
        }
    }

    #[derive(Default, Clone)]
    struct HungCounter(std::sync::Arc<AtomicU32>);

    impl Handler for HungCounter {
        fn chunk_hung(&mut self, _index: u64, _attempt: u32) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Several chunks start together, so no chunk has completed (`stats.average()` is
    /// still `None`) the instant the stalled chunk's watcher spawns. The watcher must
    /// keep re-checking `stats.average()` on later ticks rather than giving up forever
    /// once it observes `None` at spawn time, or the stalled chunk is never rescued.
    #[tokio::test]
    async fn hung_chunk_is_rescued_once_sibling_chunks_establish_an_average() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for i in 0..3 {
            let mock = server
                .mock("PUT", format!("/chunk/{i}").as_str())
                .with_status(200)
                .with_header("ETag", format!("\"etag-{i}\""))
                .create_async()
                .await;
            mocks.push(mock);
        }

        let provider: Arc<dyn ChunkProvider> = Arc::new(HangOnceProvider {
            chunks: vec![Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")],
            hang_index: 2,
            hangs_remaining: AtomicUsize::new(1),
        });
        let urls = Arc::new(
            (0..3)
                .map(|i| UploadUrl { method: "PUT".to_string(), url: format!("{}/chunk/{i}", server.url()), headers: vec![] })
                .collect::<Vec<_>>(),
        );
        let config = TransportConfig {
            concurrency: 3,
            max_retry_per_chunk: 2,
            hung_threshold: Duration::from_millis(20),
            http_client: reqwest::Client::new(),
        };

        let mut handler = HungCounter::default();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            upload_chunks(provider, urls, &config, CancellationToken::new(), &mut handler),
        )
        .await
        .expect("upload hung instead of being rescued")
        .unwrap();

        assert_eq!(result, vec!["etag-0", "etag-1", "etag-2"]);
        assert!(handler.0.load(Ordering::SeqCst) >= 1, "hung watcher never fired");
        for mock in mocks {
            mock.assert_async().await;
        }
    }
}
