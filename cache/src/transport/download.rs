//! Symmetric download path (§4.3.7): a single streaming reader wrapped in bounded
//! retries with a fixed inter-attempt wait. Far simpler than the upload side because
//! there is no chunking or concurrency to manage.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::is_retryable_status;

use super::{Handler, TransportError};

const DEFAULT_ATTEMPTS: u32 = 3;
const RETRY_WAIT: Duration = Duration::from_secs(5);

/// Stream `url` to `dest`, retrying up to `DEFAULT_ATTEMPTS` times with a fixed 5 s
/// wait between attempts. A 404 aborts immediately as [`TransportError::NotFound`];
/// any other non-success status is retried only if [`is_retryable_status`] says so
/// (429 or 5xx) — a permanent 4xx is returned after the current attempt, same as
/// `error::is_retryable_status`'s contract (§7). Connection errors, short reads, and a
/// mismatched `Content-Length` are retried even though they would not otherwise be
/// classified as transient. `outer` cancels an in-flight attempt or the wait between
/// attempts, mirroring the upload side's retry loop.
pub async fn download_with_retry(
    client: &Client,
    url: &str,
    dest: &Path,
    outer: &CancellationToken,
    handler: &mut impl Handler,
) -> Result<(), TransportError> {
    let mut last_err = None;

    for attempt in 1..=DEFAULT_ATTEMPTS {
        if outer.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let result = tokio::select! {
            res = try_download_once(client, url, dest, handler) => res,
            _ = outer.cancelled() => return Err(TransportError::Cancelled),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(TransportError::NotFound) => return Err(TransportError::NotFound),
            Err(err @ TransportError::ChunkFailed { status, .. }) if status != 0 && !is_retryable_status(status) => {
                return Err(err);
            }
            Err(err) => {
                last_err = Some(err);
                if attempt < DEFAULT_ATTEMPTS {
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_WAIT) => {}
                        _ = outer.cancelled() => return Err(TransportError::Cancelled),
                    }
                }
            }
        }
    }

    Err(last_err.unwrap_or(TransportError::Cancelled))
}

async fn try_download_once(
    client: &Client,
    url: &str,
    dest: &Path,
    handler: &mut impl Handler,
) -> Result<(), TransportError> {
    let response = client.get(url).send().await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound);
    }
    if !response.status().is_success() {
        return Err(TransportError::ChunkFailed {
            index: 0,
            status: response.status().as_u16(),
            body: String::new(),
        });
    }

    let expected_len = response.content_length();
    let mut received = 0u64;
    handler.download_progress(0, expected_len);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        handler.download_progress(received, expected_len);
    }
    file.flush().await?;

    if let Some(expected) = expected_len {
        if received != expected {
            return Err(TransportError::ChunkFailed {
                index: 0,
                status: 0,
                body: format!("expected {expected} bytes, got {received} (unexpected EOF or invalid Content-Length)"),
            });
        }
    }

    Ok(())
}
