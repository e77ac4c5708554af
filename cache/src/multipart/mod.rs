//! Upload/Download Orchestrator: drives the multipart protocol with the coordinating
//! cache service (§4.4.1) — prepare, hand off to the Chunk Transport, acknowledge — and
//! exposes the restore lookup. The S3-backed variant lives in [`s3`].
//!
//! Request/response shapes follow `CacheClientBuilder`'s reserve/commit/query split in
//! the pack's GitHub Actions toolkit port (`other_examples/..._gha-toolkit__src-cache.rs.rs`):
//! one small `serde` struct per endpoint, builder-configured retry knobs.

pub mod s3;

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::template::Key;
use crate::transport::{self, ChunkProvider, Handler, TransportConfig, TransportError, UploadUrl};

const MAX_RESTORE_CANDIDATES: usize = 8;

/// Validate a key for wire use: reject `,`, truncate to [`crate::template::MAX_KEY_LEN`]
/// bytes. Shared by both backends (§4.4.3); [`Key::validate`] already enforces this for
/// keys minted by the template evaluator, this re-validates keys arriving from the CLI
/// layer.
pub fn validate_key(raw: &str) -> crate::error::Result<Key> {
    Key::validate(raw)
}

/// Validate and percent-encode a restore candidate list (§4.4.3): at most 8 keys,
/// joined by `,`.
pub fn encode_restore_candidates(keys: &[Key]) -> crate::error::Result<String> {
    if keys.len() > MAX_RESTORE_CANDIDATES {
        return Err(crate::error::Error::configuration(format!(
            "at most {MAX_RESTORE_CANDIDATES} restore candidates are allowed, got {}",
            keys.len()
        )));
    }
    let csv = keys.iter().map(Key::as_str).collect::<Vec<_>>().join(",");
    Ok(percent_encode(&csv))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// A cache service client bound to one base URL and bearer token.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl ServiceClient {
    pub fn new(http: Client, base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into(), access_token: access_token.into() }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.access_token).header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// `POST /multipart-upload` (§4.4.1, §6).
    pub async fn prepare(&self, req: &PrepareRequest) -> Result<PrepareResponse, MultipartError> {
        let url = format!("{}/multipart-upload", self.base_url.trim_end_matches('/'));
        let response = self.authorized(self.http.post(&url).json(req)).send().await?;

        if response.status() != StatusCode::CREATED {
            return Err(MultipartError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// `PATCH /multipart-upload/{id}/acknowledge` (§4.4.1, §6). Must always be called
    /// on a terminal failure path with `successful=false` so the server can abort.
    pub async fn acknowledge(&self, id: &str, req: &AcknowledgeRequest) -> Result<AcknowledgeResponse, MultipartError> {
        let url = format!("{}/multipart-upload/{id}/acknowledge", self.base_url.trim_end_matches('/'));
        let response = self.authorized(self.http.patch(&url).json(req)).send().await?;

        if response.status() != StatusCode::OK {
            return Err(MultipartError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// `GET /restore?cache_keys=<csv>` (§4.4.3, §6).
    pub async fn restore(&self, candidates: &[Key]) -> Result<RestoreResponse, MultipartError> {
        let csv = encode_restore_candidates(candidates).map_err(|e| MultipartError::InvalidKey(e.to_string()))?;
        let url = format!("{}/restore?cache_keys={csv}", self.base_url.trim_end_matches('/'));
        let response = self.authorized(self.http.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MultipartError::NotFound);
        }
        if response.status() != StatusCode::OK {
            return Err(MultipartError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Run the full upload state machine: prepare → upload chunks → acknowledge.
    /// `acknowledge(successful=false)` is always sent before propagating an error. The
    /// chunk provider is built from `prepared.chunk_size_bytes` — the server's
    /// authoritative chunking decision — never from a locally-computed plan, since the
    /// `urls` list it hands back is sized to its own `chunk_count`.
    pub async fn upload(
        &self,
        prepare_req: PrepareRequest,
        archive_path: &std::path::Path,
        transport_config: &TransportConfig,
        outer: tokio_util::sync::CancellationToken,
        handler: &mut impl Handler,
    ) -> Result<(), MultipartError> {
        let archive_size = prepare_req.archive_size_in_bytes;
        let prepared = self.prepare(&prepare_req).await?;

        let file = std::fs::File::open(archive_path).map_err(TransportError::Io)?;
        let provider: Arc<dyn ChunkProvider> =
            Arc::new(crate::transport::FileChunkProvider::new(tokio::fs::File::from_std(file), archive_size, prepared.chunk_size_bytes));

        let urls: Vec<UploadUrl> = prepared
            .urls
            .iter()
            .map(|u| UploadUrl { method: u.method.clone(), url: u.url.clone(), headers: u.headers.clone().into_iter().collect() })
            .collect();

        if provider.num_chunks() != urls.len() {
            let _ = self.acknowledge(&prepared.id, &AcknowledgeRequest { successful: false, etags: None }).await;
            return Err(MultipartError::ServiceError {
                status: 0,
                body: format!(
                    "server chunk_count {} disagrees with chunk_size_bytes {} applied to a {archive_size}-byte archive ({} chunks)",
                    urls.len(),
                    prepared.chunk_size_bytes,
                    provider.num_chunks()
                ),
            });
        }

        let result = transport::upload_chunks(provider, Arc::new(urls), transport_config, outer, handler).await;

        match result {
            Ok(etags) => {
                let ack = self.acknowledge(&prepared.id, &AcknowledgeRequest { successful: true, etags: Some(etags) }).await?;
                log_ack_severity(&ack);
                Ok(())
            }
            Err(transport_err) => {
                let _ = self.acknowledge(&prepared.id, &AcknowledgeRequest { successful: false, etags: None }).await;
                Err(MultipartError::Transport(transport_err))
            }
        }
    }
}

/// The acknowledge response carries a server-chosen severity; translating it into a
/// concrete log call is the CLI's job (it owns the only logging sink) — this just makes
/// the mapping available to call.
pub fn log_ack_severity(ack: &AcknowledgeResponse) -> AckSeverity {
    match ack.severity.as_deref() {
        Some("debug") => AckSeverity::Debug,
        Some("warning") => AckSeverity::Warning,
        _ => AckSeverity::Info,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSeverity {
    Debug,
    Info,
    Warning,
}

#[derive(Debug, Serialize)]
pub struct PrepareRequest {
    pub cache_key: String,
    pub archive_filename: String,
    pub archive_content_type: String,
    pub archive_size_in_bytes: u64,
    pub chunk_size_mb: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PrepareResponse {
    pub id: String,
    pub chunk_size_bytes: u64,
    pub chunk_count: u64,
    pub last_chunk_size_bytes: u64,
    pub urls: Vec<PreparedUrl>,
}

#[derive(Debug, Deserialize)]
pub struct PreparedUrl {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgeRequest {
    pub successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeResponse {
    pub message: String,
    pub severity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestoreResponse {
    pub url: String,
    pub matched_cache_key: String,
}

/// Either backend the Saver/Restorer can be driven against, chosen once from
/// [`crate::config::Config`] at process start.
pub enum CacheBackend {
    Service(ServiceClient),
    S3 { client: aws_sdk_s3::Client, bucket: String },
}

impl CacheBackend {
    /// Build from configuration, constructing an AWS SDK client from the default
    /// credential chain when the backend is S3.
    pub async fn from_config(config: &crate::config::Config, http: Client) -> Self {
        match &config.backend {
            crate::config::Backend::Service { base_url, access_token } => {
                CacheBackend::Service(ServiceClient::new(http, base_url.clone(), access_token.clone()))
            }
            crate::config::Backend::S3 { bucket } => {
                let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                CacheBackend::S3 { client: aws_sdk_s3::Client::new(&sdk_config), bucket: bucket.clone() }
            }
        }
    }

    pub async fn save(
        &self,
        key: &Key,
        archive_path: &std::path::Path,
        archive_size: u64,
        archive_sha256: &str,
        transport_config: &TransportConfig,
        outer: tokio_util::sync::CancellationToken,
        handler: &mut impl Handler,
    ) -> crate::error::Result<()> {
        match self {
            CacheBackend::Service(client) => {
                let req = PrepareRequest {
                    cache_key: key.as_str().to_string(),
                    archive_filename: archive_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                    archive_content_type: "application/zstd".to_string(),
                    archive_size_in_bytes: archive_size,
                    chunk_size_mb: None,
                };
                client.upload(req, archive_path, transport_config, outer, handler).await.map_err(crate::error::Error::from)
            }
            CacheBackend::S3 { client, bucket } => {
                s3::save(client, bucket, key, archive_path, archive_sha256).await.map(|_| ())
            }
        }
    }

    pub async fn restore(
        &self,
        candidates: &[Key],
        dest: &std::path::Path,
        outer: &tokio_util::sync::CancellationToken,
        handler: &mut impl Handler,
    ) -> crate::error::Result<Option<Key>> {
        match self {
            CacheBackend::Service(client) => match client.restore(candidates).await {
                Ok(resp) => {
                    transport::download_with_retry(&client.http, &resp.url, dest, outer, handler).await?;
                    Ok(Some(Key::validate(&resp.matched_cache_key)?))
                }
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(crate::error::Error::from(e)),
            },
            CacheBackend::S3 { client, bucket } => {
                tokio::select! {
                    res = s3::restore(client, bucket, candidates, dest) => res,
                    _ = outer.cancelled() => Err(crate::error::Error::Cancelled),
                }
            }
        }
    }
}

/// Errors at the orchestration layer: permanent 4xx responses, malformed bodies, the
/// distinguished cache-miss sentinel, and transport failures bubbled up with context.
#[derive(thiserror::Error, Debug)]
pub enum MultipartError {
    #[error("cache entry not found")]
    NotFound,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("service returned {status}: {body}")]
    ServiceError { status: u16, body: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}

impl MultipartError {
    async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::ServiceError { status, body }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MultipartError::NotFound) || matches!(self, MultipartError::Transport(t) if matches!(t, transport::TransportError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encodes_restore_csv() {
        let keys = vec![Key::validate("a key").unwrap(), Key::validate("b").unwrap()];
        let encoded = encode_restore_candidates(&keys).unwrap();
        assert_eq!(encoded, "a%20key%2Cb");
    }

    #[test]
    fn rejects_too_many_restore_candidates() {
        let keys: Vec<Key> = (0..9).map(|i| Key::validate(&format!("k{i}")).unwrap()).collect();
        assert!(encode_restore_candidates(&keys).is_err());
    }
}
