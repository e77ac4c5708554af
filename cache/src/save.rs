//! Saver: the top-level save state machine (§4.5.1) composing the Key Evaluator, Skip
//! Oracle, external Path Resolver and Archiver, and the Upload Orchestrator.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::archive::Archiver;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::Kv;
use crate::multipart::CacheBackend;
use crate::paths::PathResolver;
use crate::skip::{CacheHitEnv, SkipReason};
use crate::template::{self, BuildContext, Key};
use crate::tracker::Tracker;
use crate::transport::{Handler, TransportConfig};

/// One save invocation's inputs.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub key_template: String,
    pub paths: Vec<String>,
    /// When true, a restored key alone (regardless of content) is enough to skip —
    /// see `onlyCheckKey` in §4.2.
    pub only_check_key: bool,
}

/// Outcome of one save invocation.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// No candidate path resolved to anything: a clean, zero-exit no-op (§4.5.1).
    NothingToSave,
    Skipped { key: Key, reason: SkipReason },
    Uploaded { key: Key, archive_sha256: String, archive_bytes: u64 },
}

pub struct Saver<R, A, T, K> {
    pub config: Config,
    pub resolver: R,
    pub archiver: A,
    pub tracker: T,
    pub kv: K,
}

impl<R: PathResolver, A: Archiver, T: Tracker, K: Kv> Saver<R, A, T, K> {
    pub fn new(config: Config, resolver: R, archiver: A, tracker: T, kv: K) -> Self {
        Self { config, resolver, archiver, tracker, kv }
    }

    pub async fn save(
        &self,
        req: &SaveRequest,
        http: reqwest::Client,
        outer: CancellationToken,
        handler: &mut impl Handler,
    ) -> Result<SaveOutcome> {
        let ctx = BuildContext::from_env(&self.kv);
        let key = template::evaluate(&req.key_template, &ctx, &self.kv)?;

        let resolved = self.resolver.resolve(&req.paths)?;
        if resolved.is_empty() {
            return Ok(SaveOutcome::NothingToSave);
        }

        let cache_hits = CacheHitEnv::load(&self.kv);
        let (skip, reason) = cache_hits.can_skip_save(&req.key_template, &key, req.only_check_key);
        if skip {
            return Ok(SaveOutcome::Skipped { key, reason });
        }

        let scratch = tempfile::tempdir().map_err(Error::io)?;
        let archive_path = scratch.path().join(archive_filename());
        self.archiver.archive(&resolved, &archive_path)?;

        let archive_sha256 = sha256_hex_of_file(&archive_path)?;
        let archive_bytes = std::fs::metadata(&archive_path).map_err(|e| Error::io_file(e, &archive_path))?.len();

        let (skip_upload, upload_reason) = cache_hits.can_skip_upload(&key, &archive_sha256);
        if skip_upload {
            return Ok(SaveOutcome::Skipped { key, reason: upload_reason });
        }

        let transport_config = TransportConfig {
            concurrency: self.config.max_concurrency.unwrap_or_else(TransportConfig::default_concurrency),
            max_retry_per_chunk: 5,
            hung_threshold: std::time::Duration::from_secs(30),
            http_client: http,
        };

        let backend = CacheBackend::from_config(&self.config, transport_config.http_client.clone()).await;
        backend
            .save(&key, &archive_path, archive_bytes, &archive_sha256, &transport_config, outer, handler)
            .await?;

        self.tracker.enqueue("cache_save", Default::default());

        Ok(SaveOutcome::Uploaded { key, archive_sha256, archive_bytes })
    }
}

fn archive_filename() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    format!("cache-{}.tzst", format_utc_compact(secs))
}

/// `YYYYMMDD-HHMMSS` in UTC, hand-rolled from a Unix timestamp so the crate doesn't need
/// a datetime dependency just for one filename (the CLI layer pulls in `chrono` for its
/// own log timestamps; this stays a pure, dependency-free calendar computation).
fn format_utc_compact(unix_secs: u64) -> String {
    const SECONDS_PER_DAY: u64 = 86_400;
    let days = unix_secs / SECONDS_PER_DAY;
    let secs_of_day = unix_secs % SECONDS_PER_DAY;

    let (year, month, day) = civil_from_days(days as i64);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;

    format!("{year:04}{month:02}{day:02}-{hour:02}{minute:02}{second:02}")
}

/// Howard Hinnant's days-from-civil algorithm, inverted: days since epoch -> (y, m, d).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn sha256_hex_of_file(path: &std::path::Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io_file(e, path))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| Error::io_file(e, path))?;
    Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_known_timestamp() {
        // 2024-01-02T03:04:05Z
        assert_eq!(format_utc_compact(1_704_165_845), "20240102-030405");
    }
}
