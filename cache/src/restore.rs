//! Restorer: the top-level restore state machine (§4.5.2).

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::archive::Archiver;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::{Kv, CACHE_HIT_VAR};
use crate::multipart::CacheBackend;
use crate::template::Key;
use crate::transport::Handler;

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Candidate keys in priority order; empties are dropped, order preserved (§4.5.2).
    pub candidate_keys: Vec<String>,
    pub extract_to: PathBuf,
}

#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    Miss,
    Hit { matched_key: Key, exact: bool, archive_sha256: String },
}

pub struct Restorer<A, K> {
    pub config: Config,
    pub archiver: A,
    pub kv: K,
}

impl<A: Archiver, K: Kv> Restorer<A, K> {
    pub fn new(config: Config, archiver: A, kv: K) -> Self {
        Self { config, archiver, kv }
    }

    pub async fn restore(
        &mut self,
        req: &RestoreRequest,
        http: reqwest::Client,
        outer: CancellationToken,
        handler: &mut impl Handler,
    ) -> Result<RestoreOutcome> {
        let candidates = self.evaluate_candidates(&req.candidate_keys)?;
        if candidates.is_empty() {
            self.kv.set(CACHE_HIT_VAR, "false");
            return Ok(RestoreOutcome::Miss);
        }

        let backend = CacheBackend::from_config(&self.config, http).await;
        let scratch = tempfile::tempdir().map_err(Error::io)?;
        let download_path = scratch.path().join("restored.tzst");

        let matched = backend.restore(&candidates, &download_path, &outer, handler).await?;

        let Some(matched_key) = matched else {
            self.kv.set(CACHE_HIT_VAR, "false");
            return Ok(RestoreOutcome::Miss);
        };

        let archive_sha256 = sha256_hex_of_file(&download_path)?;
        self.archiver.extract(&download_path, &req.extract_to)?;

        let exact = candidates.first().map(|k| k.as_str() == matched_key.as_str()).unwrap_or(false);
        self.kv.set(CACHE_HIT_VAR, if exact { "exact" } else { "partial" });
        self.kv.set(&format!("BITRISE_CACHE_HIT__{}", matched_key.as_str()), &archive_sha256);

        Ok(RestoreOutcome::Hit { matched_key, exact, archive_sha256 })
    }

    /// Drop empty candidates, preserve order, validate each (§4.5.2, §4.4.3).
    fn evaluate_candidates(&self, raw: &[String]) -> Result<Vec<Key>> {
        raw.iter()
            .filter(|s| !s.is_empty())
            .map(|s| Key::validate(s))
            .collect()
    }
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
    use crate::kv::MapKv;

    #[test]
    fn drops_empty_candidates_preserving_order() {
        let restorer = Restorer {
            config: Config { backend: crate::config::Backend::S3 { bucket: "b".into() }, compression_level: 3, max_concurrency: None },
            archiver: crate::archive::TarZstdArchiver::new(3),
            kv: MapKv::new(),
        };
        let got = restorer.evaluate_candidates(&["".into(), "a".into(), "".into(), "b".into()]).unwrap();
        assert_eq!(got.iter().map(Key::as_str).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
