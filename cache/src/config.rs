//! Process-wide configuration, assembled once from the environment the host workflow
//! runner exposes (§6 of the specification) and validated up front so configuration
//! errors are reported before any network or file-system work starts.

use crate::error::{Error, Result};

/// Default compression level used when the step does not override it.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 3;

/// Coordinating-service backed cache, or a direct S3-backed cache.
#[derive(Debug, Clone)]
pub enum Backend {
    Service {
        base_url: String,
        access_token: String,
    },
    S3 {
        bucket: String,
    },
}

/// Top-level configuration for one save or restore invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    /// zstd compression level, validated to be in `[1, 19]`.
    pub compression_level: u32,
    /// Concurrency override for the chunk transport, `None` means "derive from CPU count".
    pub max_concurrency: Option<usize>,
}

impl Config {
    /// Build the service-backed configuration from the standard environment variables.
    ///
    /// Required: `BITRISEIO_ABCS_API_URL`, `BITRISEIO_BITRISE_SERVICES_ACCESS_TOKEN`.
    /// Optional: `BITRISEIO_DEPENDENCY_CACHE_MAX_CONCURRENCY` (uint).
    pub fn from_env_service() -> Result<Self> {
        let base_url = require_env("BITRISEIO_ABCS_API_URL")?;
        let access_token = require_env("BITRISEIO_BITRISE_SERVICES_ACCESS_TOKEN")?;
        let max_concurrency = optional_env_uint("BITRISEIO_DEPENDENCY_CACHE_MAX_CONCURRENCY")?;

        Ok(Self {
            backend: Backend::Service { base_url, access_token },
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_concurrency,
        })
    }

    /// Build the S3-backed configuration.
    pub fn from_env_s3(bucket: impl Into<String>) -> Result<Self> {
        let max_concurrency = optional_env_uint("BITRISEIO_DEPENDENCY_CACHE_MAX_CONCURRENCY")?;
        Ok(Self {
            backend: Backend::S3 { bucket: bucket.into() },
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_concurrency,
        })
    }

    pub fn with_compression_level(mut self, level: u32) -> Result<Self> {
        if !(1..=19).contains(&level) {
            return Err(Error::configuration(format!(
                "compression level must be in [1, 19], got {level}"
            )));
        }
        self.compression_level = level;
        Ok(self)
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::configuration(format!("missing required environment variable {name}")))
}

fn optional_env_uint(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) if raw.is_empty() => Ok(None),
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::configuration(format!("{name} must be a positive integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Environment variables the workflow runner exposes for build context (§6): the key
/// template's `{{.Field}}` substitutions read `WORKFLOW`/`BRANCH`/`COMMIT_HASH`
/// (`COMMIT_HASH_FALLBACK` as its fallback), and `cache::paths` anchors relative path
/// patterns to `SOURCE_DIR`.
pub struct BuildContextEnv;

impl BuildContextEnv {
    pub const WORKFLOW: &'static str = "BITRISE_TRIGGERED_WORKFLOW_ID";
    pub const BRANCH: &'static str = "BITRISE_GIT_BRANCH";
    pub const COMMIT_HASH: &'static str = "BITRISE_GIT_COMMIT";
    pub const COMMIT_HASH_FALLBACK: &'static str = "GIT_CLONE_COMMIT_HASH";
    pub const SOURCE_DIR: &'static str = "BITRISE_SOURCE_DIR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_compression_level() {
        let cfg = Config {
            backend: Backend::S3 { bucket: "b".into() },
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_concurrency: None,
        };
        assert!(cfg.clone().with_compression_level(0).is_err());
        assert!(cfg.clone().with_compression_level(20).is_err());
        assert!(cfg.with_compression_level(19).is_ok());
    }
}
