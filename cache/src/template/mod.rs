//! Key Evaluator: a small, closed template language that turns a user-supplied key
//! template and a build context into a concrete [`Key`].
//!
//! The language is intentionally tiny (§9 design notes: "best modelled as a fixed,
//! closed set of function dispatchers keyed by name, not as runtime registration"), so
//! parsing is a hand-rolled scan rather than pulling in a template-engine crate — the
//! same philosophy as [`crate::path`]'s small string-slicing helpers and
//! [`maven::Gav`]-style parsing in the teacher.

mod checksum;
mod parser;

use crate::error::{Error, Result};
use crate::kv::Kv;
use parser::Segment;

pub use checksum::checksum_of;

/// Maximum length of an evaluated key, in bytes, after truncation.
pub const MAX_KEY_LEN: usize = 512;

/// Build-time facts the template can interpolate. `os`/`arch` come from the host,
/// the rest from the workflow runner's environment (empty string if unset, which the
/// evaluator treats as a valid, if unhelpful, value — see §4.1).
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub os: String,
    pub arch: String,
    pub workflow: String,
    pub branch: String,
    pub commit_hash: String,
}

impl BuildContext {
    /// Build from the current host and the standard Bitrise environment variables,
    /// through the [`Kv`] seam rather than `std::env` directly, so it can be driven
    /// from a [`crate::kv::MapKv`] in tests.
    pub fn from_env(kv: &impl Kv) -> Self {
        use crate::config::BuildContextEnv as Env;

        let commit_hash = kv
            .get(Env::COMMIT_HASH)
            .filter(|s| !s.is_empty())
            .or_else(|| kv.get(Env::COMMIT_HASH_FALLBACK))
            .unwrap_or_default();

        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            workflow: kv.get(Env::WORKFLOW).unwrap_or_default(),
            branch: kv.get(Env::BRANCH).unwrap_or_default(),
            commit_hash,
        }
    }
}

/// An evaluated cache identity: at most [`MAX_KEY_LEN`] bytes, never containing `,`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    /// Validate and truncate a raw string into a [`Key`] (§3, §4.4.3).
    pub fn validate(raw: &str) -> Result<Self> {
        if raw.contains(',') {
            return Err(Error::configuration("cache key must not contain ','"));
        }
        if raw.is_empty() {
            return Err(Error::configuration("cache key must not be empty"));
        }
        Ok(Self(truncate_to_bytes(raw, MAX_KEY_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Truncate to at most `max_bytes` bytes, backing off to the nearest char boundary so
/// we never split a multi-byte UTF-8 sequence.
fn truncate_to_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Evaluate `template` against `ctx`, resolving `getenv` through `kv` and `checksum`
/// against the current working directory's files.
pub fn evaluate(template: &str, ctx: &BuildContext, kv: &impl Kv) -> Result<Key> {
    let segments = parser::parse(template)?;
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(s) => out.push_str(&s),
            Segment::Field(field) => out.push_str(field.resolve(ctx)),
            Segment::Getenv(name) => out.push_str(&kv.get(&name).unwrap_or_default()),
            Segment::Checksum(globs) => out.push_str(&checksum::checksum_of(&globs)?),
        }
    }
    Key::validate(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MapKv;

    fn ctx() -> BuildContext {
        BuildContext {
            os: "linux".into(),
            arch: "amd64".into(),
            workflow: "primary".into(),
            branch: "main".into(),
            commit_hash: "abc123".into(),
        }
    }

    #[test]
    fn static_template_is_its_own_key() {
        let key = evaluate("my-static", &ctx(), &MapKv::new()).unwrap();
        assert_eq!(key.as_str(), "my-static");
    }

    #[test]
    fn interpolates_fields() {
        let key = evaluate("my-key-{{.CommitHash}}", &ctx(), &MapKv::new()).unwrap();
        assert_eq!(key.as_str(), "my-key-abc123");
    }

    #[test]
    fn interpolates_getenv() {
        let kv = MapKv::new().with("FOO", "bar");
        let key = evaluate("k-{{getenv \"FOO\"}}", &ctx(), &kv).unwrap();
        assert_eq!(key.as_str(), "k-bar");
    }

    #[test]
    fn rejects_comma() {
        let err = evaluate("has,comma", &ctx(), &MapKv::new());
        assert!(err.is_err());
    }

    #[test]
    fn truncates_long_keys() {
        let long = "x".repeat(600);
        let key = evaluate(&long, &ctx(), &MapKv::new()).unwrap();
        assert_eq!(key.as_str().len(), MAX_KEY_LEN);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let a = evaluate("k-{{.Branch}}-{{.Workflow}}", &ctx(), &MapKv::new()).unwrap();
        let b = evaluate("k-{{.Branch}}-{{.Workflow}}", &ctx(), &MapKv::new()).unwrap();
        assert_eq!(a, b);
    }
}
