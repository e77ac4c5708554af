//! Skip Oracle: decides whether a save or an upload can be elided, based on what the
//! Restorer already advertised earlier in the same workflow run (§4.2).
//!
//! Grounded on the same "small lookup table over environment-advertised facts" shape as
//! the teacher's account database: a read-only view built once, consulted by pure
//! decision functions.

use std::collections::HashMap;

use crate::kv::{Kv, CACHE_HIT_PREFIX};
use crate::template::Key;

/// Why a skip decision came out the way it did — surfaced to logging, never matched on
/// by callers other than for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The raw template and the evaluated key are identical: the key is static, so it
    /// is reused across runs whose contents may differ. Never skip.
    KeyNotDynamic,
    /// No `BITRISE_CACHE_HIT__*` entries at all: nothing was restored this run.
    NoRestore,
    /// The evaluated key matches a restored key, and the caller only cares that the key
    /// itself was seen before (not its specific content).
    RestoreSameUniqueKey,
    /// The evaluated key matches a restored key, but the caller wants content-equality,
    /// and restoring a key doesn't guarantee the about-to-be-archived bytes match it.
    RestoreSameKeyButContentsMayDiffer,
    /// Some other key was restored, not this one.
    RestoreOtherKey,
    /// The freshly-computed archive digest equals what was restored for this key.
    ChecksumMatch,
    /// The freshly-computed archive digest differs from what was restored for this key.
    ChecksumMismatch,
}

/// A read-only view of every `BITRISE_CACHE_HIT__*` entry advertised so far, keyed by
/// the restored cache key with the archive SHA-256 digest as the value.
#[derive(Debug, Clone, Default)]
pub struct CacheHitEnv {
    hits: HashMap<String, String>,
}

impl CacheHitEnv {
    /// Load from any [`Kv`] backend (the real process environment, or a test double).
    pub fn load(kv: &impl Kv) -> Self {
        let hits = kv
            .list_prefixed(CACHE_HIT_PREFIX)
            .into_iter()
            .map(|(name, digest)| (name[CACHE_HIT_PREFIX.len()..].to_string(), digest))
            .collect();
        Self { hits }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    fn digest_for(&self, key: &str) -> Option<&str> {
        self.hits.get(key).map(String::as_str)
    }

    /// `canSkipSave(rawTemplate, evaluatedKey, onlyCheckKey)` (§4.2).
    pub fn can_skip_save(&self, raw_template: &str, evaluated_key: &Key, only_check_key: bool) -> (bool, SkipReason) {
        if raw_template == evaluated_key.as_str() {
            return (false, SkipReason::KeyNotDynamic);
        }
        if self.is_empty() {
            return (false, SkipReason::NoRestore);
        }
        if self.digest_for(evaluated_key.as_str()).is_some() {
            return if only_check_key {
                (true, SkipReason::RestoreSameUniqueKey)
            } else {
                (false, SkipReason::RestoreSameKeyButContentsMayDiffer)
            };
        }
        (false, SkipReason::RestoreOtherKey)
    }

    /// `canSkipUpload(newKey, newDigest)` (§4.2).
    pub fn can_skip_upload(&self, new_key: &Key, new_digest: &str) -> (bool, SkipReason) {
        if self.is_empty() {
            return (false, SkipReason::NoRestore);
        }
        match self.digest_for(new_key.as_str()) {
            Some(digest) if digest == new_digest => (true, SkipReason::ChecksumMatch),
            Some(_) => (false, SkipReason::ChecksumMismatch),
            None => (false, SkipReason::RestoreOtherKey),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MapKv;

    fn key(s: &str) -> Key {
        Key::validate(s).unwrap()
    }

    #[test]
    fn static_key_never_skips_save() {
        let env = CacheHitEnv::load(&MapKv::new());
        let (skip, reason) = env.can_skip_save("my-static", &key("my-static"), true);
        assert!(!skip);
        assert_eq!(reason, SkipReason::KeyNotDynamic);
    }

    #[test]
    fn no_restore_never_skips() {
        let env = CacheHitEnv::load(&MapKv::new());
        let (skip, reason) = env.can_skip_save("k-{{.CommitHash}}", &key("k-abc"), true);
        assert!(!skip);
        assert_eq!(reason, SkipReason::NoRestore);
    }

    #[test]
    fn unique_key_restore_skips_save() {
        let kv = MapKv::new().with("BITRISE_CACHE_HIT__k-abc", "deadbeef");
        let env = CacheHitEnv::load(&kv);
        let (skip, reason) = env.can_skip_save("k-{{.CommitHash}}", &key("k-abc"), true);
        assert!(skip);
        assert_eq!(reason, SkipReason::RestoreSameUniqueKey);
    }

    #[test]
    fn same_key_without_only_check_key_does_not_skip() {
        let kv = MapKv::new().with("BITRISE_CACHE_HIT__k-abc", "deadbeef");
        let env = CacheHitEnv::load(&kv);
        let (skip, reason) = env.can_skip_save("k-{{.CommitHash}}", &key("k-abc"), false);
        assert!(!skip);
        assert_eq!(reason, SkipReason::RestoreSameKeyButContentsMayDiffer);
    }

    #[test]
    fn checksum_match_skips_upload() {
        let kv = MapKv::new().with("BITRISE_CACHE_HIT__k-abc", "deadbeef");
        let env = CacheHitEnv::load(&kv);
        let (skip, reason) = env.can_skip_upload(&key("k-abc"), "deadbeef");
        assert!(skip);
        assert_eq!(reason, SkipReason::ChecksumMatch);
    }

    #[test]
    fn checksum_mismatch_does_not_skip_upload() {
        let kv = MapKv::new().with("BITRISE_CACHE_HIT__k-abc", "deadbeef");
        let env = CacheHitEnv::load(&kv);
        let (skip, reason) = env.can_skip_upload(&key("k-abc"), "feedface");
        assert!(!skip);
        assert_eq!(reason, SkipReason::ChecksumMismatch);
    }

    #[test]
    fn other_key_restored_does_not_skip_upload() {
        let kv = MapKv::new().with("BITRISE_CACHE_HIT__other-key", "deadbeef");
        let env = CacheHitEnv::load(&kv);
        let (skip, reason) = env.can_skip_upload(&key("k-abc"), "deadbeef");
        assert!(!skip);
        assert_eq!(reason, SkipReason::RestoreOtherKey);
    }
}
