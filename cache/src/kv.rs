//! Cross-process coordination with the host workflow runner, modelled as an explicit
//! key/value interface so the real environment-variable bridge can be swapped for an
//! in-memory map in tests, the same way [`crate`]'s other external collaborators are
//! modelled as traits rather than hard-wired globals.

use std::collections::HashMap;
use std::env;

/// Prefix under which the Restorer advertises prior restore outcomes (§6, §4.2).
pub const CACHE_HIT_PREFIX: &str = "BITRISE_CACHE_HIT__";

/// The exact-or-partial hit indicator variable name.
pub const CACHE_HIT_VAR: &str = "BITRISE_CACHE_HIT";

/// A small get/set/unset/list interface over a process-wide string keyed store.
pub trait Kv {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str);
    fn unset(&mut self, name: &str);
    /// List every entry whose name starts with `prefix`, as `(name, value)` pairs.
    fn list_prefixed(&self, prefix: &str) -> Vec<(String, String)>;
}

/// The real bridge: process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvKv;

impl Kv for EnvKv {
    fn get(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }

    fn set(&mut self, name: &str, value: &str) {
        // SAFETY: the CLI is single-threaded at the point these are called (before any
        // worker task reads the environment), matching the host runner's own contract.
        unsafe { env::set_var(name, value) };
    }

    fn unset(&mut self, name: &str) {
        unsafe { env::remove_var(name) };
    }

    fn list_prefixed(&self, prefix: &str) -> Vec<(String, String)> {
        env::vars().filter(|(name, _)| name.starts_with(prefix)).collect()
    }
}

/// An in-memory test double, so [`crate::skip`] and [`crate::restore`] logic can be
/// exercised without touching the real process environment.
#[derive(Debug, Default, Clone)]
pub struct MapKv {
    entries: HashMap<String, String>,
}

impl MapKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }
}

impl Kv for MapKv {
    fn get(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) {
        self.entries.insert(name.to_string(), value.to_string());
    }

    fn unset(&mut self, name: &str) {
        self.entries.remove(name);
    }

    fn list_prefixed(&self, prefix: &str) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_kv_round_trips() {
        let mut kv = MapKv::new();
        kv.set("FOO", "bar");
        assert_eq!(kv.get("FOO").as_deref(), Some("bar"));
        kv.unset("FOO");
        assert_eq!(kv.get("FOO"), None);
    }

    #[test]
    fn list_prefixed_filters() {
        let kv = MapKv::new()
            .with("BITRISE_CACHE_HIT__my-key", "abcd")
            .with("OTHER", "x");
        let hits = kv.list_prefixed(CACHE_HIT_PREFIX);
        assert_eq!(hits, vec![("BITRISE_CACHE_HIT__my-key".to_string(), "abcd".to_string())]);
    }
}
