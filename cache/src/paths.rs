//! Path resolution: turning user-supplied glob patterns into concrete files.
//!
//! The Saver's own "which paths make up this archive" step is an external collaborator
//! by design (see the crate docs): callers may supply their own [`PathResolver`]. The
//! default, glob-matching implementation here is also reused by the Key Evaluator's
//! `checksum` function, since both need the same "pattern → matching regular files on
//! disk" semantics.

use std::path::{Path, PathBuf};

use crate::config::BuildContextEnv;
use crate::error::{Error, Result};

/// Resolves a list of path patterns (literal paths or doublestar globs) to absolute
/// paths. Implemented as a trait so the Saver can be driven with a synthetic resolver
/// in tests, matching the teacher's pattern of isolating file-system enumeration behind
/// a small seam.
pub trait PathResolver {
    fn resolve(&self, patterns: &[String]) -> Result<Vec<PathBuf>>;
}

/// Default resolver: doublestar glob matching (`doublestar::glob`, which walks the
/// filesystem itself) rooted at the current working directory, with `~` expanded
/// against the user's home directory. A relative pattern (neither `~`- nor
/// `/`-prefixed) is anchored to `BITRISE_SOURCE_DIR` when that variable is set, the
/// same way the teacher anchors its own relative path patterns to its working
/// directory rather than wherever the process happened to be invoked from.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobPathResolver;

impl PathResolver for GlobPathResolver {
    fn resolve(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let base_dir = source_dir();
        let mut matched = Vec::new();
        for pattern in patterns {
            matched.extend(match_pattern(&anchor(pattern, base_dir.as_deref()))?);
        }
        Ok(matched)
    }
}

/// `BITRISE_SOURCE_DIR`, the checkout root the workflow runner exposes, if set to a
/// non-empty value.
fn source_dir() -> Option<PathBuf> {
    std::env::var(BuildContextEnv::SOURCE_DIR).ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

/// Join a relative pattern onto `base_dir`; absolute patterns and `~`-prefixed ones
/// (resolved by [`expand_home`] later) pass through untouched.
fn anchor(pattern: &str, base_dir: Option<&Path>) -> String {
    match base_dir {
        Some(base) if !pattern.starts_with('/') && !pattern.starts_with('~') => {
            base.join(pattern).to_string_lossy().into_owned()
        }
        _ => pattern.to_string(),
    }
}

/// Expand a leading `~` against the home directory, same convention the checksum
/// function in the Key Evaluator relies on.
pub fn expand_home(pattern: &str) -> Result<String> {
    if let Some(rest) = pattern.strip_prefix('~') {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::configuration("cannot expand '~': no home directory"))?;
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        Ok(home.join(rest).to_string_lossy().into_owned())
    } else {
        Ok(pattern.to_string())
    }
}

/// Match a single literal path or doublestar glob against the current directory,
/// returning only regular files (directories are discarded).
pub fn match_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = expand_home(pattern)?;
    let pattern_path = Path::new(&pattern);

    // A literal, glob-free path is checked directly rather than run through the glob
    // walker, which also covers absolute paths outside the current directory.
    if !has_glob_meta(&pattern) {
        return Ok(if pattern_path.is_file() { vec![pattern_path.to_path_buf()] } else { Vec::new() });
    }

    let mut out = Vec::new();
    for entry in doublestar::glob(&pattern)
        .map_err(|e| Error::configuration(format!("invalid glob {pattern:?}: {e}")))?
    {
        match entry {
            Ok(path) if path.is_file() => out.push(path),
            // An unreadable directory entry is skipped, not fatal to the whole glob.
            Ok(_) | Err(_) => {}
        }
    }
    Ok(out)
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn matches_literal_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hi").unwrap();
        let found = match_pattern(file.to_str().unwrap()).unwrap();
        assert_eq!(found, vec![file]);
    }

    #[test]
    fn matches_glob_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"hi").unwrap();
        fs::write(dir.path().join("sub/c.log"), b"hi").unwrap();
        let pattern = format!("{}/**/*.txt", dir.path().to_str().unwrap());
        let found = match_pattern(&pattern).unwrap();
        assert_eq!(found, vec![dir.path().join("sub/b.txt")]);
    }

    #[test]
    fn missing_literal_path_yields_empty() {
        let found = match_pattern("/no/such/path/should/exist").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn anchor_joins_relative_patterns_onto_base_dir() {
        let base = Path::new("/checkout");
        assert_eq!(anchor("build/**/*.o", Some(base)), "/checkout/build/**/*.o");
        assert_eq!(anchor("/already/absolute", Some(base)), "/already/absolute");
        assert_eq!(anchor("~/cache", Some(base)), "~/cache");
        assert_eq!(anchor("build/**/*.o", None), "build/**/*.o");
    }
}
