//! `checksum p1 p2 ...` — content-addressed hash over a deterministic file set (§4.1).

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::paths;

/// Resolve each glob/path argument, then fold the matched files into a single hex
/// SHA-256 string, per the reproducibility rules in §4.1:
///
/// - exactly one file  → hex digest of that file's bytes
/// - multiple files    → sort paths as raw byte strings, chain each file's *binary*
///                        digest (not hex) into a running SHA-256, emit the hex of that
/// - zero files         → empty string (caller is expected to warn, not fail)
pub fn checksum_of(patterns: &[String]) -> Result<String> {
    let mut files = Vec::new();
    for pattern in patterns {
        files.extend(paths::match_pattern(pattern)?);
    }

    if files.is_empty() {
        return Ok(String::new());
    }

    if files.len() == 1 {
        return match digest_file(&files[0]) {
            Ok(digest) => Ok(hex(&digest)),
            Err(_) => Ok(String::new()),
        };
    }

    files.sort_by(|a, b| a.as_os_str().as_encoded_bytes().cmp(b.as_os_str().as_encoded_bytes()));

    let mut running = Sha256::new();
    for file in &files {
        match digest_file(file) {
            Ok(digest) => running.update(digest),
            // I/O error reading one file: skip it, per §4.1 ("log and skip, do not fail").
            Err(_) => continue,
        }
    }
    Ok(hex(&running.finalize()))
}

fn digest_file(path: &std::path::Path) -> std::io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn single_file_is_plain_hex_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        let got = checksum_of(&[file.to_str().unwrap().to_string()]).unwrap();
        let want = hex(&Sha256::digest(b"hello"));
        assert_eq!(got, want);
    }

    #[test]
    fn multi_file_checksum_is_order_independent_of_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"aaa").unwrap();
        fs::write(&b, b"bbb").unwrap();

        let forward = checksum_of(&[a.to_str().unwrap().to_string(), b.to_str().unwrap().to_string()]).unwrap();
        let reverse = checksum_of(&[b.to_str().unwrap().to_string(), a.to_str().unwrap().to_string()]).unwrap();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn zero_files_yields_empty_string() {
        let got = checksum_of(&["/no/such/path/at/all".to_string()]).unwrap();
        assert_eq!(got, "");
    }
}
