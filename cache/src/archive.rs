//! Archiver: the tar-over-zstd boundary, consumed as `Archive(paths) -> file` /
//! `Extract(file, dir)` (§1 non-goals list the archive format itself as an external
//! collaborator — modelled here as a trait with one default implementation).
//!
//! The streaming `zstd::Encoder`/`Decoder` wrapper follows `crazy-deduper`'s use of
//! `zstd::Encoder`/`Decoder` over a `BufWriter`/`BufReader`, rather than the `bulk`
//! one-shot API the adaptive-pipeline teacher uses for small in-memory payloads —
//! archives here can be arbitrarily large, so streaming is the right fit.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Produces and extracts the compressed archive format. A trait so callers can swap in
/// a different format; [`TarZstdArchiver`] is the default.
pub trait Archiver {
    /// Archive `paths` into a single file at `dest`.
    fn archive(&self, paths: &[PathBuf], dest: &Path) -> Result<()>;
    /// Extract the archive at `src` into `dest_dir`.
    fn extract(&self, src: &Path, dest_dir: &Path) -> Result<()>;
}

/// tar-over-zstd, the format named in the external interfaces (§6: `.tzst` extension,
/// content-type `application/zstd`).
#[derive(Debug, Clone, Copy)]
pub struct TarZstdArchiver {
    pub compression_level: i32,
}

impl TarZstdArchiver {
    pub fn new(compression_level: u32) -> Self {
        Self { compression_level: compression_level as i32 }
    }
}

impl Archiver for TarZstdArchiver {
    fn archive(&self, paths: &[PathBuf], dest: &Path) -> Result<()> {
        let file = File::create(dest).map_err(|e| Error::io_file(e, dest))?;
        let encoder = zstd::Encoder::new(BufWriter::new(file), self.compression_level)
            .map_err(|e| Error::io_file(e, dest))?;
        let mut tar = tar::Builder::new(encoder);

        for path in paths {
            add_path(&mut tar, path)?;
        }

        let encoder = tar.into_inner().map_err(|e| Error::io_file(e, dest))?;
        encoder.finish().map_err(|e| Error::io_file(e, dest))?;
        Ok(())
    }

    fn extract(&self, src: &Path, dest_dir: &Path) -> Result<()> {
        let file = File::open(src).map_err(|e| Error::io_file(e, src))?;
        let decoder = zstd::Decoder::new(file).map_err(|e| Error::io_file(e, src))?;
        let mut tar = tar::Archive::new(decoder);
        std::fs::create_dir_all(dest_dir).map_err(|e| Error::io_file(e, dest_dir))?;
        tar.unpack(dest_dir).map_err(|e| Error::io_file(e, dest_dir))?;
        Ok(())
    }
}

/// Add one resolved path to the tar, archiving a directory's regular files recursively
/// under their relative path.
fn add_path<W: std::io::Write>(tar: &mut tar::Builder<W>, path: &Path) -> Result<()> {
    if path.is_dir() {
        for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(path.parent().unwrap_or(path)).unwrap_or(entry.path());
            tar.append_path_with_name(entry.path(), relative).map_err(|e| Error::io_file(e, entry.path()))?;
        }
    } else {
        let name = path.file_name().map(Path::new).unwrap_or(path);
        tar.append_path_with_name(path, name).map_err(|e| Error::io_file(e, path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn round_trips_a_single_file() {
        let src_dir = tempfile::tempdir().unwrap();
        let file = src_dir.path().join("a.txt");
        fs::write(&file, b"hello archive").unwrap();

        let archive_path = src_dir.path().join("out.tzst");
        let archiver = TarZstdArchiver::new(3);
        archiver.archive(&[file.clone()], &archive_path).unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        archiver.extract(&archive_path, dest_dir.path()).unwrap();

        let restored = fs::read(dest_dir.path().join("a.txt")).unwrap();
        assert_eq!(restored, b"hello archive");
    }
}
