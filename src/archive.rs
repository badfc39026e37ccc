// src/archive.rs

//! Artifact archives
//!
//! Build results are stored as gzip-compressed tar streams. Entries are
//! written in sorted order so packing the same tree twice yields the same
//! byte stream modulo timestamps.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Packs the contents of `dir` into a gzip'd tar archive at `dst`.
/// Paths inside the archive are relative to `dir`.
pub fn pack(dir: &Path, dst: &Path) -> Result<()> {
    let cache_err = |op: &'static str, path: &Path, e: std::io::Error| Error::CacheIo {
        operation: op,
        path: path.to_path_buf(),
        cause: e.to_string(),
    };

    let out = File::create(dst).map_err(|e| cache_err("create", dst, e))?;
    let enc = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(enc);
    builder.follow_symlinks(false);

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::CacheIo {
            operation: "walk",
            path: dir.to_path_buf(),
            cause: e.to_string(),
        })?;
        if entry.file_type().is_file() || entry.file_type().is_symlink() {
            entries.push(entry.path().to_path_buf());
        }
    }
    entries.sort();

    for path in entries {
        let rel = path.strip_prefix(dir).expect("walked path is below its root");
        builder
            .append_path_with_name(&path, rel)
            .map_err(|e| cache_err("append", &path, e))?;
    }

    let enc = builder.into_inner().map_err(|e| cache_err("finish", dst, e))?;
    enc.finish().map_err(|e| cache_err("finish", dst, e))?;
    Ok(())
}

/// Extracts a gzip'd tar archive into `dst`.
pub fn unpack(archive: &Path, dst: &Path) -> Result<()> {
    let cache_err = |op: &'static str, e: std::io::Error| Error::CacheIo {
        operation: op,
        path: archive.to_path_buf(),
        cause: e.to_string(),
    };

    std::fs::create_dir_all(dst).map_err(|e| cache_err("extract", e))?;
    let file = File::open(archive).map_err(|e| cache_err("open", e))?;
    let dec = GzDecoder::new(BufReader::new(file));
    let mut ar = tar::Archive::new(dec);
    ar.unpack(dst).map_err(|e| cache_err("extract", e))?;
    Ok(())
}

/// Reads a single file out of a gzip'd tar archive without unpacking it.
/// The entry may be stored under the plain name or with a `./` or
/// `package/` prefix. Returns `None` if no such entry exists.
pub fn read_entry(archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let cache_err = |op: &'static str, e: std::io::Error| Error::CacheIo {
        operation: op,
        path: archive.to_path_buf(),
        cause: e.to_string(),
    };

    let file = File::open(archive).map_err(|e| cache_err("open", e))?;
    let dec = GzDecoder::new(BufReader::new(file));
    let mut ar = tar::Archive::new(dec);

    let candidates = [
        name.to_string(),
        format!("./{}", name),
        format!("package/{}", name),
    ];
    for entry in ar.entries().map_err(|e| cache_err("read", e))? {
        let mut entry = entry.map_err(|e| cache_err("read", e))?;
        let path = entry.path().map_err(|e| cache_err("read", e))?;
        let path_str = path.to_string_lossy().to_string();
        if !candidates.iter().any(|c| *c == path_str) {
            continue;
        }

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| cache_err("read", e))?;
        return Ok(Some(content));
    }
    Ok(None)
}
