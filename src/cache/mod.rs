// src/cache/mod.rs

//! The local artifact cache
//!
//! Maps a package version to a `<version>.tar.gz` below a single flat
//! directory. Insertion goes through a temp file in the same directory and
//! an atomic rename, so concurrent readers never observe a torn artifact.

pub mod remote;

use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

pub use remote::{
    remote_cache_for, ArtifactRef, GsutilRemoteCache, MinioRemoteCache, NoRemoteCache,
    PullOnlyRemoteCache, PushOnlyRemoteCache, RemoteCache,
};

/// A filesystem-backed cache of build artifacts keyed by package version
#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    /// Opens (and creates, if necessary) a local cache at `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::CacheIo {
            operation: "create",
            path: dir.to_path_buf(),
            cause: e.to_string(),
        })?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// The directory this cache stores artifacts in.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// The on-disk path of an artifact and whether it is present.
    pub fn location(&self, version: &str) -> (PathBuf, bool) {
        let path = self.dir.join(format!("{}.tar.gz", version));
        let present = path.is_file();
        (path, present)
    }

    /// Whether an artifact for `version` is present.
    pub fn contains(&self, version: &str) -> bool {
        self.location(version).1
    }

    /// A temp file in the cache directory for writers to stream into;
    /// finish with [`LocalCache::insert`]. Keeping the temp file on the
    /// same filesystem makes the final rename atomic.
    pub fn slot(&self) -> Result<NamedTempFile> {
        NamedTempFile::new_in(&self.dir).map_err(|e| Error::CacheIo {
            operation: "create",
            path: self.dir.clone(),
            cause: e.to_string(),
        })
    }

    /// Moves a finished artifact into its final location. The rename is
    /// atomic; concurrent readers see either the old or the new state.
    pub fn insert(&self, version: &str, src: NamedTempFile) -> Result<PathBuf> {
        let (dst, _) = self.location(version);
        src.persist(&dst).map_err(|e| Error::CacheIo {
            operation: "insert",
            path: dst.clone(),
            cause: e.to_string(),
        })?;
        debug!(version, path = %dst.display(), "inserted artifact into local cache");
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_location_and_contains() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();

        let (path, present) = cache.location("abc123");
        assert!(!present);
        assert!(path.ends_with("abc123.tar.gz"));

        std::fs::write(&path, b"artifact").unwrap();
        assert!(cache.contains("abc123"));
    }

    #[test]
    fn test_insert_moves_slot_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();

        let mut slot = cache.slot().unwrap();
        slot.write_all(b"artifact bytes").unwrap();
        let path = cache.insert("deadbeef", slot).unwrap();

        assert!(cache.contains("deadbeef"));
        assert_eq!(std::fs::read(path).unwrap(), b"artifact bytes");
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/cache");
        let cache = LocalCache::new(&nested).unwrap();
        assert!(cache.directory().is_dir());
    }
}
