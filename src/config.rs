// src/config.rs

//! Process-wide settings captured from the environment
//!
//! All environment variables that influence the engine are read exactly
//! once at startup into a [`Settings`] value which is passed down
//! explicitly. Deep code paths never consult the environment themselves.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Environment variable naming the application root path
pub const ENV_APPLICATION_ROOT: &str = "APPLICATION_ROOT";
/// Environment variable enabling remote caching under a bucket
pub const ENV_REMOTE_CACHE_BUCKET: &str = "REMOTE_CACHE_BUCKET";
/// Environment variable selecting the remote cache provider
pub const ENV_REMOTE_CACHE_STORAGE: &str = "REMOTE_CACHE_STORAGE";
/// Environment variable overriding the local cache directory
pub const ENV_CACHE_DIR: &str = "CACHE_DIR";
/// Environment variable overriding the build working root
pub const ENV_BUILD_DIR: &str = "BUILD_DIR";
/// Environment variable setting the default cache level
pub const ENV_DEFAULT_CACHE_LEVEL: &str = "DEFAULT_CACHE_LEVEL";
/// Environment variable naming the provenance signing key file
pub const ENV_PROVENANCE_KEYPATH: &str = "PROVENANCE_KEYPATH";
/// Environment variable enabling nested-application loading
pub const ENV_NESTED_APPLICATION: &str = "NESTED_APPLICATION";
/// Environment variable gating experimental sub-commands
pub const ENV_EXPERIMENTAL: &str = "EXPERIMENTAL";

/// Which caches participate in a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheLevel {
    /// No caching at all - every package is built
    None,
    /// Local cache only
    Local,
    /// Pull from the remote cache, never push
    RemotePull,
    /// Push to the remote cache, never download
    RemotePush,
    /// Use all configured caches
    #[default]
    Remote,
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "local" => Ok(Self::Local),
            "remote-pull" => Ok(Self::RemotePull),
            "remote-push" => Ok(Self::RemotePush),
            "remote" => Ok(Self::Remote),
            other => Err(format!("invalid cache level: {}", other)),
        }
    }
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Local => "local",
            Self::RemotePull => "remote-pull",
            Self::RemotePush => "remote-push",
            Self::Remote => "remote",
        };
        write!(f, "{}", s)
    }
}

/// Remote cache provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteStorage {
    /// Object-store CLI (`gsutil`)
    #[default]
    Gcp,
    /// S3-compatible storage (`mc`)
    Minio,
}

/// Settings captured once from the environment
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Application root override
    pub application_root: Option<PathBuf>,
    /// Remote cache bucket name; remote caching is enabled iff set
    pub remote_cache_bucket: Option<String>,
    /// Remote cache provider
    pub remote_cache_storage: RemoteStorage,
    /// Local cache directory override
    pub cache_dir: Option<PathBuf>,
    /// Build working root override
    pub build_dir: Option<PathBuf>,
    /// Default cache level for builds
    pub default_cache_level: CacheLevel,
    /// Provenance signing key file
    pub provenance_keypath: Option<PathBuf>,
    /// Nested-application loading
    pub nested_application: bool,
    /// Experimental sub-commands
    pub experimental: bool,
}

impl Settings {
    /// Read all engine-relevant environment variables.
    pub fn from_env() -> Self {
        let storage = match env::var(ENV_REMOTE_CACHE_STORAGE).ok().as_deref() {
            Some("MINIO") => RemoteStorage::Minio,
            _ => RemoteStorage::Gcp,
        };
        let cache_level = env::var(ENV_DEFAULT_CACHE_LEVEL)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        let settings = Self {
            application_root: env::var(ENV_APPLICATION_ROOT).ok().map(PathBuf::from),
            remote_cache_bucket: env::var(ENV_REMOTE_CACHE_BUCKET).ok().filter(|v| !v.is_empty()),
            remote_cache_storage: storage,
            cache_dir: env::var(ENV_CACHE_DIR).ok().map(PathBuf::from),
            build_dir: env::var(ENV_BUILD_DIR).ok().map(PathBuf::from),
            default_cache_level: cache_level,
            provenance_keypath: env::var(ENV_PROVENANCE_KEYPATH).ok().map(PathBuf::from),
            nested_application: env::var(ENV_NESTED_APPLICATION).is_ok(),
            experimental: env::var(ENV_EXPERIMENTAL).ok().as_deref() == Some("true"),
        };
        debug!(?settings, "captured environment settings");
        settings
    }

    /// Effective local cache directory.
    pub fn local_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("gorpa-cache"))
    }

    /// Effective build working root.
    pub fn build_root(&self) -> PathBuf {
        self.build_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("gorpa-build"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_level_round_trip() {
        for lvl in [
            CacheLevel::None,
            CacheLevel::Local,
            CacheLevel::RemotePull,
            CacheLevel::RemotePush,
            CacheLevel::Remote,
        ] {
            assert_eq!(lvl.to_string().parse::<CacheLevel>().unwrap(), lvl);
        }
        assert!("bogus".parse::<CacheLevel>().is_err());
    }

    #[test]
    fn test_default_cache_level_is_remote() {
        assert_eq!(CacheLevel::default(), CacheLevel::Remote);
    }
}
