// src/cache/remote.rs

//! Remote artifact caches
//!
//! A remote cache moves artifacts between the local cache and an object
//! store. Downloads are best effort - a miss is acceptable and only logged.
//! The default provider drives the object-store CLI (`gsutil`) as a
//! subprocess; a second provider targets S3-compatible storage through
//! `mc`. `NoRemoteCache` is the null object, and the pull-only/push-only
//! wrappers turn the opposite direction into a no-op.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{CacheLevel, RemoteStorage, Settings};
use crate::error::{Error, Result};

use super::LocalCache;

/// Identifies one artifact for a cache transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Fully qualified package name, for reporting
    pub package: String,
    /// The cache key
    pub version: String,
}

/// Moves artifacts between the local cache and remote storage
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Downloads the given artifacts into `dst`. Packages already present
    /// locally are skipped; misses are not an error.
    async fn download(&self, dst: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()>;

    /// Uploads the given artifacts from `src`. Only locally present
    /// artifacts are transferred.
    async fn upload(&self, src: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()>;
}

/// The null remote cache
#[derive(Debug, Default)]
pub struct NoRemoteCache;

#[async_trait]
impl RemoteCache for NoRemoteCache {
    async fn download(&self, _dst: &LocalCache, _pkgs: &[ArtifactRef]) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, _src: &LocalCache, _pkgs: &[ArtifactRef]) -> Result<()> {
        Ok(())
    }
}

/// Remote cache backed by the object-store CLI
#[derive(Debug, Clone)]
pub struct GsutilRemoteCache {
    pub bucket: String,
}

#[async_trait]
impl RemoteCache for GsutilRemoteCache {
    async fn download(&self, dst: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()> {
        let bucket = self.bucket.clone();
        transfer_missing(dst, pkgs, move |artifact, local_path| {
            let url = format!("gs://{}/{}.tar.gz", bucket, artifact.version);
            async move { run_transfer_tool("gsutil", &["cp", &url, &local_path]).await }
        })
        .await
    }

    async fn upload(&self, src: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()> {
        for artifact in pkgs {
            let (path, present) = src.location(&artifact.version);
            if !present {
                continue;
            }
            let url = format!("gs://{}/{}.tar.gz", self.bucket, artifact.version);
            run_transfer_tool("gsutil", &["cp", &path.to_string_lossy(), &url])
                .await
                .map_err(|cause| Error::RemoteCacheIo {
                    operation: "upload",
                    package: artifact.package.clone(),
                    cause,
                })?;
            debug!(package = %artifact.package, "uploaded artifact");
        }
        Ok(())
    }
}

/// Remote cache backed by S3-compatible storage
#[derive(Debug, Clone)]
pub struct MinioRemoteCache {
    pub bucket: String,
}

#[async_trait]
impl RemoteCache for MinioRemoteCache {
    async fn download(&self, dst: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()> {
        let bucket = self.bucket.clone();
        transfer_missing(dst, pkgs, move |artifact, local_path| {
            let url = format!("{}/{}.tar.gz", bucket, artifact.version);
            async move { run_transfer_tool("mc", &["cp", &url, &local_path]).await }
        })
        .await
    }

    async fn upload(&self, src: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()> {
        for artifact in pkgs {
            let (path, present) = src.location(&artifact.version);
            if !present {
                continue;
            }
            let url = format!("{}/{}.tar.gz", self.bucket, artifact.version);
            run_transfer_tool("mc", &["cp", &path.to_string_lossy(), &url])
                .await
                .map_err(|cause| Error::RemoteCacheIo {
                    operation: "upload",
                    package: artifact.package.clone(),
                    cause,
                })?;
        }
        Ok(())
    }
}

/// Restricts a remote cache to downloads
pub struct PullOnlyRemoteCache {
    pub inner: Box<dyn RemoteCache>,
}

#[async_trait]
impl RemoteCache for PullOnlyRemoteCache {
    async fn download(&self, dst: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()> {
        self.inner.download(dst, pkgs).await
    }

    async fn upload(&self, _src: &LocalCache, _pkgs: &[ArtifactRef]) -> Result<()> {
        Ok(())
    }
}

/// Restricts a remote cache to uploads
pub struct PushOnlyRemoteCache {
    pub inner: Box<dyn RemoteCache>,
}

#[async_trait]
impl RemoteCache for PushOnlyRemoteCache {
    async fn download(&self, _dst: &LocalCache, _pkgs: &[ArtifactRef]) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, src: &LocalCache, pkgs: &[ArtifactRef]) -> Result<()> {
        self.inner.upload(src, pkgs).await
    }
}

/// Composes the configured remote cache with the cache level.
pub fn remote_cache_for(settings: &Settings, level: CacheLevel) -> Box<dyn RemoteCache> {
    let provider: Box<dyn RemoteCache> = match &settings.remote_cache_bucket {
        Some(bucket) => match settings.remote_cache_storage {
            RemoteStorage::Gcp => Box::new(GsutilRemoteCache { bucket: bucket.clone() }),
            RemoteStorage::Minio => Box::new(MinioRemoteCache { bucket: bucket.clone() }),
        },
        None => Box::new(NoRemoteCache),
    };

    match level {
        CacheLevel::None | CacheLevel::Local => Box::new(NoRemoteCache),
        CacheLevel::RemotePull => Box::new(PullOnlyRemoteCache { inner: provider }),
        CacheLevel::RemotePush => Box::new(PushOnlyRemoteCache { inner: provider }),
        CacheLevel::Remote => provider,
    }
}

/// Downloads every artifact that is missing locally, in parallel. Transfer
/// failures are logged as warnings - a miss is acceptable.
async fn transfer_missing<F, Fut>(dst: &LocalCache, pkgs: &[ArtifactRef], fetch: F) -> Result<()>
where
    F: Fn(ArtifactRef, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<(), String>> + Send + 'static,
{
    let fetch = Arc::new(fetch);
    let mut tasks = JoinSet::new();
    for artifact in pkgs {
        if dst.contains(&artifact.version) {
            continue;
        }

        let artifact = artifact.clone();
        let dst = dst.clone();
        let fetch = fetch.clone();
        tasks.spawn(async move {
            let slot = match dst.slot() {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(package = %artifact.package, error = %e, "cannot allocate cache slot");
                    return;
                }
            };
            let local_path = slot.path().to_string_lossy().to_string();
            match fetch(artifact.clone(), local_path).await {
                Ok(()) => {
                    if let Err(e) = dst.insert(&artifact.version, slot) {
                        warn!(package = %artifact.package, error = %e, "cannot insert downloaded artifact");
                    } else {
                        debug!(package = %artifact.package, "downloaded artifact");
                    }
                }
                Err(cause) => {
                    debug!(package = %artifact.package, %cause, "remote cache miss");
                }
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            warn!(error = %e, "download task panicked");
        }
    }
    Ok(())
}

async fn run_transfer_tool(tool: &str, args: &[&str]) -> std::result::Result<(), String> {
    let out = tokio::process::Command::new(tool)
        .args(args)
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if !out.status.success() {
        return Err(String::from_utf8_lossy(&out.stderr).trim().to_string());
    }
    Ok(())
}
