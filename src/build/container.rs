// src/build/container.rs

//! Container package builds
//!
//! Runs the container build tool against the configured container file,
//! tags the image under every configured name and records an image
//! metadata file in the artifact. Cached builds are re-tagged so local tag
//! names keep resolving to the cached image identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::archive;
use crate::error::{Error, Result};
use crate::model::{Package, PackageConfig};

use super::{run_step, BuildContext, BuildPaths};

/// Filename of the image metadata inside a container artifact
pub const IMAGE_METADATA_FILENAME: &str = "image-metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct ImageMetadata {
    /// Every name the image was tagged with
    images: Vec<String>,
    /// Content identity of the built image
    digest: String,
    /// User-configured metadata carried in the artifact
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

pub(crate) async fn build(ctx: &BuildContext, pkg: &Package, paths: &BuildPaths) -> Result<()> {
    let PackageConfig::Container(cfg) = &pkg.config else {
        return Err(config_error(pkg));
    };
    let fqn = pkg.full_name();
    if cfg.image.is_empty() {
        return Err(Error::BuildFailed {
            package: fqn,
            stage: "config".to_string(),
            output: "container package configures no image names".to_string(),
            exit_code: None,
        });
    }

    let pkg_version = ctx.version_of(pkg)?;
    let primary = &cfg.image[0];

    let mut command = vec![
        "docker".to_string(),
        "build".to_string(),
        "-f".to_string(),
        cfg.file.clone(),
        "-t".to_string(),
        primary.clone(),
    ];
    let mut build_args = cfg.build_args.clone();
    build_args.insert("__pkg_version".to_string(), pkg_version.clone());
    for (key, value) in &build_args {
        command.push("--build-arg".to_string());
        command.push(format!("{}={}", key, value));
    }
    command.push(".".to_string());
    run_step(ctx, pkg, "build", &command, &paths.workdir).await?;

    for name in cfg.image.iter().skip(1) {
        let tag = vec![
            "docker".to_string(),
            "tag".to_string(),
            primary.clone(),
            name.clone(),
        ];
        run_step(ctx, pkg, "tag", &tag, &paths.workdir).await?;
    }

    let inspect = vec![
        "docker".to_string(),
        "inspect".to_string(),
        "--format".to_string(),
        "{{.Id}}".to_string(),
        primary.clone(),
    ];
    let digest = run_step(ctx, pkg, "inspect", &inspect, &paths.workdir)
        .await?
        .trim()
        .to_string();

    let metadata = ImageMetadata {
        images: cfg.image.clone(),
        digest,
        metadata: cfg.metadata.clone(),
    };
    let content = serde_json::to_vec_pretty(&metadata).map_err(|e| Error::BuildFailed {
        package: pkg.full_name(),
        stage: "package".to_string(),
        output: e.to_string(),
        exit_code: None,
    })?;
    std::fs::write(paths.staging.join(IMAGE_METADATA_FILENAME), content).map_err(|e| {
        Error::BuildFailed {
            package: pkg.full_name(),
            stage: "package".to_string(),
            output: e.to_string(),
            exit_code: None,
        }
    })?;
    Ok(())
}

/// Ensures the configured tag names resolve to the cached image identity.
pub(crate) async fn retag(ctx: &BuildContext, pkg: &Package, pkg_version: &str) -> Result<()> {
    let PackageConfig::Container(_) = &pkg.config else {
        return Err(config_error(pkg));
    };

    let (loc, present) = ctx.local_cache.location(pkg_version);
    if !present {
        return Err(Error::DependencyNotBuilt(pkg.full_name()));
    }
    let Some(content) = archive::read_entry(&loc, IMAGE_METADATA_FILENAME)? else {
        // older artifacts without metadata cannot be re-tagged
        return Ok(());
    };
    let metadata: ImageMetadata = serde_json::from_slice(&content).map_err(|e| Error::CacheIo {
        operation: "read",
        path: loc.clone(),
        cause: format!("invalid image metadata: {}", e),
    })?;

    for name in &metadata.images {
        let tag = vec![
            "docker".to_string(),
            "tag".to_string(),
            metadata.digest.clone(),
            name.clone(),
        ];
        run_step(ctx, pkg, "retag", &tag, &pkg.component.origin).await?;
    }
    Ok(())
}

fn config_error(pkg: &Package) -> Error {
    Error::BuildFailed {
        package: pkg.full_name(),
        stage: "config".to_string(),
        output: "package carries a non-container config".to_string(),
        exit_code: None,
    }
}
