// src/build/server_js.rs

//! Server-js package builds
//!
//! Install, build and test run through the JS package manager (overridable
//! per stage); the packaging mode decides what ends up in the artifact.

use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{Package, PackageConfig, ServerJsPackaging};

use super::{copy_tree, run_step, BuildContext, BuildPaths};

const PACK_FILENAME: &str = "package.tgz";

fn command(overridden: &Option<Vec<String>>, default: &[&str]) -> Vec<String> {
    match overridden {
        Some(cmd) if !cmd.is_empty() => cmd.clone(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

pub(crate) async fn build(ctx: &BuildContext, pkg: &Package, paths: &BuildPaths) -> Result<()> {
    let PackageConfig::ServerJs(cfg) = &pkg.config else {
        return Err(Error::BuildFailed {
            package: pkg.full_name(),
            stage: "config".to_string(),
            output: "package carries a non-server-js config".to_string(),
            exit_code: None,
        });
    };

    let install = command(&cfg.commands.install, &["yarn", "install", "--frozen-lockfile"]);
    run_step(ctx, pkg, "install", &install, &paths.workdir).await?;

    let build = command(&cfg.commands.build, &["yarn", "build"]);
    run_step(ctx, pkg, "build", &build, &paths.workdir).await?;

    if !ctx.dont_test {
        let test = command(&cfg.commands.test, &["yarn", "test"]);
        run_step(ctx, pkg, "test", &test, &paths.workdir).await?;
    }

    let package_err = |e: std::io::Error| Error::BuildFailed {
        package: pkg.full_name(),
        stage: "package".to_string(),
        output: e.to_string(),
        exit_code: None,
    };
    match cfg.packaging {
        ServerJsPackaging::Library => {
            pack_tarball(ctx, pkg, &paths.workdir).await?;
            std::fs::copy(
                paths.workdir.join(PACK_FILENAME),
                paths.staging.join(PACK_FILENAME),
            )
            .map_err(package_err)?;
        }
        ServerJsPackaging::App | ServerJsPackaging::Archive => {
            copy_tree(&paths.workdir, &paths.staging, &[]).map_err(package_err)?;
        }
        ServerJsPackaging::OfflineMirror => {
            pack_tarball(ctx, pkg, &paths.workdir).await?;
            let mirror = paths.staging.join("offline-mirror");
            std::fs::create_dir_all(&mirror).map_err(package_err)?;
            std::fs::copy(paths.workdir.join(PACK_FILENAME), mirror.join(PACK_FILENAME))
                .map_err(package_err)?;
            let lockfile = paths.workdir.join("yarn.lock");
            if lockfile.is_file() {
                std::fs::copy(&lockfile, mirror.join("yarn.lock")).map_err(package_err)?;
            }
        }
    }
    Ok(())
}

async fn pack_tarball(ctx: &BuildContext, pkg: &Package, workdir: &Path) -> Result<()> {
    let pack = vec![
        "yarn".to_string(),
        "pack".to_string(),
        "--filename".to_string(),
        PACK_FILENAME.to_string(),
    ];
    run_step(ctx, pkg, "pack", &pack, workdir).await?;
    Ok(())
}
