// src/build/generic.rs

//! Generic package builds: an ordered list of command sequences

use crate::error::{Error, Result};
use crate::model::{Package, PackageConfig};

use super::{copy_tree, run_step, BuildContext, BuildPaths};

pub(crate) async fn build(ctx: &BuildContext, pkg: &Package, paths: &BuildPaths) -> Result<()> {
    let PackageConfig::Generic(cfg) = &pkg.config else {
        return Err(Error::BuildFailed {
            package: pkg.full_name(),
            stage: "config".to_string(),
            output: "package carries a non-generic config".to_string(),
            exit_code: None,
        });
    };

    for (idx, command) in cfg.commands.iter().enumerate() {
        run_step(ctx, pkg, &format!("commands[{}]", idx), command, &paths.workdir).await?;
    }

    // the artifact is the working directory minus the materialized
    // dependencies
    copy_tree(&paths.workdir, &paths.staging, &paths.dependency_dirs).map_err(|e| {
        Error::BuildFailed {
            package: pkg.full_name(),
            stage: "package".to_string(),
            output: e.to_string(),
            exit_code: None,
        }
    })?;
    Ok(())
}
