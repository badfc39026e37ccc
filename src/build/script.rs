// src/build/script.rs

//! Script execution
//!
//! Scripts run after their package dependencies are built. The working
//! directory either is the component origin or a fresh directory holding
//! the materialized dependency artifacts, depending on the script's
//! layout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::debug;

use crate::archive;
use crate::error::{Error, Result};
use crate::model::{filesystem_safe_name, Application, Script, WorkdirLayout};
use crate::version;

use super::{build, BuildOptions};

/// Builds the script's dependencies, then executes the script.
pub async fn run_script(app: Arc<Application>, name: &str, opts: BuildOptions) -> Result<()> {
    let script = app.script(name)?.clone();

    for dep in &script.dependencies {
        build(app.clone(), dep, opts.clone()).await?;
    }

    // keep the temp dir alive for the duration of the run
    let mut _packaged_dir = None;
    let workdir: PathBuf = match script.workdir_layout {
        WorkdirLayout::Origin => script.component.origin.clone(),
        WorkdirLayout::Packaged => {
            let dir = tempfile::Builder::new()
                .prefix("gorpa-script-")
                .tempdir()
                .map_err(|e| script_error(&script, format!("cannot create workdir: {}", e)))?;
            for dep in &script.dependencies {
                let pkg = app.package(dep)?;
                let pkg_version = version::version(&app, pkg)?;
                let (loc, present) = opts.local_cache.location(&pkg_version);
                if !present {
                    return Err(Error::DependencyNotBuilt(dep.clone()));
                }
                archive::unpack(&loc, &dir.path().join(filesystem_safe_name(dep)))?;
            }
            let path = dir.path().to_path_buf();
            _packaged_dir = Some(dir);
            path
        }
    };

    debug!(script = %script.full_name(), workdir = %workdir.display(), "running script");

    let mut proc = tokio::process::Command::new("sh");
    proc.arg("-c")
        .arg(&script.script)
        .current_dir(&workdir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .env("GORPA_WORKSPACE_ROOT", &app.origin)
        .env("GORPA_CACHE_DIR", opts.local_cache.directory());
    for kv in &script.environment {
        if let Some((key, value)) = kv.split_once('=') {
            proc.env(key, value);
        }
    }

    let status = proc
        .status()
        .await
        .map_err(|e| script_error(&script, format!("cannot run script: {}", e)))?;
    if !status.success() {
        return Err(Error::BuildFailed {
            package: script.full_name(),
            stage: "script".to_string(),
            output: String::new(),
            exit_code: status.code(),
        });
    }
    Ok(())
}

fn script_error(script: &Script, cause: String) -> Error {
    Error::BuildFailed {
        package: script.full_name(),
        stage: "script".to_string(),
        output: cause,
        exit_code: None,
    }
}
