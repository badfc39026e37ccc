// src/build/compiled_native.rs

//! Compiled-native package builds
//!
//! Optional code generation, a formatting check, lint and tests run ahead
//! of the actual build. Library packaging ships the source tree; app
//! packaging ships the built binary.

use crate::error::{Error, Result};
use crate::model::{CompiledNativePackaging, Package, PackageConfig};

use super::{copy_tree, run_step, BuildContext, BuildPaths};

pub(crate) async fn build(ctx: &BuildContext, pkg: &Package, paths: &BuildPaths) -> Result<()> {
    let PackageConfig::CompiledNative(cfg) = &pkg.config else {
        return Err(Error::BuildFailed {
            package: pkg.full_name(),
            stage: "config".to_string(),
            output: "package carries a non-compiled-native config".to_string(),
            exit_code: None,
        });
    };

    if cfg.generate {
        let generate = strings(&["go", "generate", "./..."]);
        run_step(ctx, pkg, "generate", &generate, &paths.workdir).await?;
    }

    if !cfg.dont_check_format {
        let check = strings(&["gofmt", "-l", "."]);
        let out = run_step(ctx, pkg, "format", &check, &paths.workdir).await?;
        if !out.trim().is_empty() {
            return Err(Error::BuildFailed {
                package: pkg.full_name(),
                stage: "format".to_string(),
                output: format!("unformatted files:\n{}", out.trim()),
                exit_code: None,
            });
        }
    }

    if !cfg.dont_lint {
        let lint = if cfg.lint_command.is_empty() {
            strings(&["go", "vet", "./..."])
        } else {
            cfg.lint_command.clone()
        };
        run_step(ctx, pkg, "lint", &lint, &paths.workdir).await?;
    }

    if !ctx.dont_test && !cfg.dont_test {
        let test = strings(&["go", "test", "./..."]);
        run_step(ctx, pkg, "test", &test, &paths.workdir).await?;
    }

    let package_err = |e: std::io::Error| Error::BuildFailed {
        package: pkg.full_name(),
        stage: "package".to_string(),
        output: e.to_string(),
        exit_code: None,
    };
    match cfg.packaging {
        CompiledNativePackaging::Library => {
            let mut build = if cfg.build_command.is_empty() {
                strings(&["go", "build", "./..."])
            } else {
                cfg.build_command.clone()
            };
            build.extend(cfg.build_flags.iter().cloned());
            run_step(ctx, pkg, "build", &build, &paths.workdir).await?;

            // a library artifact is the source tree itself
            copy_tree(&paths.workdir, &paths.staging, &paths.dependency_dirs)
                .map_err(package_err)?;
        }
        CompiledNativePackaging::App => {
            let output = paths.staging.join(&pkg.name);
            let mut build = if cfg.build_command.is_empty() {
                strings(&["go", "build"])
            } else {
                cfg.build_command.clone()
            };
            build.extend(cfg.build_flags.iter().cloned());
            build.push("-o".to_string());
            build.push(output.to_string_lossy().to_string());
            run_step(ctx, pkg, "build", &build, &paths.workdir).await?;
        }
    }
    Ok(())
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
