// src/commands/describe.rs

//! The describe command family

use anyhow::Result;

use gorpa::Settings;

use super::{
    get_application, resolve_target, write_formatted, GlobalArgs, OutputFormat, PackageDescription,
};

/// Describes a single package, including its computed version.
pub async fn cmd_describe(
    global: &GlobalArgs,
    target: Option<&str>,
    format: OutputFormat,
    settings: &Settings,
) -> Result<()> {
    let app = get_application(global, settings).await?;
    let target = resolve_target(&app, target)?;
    let pkg = app.package(&target)?;

    let desc = PackageDescription::new(&app, pkg)?;
    write_formatted(format, &desc)?;
    Ok(())
}

/// Lists the transitive dependencies of a package in build order.
pub async fn cmd_describe_dependencies(
    global: &GlobalArgs,
    target: Option<&str>,
    format: OutputFormat,
    settings: &Settings,
) -> Result<()> {
    let app = get_application(global, settings).await?;
    let target = resolve_target(&app, target)?;
    let pkg = app.package(&target)?;

    let order = gorpa::build::topological_closure(&app, pkg)?;
    let descs = order
        .iter()
        .map(|p| PackageDescription::new(&app, p))
        .collect::<gorpa::Result<Vec<_>>>()?;
    write_formatted(format, &descs)?;
    Ok(())
}

/// Prints the resolved environment manifest as `name: value` lines.
pub async fn cmd_describe_environment_manifest(
    global: &GlobalArgs,
    settings: &Settings,
) -> Result<()> {
    let app = get_application(global, settings).await?;
    let mut out = Vec::new();
    app.environment_manifest.write(&mut out)?;
    print!("{}", String::from_utf8_lossy(&out));
    Ok(())
}
