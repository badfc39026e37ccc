// src/commands/mod.rs

//! CLI command implementations

mod build;
mod collect;
mod describe;
mod provenance;
mod run;
mod vet;

pub use build::{cmd_build, BuildArgs};
pub use collect::{cmd_collect, CollectKind};
pub use describe::{cmd_describe, cmd_describe_dependencies, cmd_describe_environment_manifest};
pub use provenance::{cmd_provenance_assert, AssertArgs};
pub use run::cmd_run;
pub use vet::cmd_vet;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use gorpa::model;
use gorpa::{Application, Arguments, Settings};

/// Global CLI options shared by every command
#[derive(Debug, Clone, clap::Args)]
pub struct GlobalArgs {
    /// Application root; defaults to APPLICATION_ROOT or the working
    /// directory
    #[arg(short = 'a', long, global = true)]
    pub application: Option<PathBuf>,

    /// Build arguments passed to manifests, as key=value
    #[arg(short = 'D', long = "build-arg", global = true)]
    pub build_args: Vec<String>,

    /// Selects a package variant
    #[arg(long, global = true)]
    pub variant: Option<String>,

    /// Enables verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    pub fn arguments(&self) -> Result<Arguments> {
        let mut res = BTreeMap::new();
        for arg in &self.build_args {
            let Some((key, value)) = arg.split_once('=') else {
                bail!("invalid build argument (format is key=value): {}", arg);
            };
            res.insert(key.to_string(), value.to_string());
        }
        Ok(res)
    }

    pub fn application_root(&self, settings: &Settings) -> PathBuf {
        self.application
            .clone()
            .or_else(|| settings.application_root.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Loads the application honouring the nested-application setting.
pub async fn get_application(global: &GlobalArgs, settings: &Settings) -> Result<Arc<Application>> {
    let args = global.arguments()?;
    let root = global.application_root(settings);
    let variant = global.variant.as_deref();

    let app = if settings.nested_application {
        model::find_nested_applications(&root, args, variant, settings).await
    } else {
        model::find_application(&root, args, variant, settings).await
    }
    .with_context(|| format!("cannot load application at {}", root.display()))?;
    Ok(Arc::new(app))
}

/// Output format of the describe/collect family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

pub fn write_formatted<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PackageMetadata {
    pub name: String,
    pub full_name: String,
    pub version: String,
}

/// Serializable package description shared by describe and collect
#[derive(Debug, Serialize)]
pub struct PackageDescription {
    pub metadata: PackageMetadata,
    #[serde(rename = "type")]
    pub tpe: String,
    pub sources: Vec<String>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub layout: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub argument_dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    pub config: serde_json::Value,
    pub ephemeral: bool,
}

impl PackageDescription {
    pub fn new(app: &Application, pkg: &gorpa::Package) -> gorpa::Result<Self> {
        let version = gorpa::version::version(app, pkg)?;
        let mut sources: Vec<String> = pkg
            .sources
            .iter()
            .map(|s| {
                s.strip_prefix(&app.origin)
                    .unwrap_or(s)
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        sources.sort();
        let mut dependencies = pkg.dependencies.clone();
        dependencies.sort();

        Ok(Self {
            metadata: PackageMetadata {
                name: pkg.name.clone(),
                full_name: pkg.full_name(),
                version,
            },
            tpe: pkg.tpe.to_string(),
            sources,
            dependencies,
            layout: pkg.layout.clone(),
            argument_dependencies: pkg.argument_dependencies.clone(),
            env: pkg.environment.clone(),
            config: serde_json::to_value(&pkg.config).unwrap_or(serde_json::Value::Null),
            ephemeral: pkg.ephemeral,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ComponentDescription {
    pub name: String,
    pub origin: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, String>,
}

impl ComponentDescription {
    pub fn new(comp: &gorpa::Component) -> Self {
        Self {
            name: comp.name.clone(),
            origin: comp.origin.to_string_lossy().to_string(),
            constants: comp.constants.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScriptDescription {
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub dependencies: Vec<String>,
}

impl ScriptDescription {
    pub fn new(script: &gorpa::Script) -> Self {
        Self {
            full_name: script.full_name(),
            description: script.description.clone(),
            dependencies: script.dependencies.clone(),
        }
    }
}

/// Resolves the build target: explicit argument or the application's
/// default target.
pub fn resolve_target(app: &Application, target: Option<&str>) -> Result<String> {
    match target {
        Some(t) => Ok(t.to_string()),
        None => app
            .default_target
            .clone()
            .context("no target given and the application declares no default target"),
    }
}
