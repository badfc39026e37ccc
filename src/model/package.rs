// src/model/package.rs

//! Packages and scripts - the buildable and runnable units
//!
//! A package carries its resolved sources, fully qualified dependency
//! references and a type-specific configuration. Packages never point at
//! each other directly; dependencies are strings resolved through the
//! application's package index (see `Application::package`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use super::component::Component;
use super::Application;

/// The kind of build a package runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    /// Builds a container image through the container build tool
    Container,
    /// Builds a server-side JavaScript/TypeScript package
    #[serde(alias = "server-typescript")]
    ServerJs,
    /// Builds a compiled-native module through its toolchain
    CompiledNative,
    /// Runs an arbitrary sequence of commands
    Generic,
}

impl PackageType {
    pub const ALL: [PackageType; 4] = [
        PackageType::Container,
        PackageType::ServerJs,
        PackageType::CompiledNative,
        PackageType::Generic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::ServerJs => "server-js",
            Self::CompiledNative => "compiled-native",
            Self::Generic => "generic",
        }
    }

    /// The build-process version of this type. Bumped whenever the build
    /// procedure changes observably, which invalidates cached artifacts.
    pub fn build_process_version(&self) -> u32 {
        match self {
            Self::Container => 2,
            Self::ServerJs => 3,
            Self::CompiledNative => 2,
            Self::Generic => 1,
        }
    }
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a server-js build result is packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerJsPackaging {
    /// An npm pack tarball
    #[default]
    Library,
    /// The installed working directory plus build output
    App,
    /// The whole working directory as-is
    Archive,
    /// A tarball suitable for offline installs
    OfflineMirror,
}

/// How a compiled-native build result is packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompiledNativePackaging {
    /// The source tree as a tarball
    #[default]
    Library,
    /// The built binary
    App,
}

/// Configuration of a container package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerConfig {
    /// The container file to build, relative to the component origin
    #[serde(default = "default_container_file")]
    pub file: String,
    /// Image names the build result is tagged with
    #[serde(default)]
    pub image: Vec<String>,
    /// Build arguments passed to the container build tool
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// Metadata emitted as a JSON file into the artifact
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_container_file() -> String {
    "Containerfile".to_string()
}

/// Command overrides of a server-js package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerJsCommands {
    pub install: Option<Vec<String>>,
    pub build: Option<Vec<String>>,
    pub test: Option<Vec<String>>,
}

/// Configuration of a server-js package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerJsConfig {
    #[serde(default)]
    pub packaging: ServerJsPackaging,
    #[serde(default)]
    pub commands: ServerJsCommands,
    /// Additional TypeScript config file that belongs to the sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_config: Option<String>,
}

/// Configuration of a compiled-native package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompiledNativeConfig {
    #[serde(default)]
    pub packaging: CompiledNativePackaging,
    /// Run code generation before the build
    #[serde(default)]
    pub generate: bool,
    /// Skip the source formatting check
    #[serde(default)]
    pub dont_check_format: bool,
    /// Skip the lint step
    #[serde(default)]
    pub dont_lint: bool,
    /// Skip the package tests
    #[serde(default)]
    pub dont_test: bool,
    /// Replaces the toolchain's default build command
    #[serde(default)]
    pub build_command: Vec<String>,
    /// Extra flags appended to the build command
    #[serde(default)]
    pub build_flags: Vec<String>,
    /// Replaces the default lint command
    #[serde(default)]
    pub lint_command: Vec<String>,
}

/// Configuration of a generic package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericConfig {
    /// Command sequences executed in order
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
}

/// Type-specific package configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PackageConfig {
    Container(ContainerConfig),
    ServerJs(ServerJsConfig),
    CompiledNative(CompiledNativeConfig),
    Generic(GenericConfig),
}

impl PackageConfig {
    /// Parse the raw config value for the given package type.
    pub fn from_value(tpe: PackageType, value: serde_yaml::Value) -> Result<Self> {
        let value = if value.is_null() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            value
        };
        let res = match tpe {
            PackageType::Container => serde_yaml::from_value(value).map(Self::Container),
            PackageType::ServerJs => serde_yaml::from_value(value).map(Self::ServerJs),
            PackageType::CompiledNative => serde_yaml::from_value(value).map(Self::CompiledNative),
            PackageType::Generic => serde_yaml::from_value(value).map(Self::Generic),
        };
        res.map_err(|e| Error::InvalidArgument(format!("invalid {} config: {}", tpe, e)))
    }

    /// Source files the configuration itself contributes, relative to the
    /// component origin.
    pub fn additional_sources(&self) -> Vec<String> {
        match self {
            Self::Container(cfg) => vec![cfg.file.clone()],
            Self::ServerJs(cfg) => cfg.ts_config.clone().into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// A buildable unit
#[derive(Debug)]
pub struct Package {
    /// Local name within the component
    pub name: String,
    /// The component this package belongs to
    pub component: Arc<Component>,
    /// Full name override used when re-indexing nested applications
    pub full_name_override: Option<String>,
    pub tpe: PackageType,
    /// Source patterns as declared in the manifest
    pub raw_sources: Vec<String>,
    /// Resolved absolute source paths
    pub sources: Vec<PathBuf>,
    /// Fully qualified dependency references
    pub dependencies: Vec<String>,
    /// Maps a dependency to the sub-path it is materialized at during builds
    pub layout: BTreeMap<String, String>,
    /// Version-relevant build arguments, stored as `name: value` entries
    pub argument_dependencies: Vec<String>,
    /// KEY=VALUE pairs added to every build step's environment
    pub environment: Vec<String>,
    pub config: PackageConfig,
    /// The package's manifest bytes before argument substitution
    pub definition: Vec<u8>,
    /// Ephemeral packages are never uploaded to remote caches
    pub ephemeral: bool,

    pub(crate) version: OnceLock<String>,
}

impl Package {
    /// The fully qualified name, `<component>:<name>`.
    pub fn full_name(&self) -> String {
        if let Some(ovr) = &self.full_name_override {
            return ovr.clone();
        }
        format!("{}:{}", self.component.name, self.name)
    }

    /// A form of the fully qualified name that is safe to use in file names.
    pub fn filesystem_safe_name(&self) -> String {
        filesystem_safe_name(&self.full_name())
    }

    /// Direct dependencies resolved through the application index.
    pub fn direct_dependencies<'a>(&self, app: &'a Application) -> Result<Vec<&'a Arc<Package>>> {
        self.dependencies
            .iter()
            .map(|dep| {
                app.packages.get(dep).ok_or_else(|| Error::UnknownDependency {
                    referrer: self.full_name(),
                    dependency: dep.clone(),
                })
            })
            .collect()
    }

    /// The transitive dependency set of this package, without the package
    /// itself, sorted by fully qualified name.
    pub fn transitive_dependencies<'a>(&self, app: &'a Application) -> Result<Vec<&'a Arc<Package>>> {
        let mut seen = BTreeMap::new();
        let mut queue: Vec<&str> = self.dependencies.iter().map(String::as_str).collect();
        while let Some(dep) = queue.pop() {
            if seen.contains_key(dep) {
                continue;
            }
            let pkg = app.packages.get(dep).ok_or_else(|| Error::UnknownDependency {
                referrer: self.full_name(),
                dependency: dep.to_string(),
            })?;
            seen.insert(dep.to_string(), pkg);
            queue.extend(pkg.dependencies.iter().map(String::as_str));
        }
        Ok(seen.into_values().collect())
    }

    /// Walks the dependency graph looking for a cycle through this package.
    ///
    /// Returns the cycle as an ordered path starting and ending at the same
    /// name, or an empty vector if the package is cycle-free. The walk is
    /// depth-limited by the package count; exceeding it means the index is
    /// corrupt.
    pub fn find_cycle(&self, app: &Application) -> Result<Vec<String>> {
        let max_depth = app.packages.len();
        let mut path = Vec::new();
        self.find_cycle_dfs(app, &self.full_name(), &mut path, max_depth)
    }

    fn find_cycle_dfs(
        &self,
        app: &Application,
        node: &str,
        path: &mut Vec<String>,
        max_depth: usize,
    ) -> Result<Vec<String>> {
        if path.len() > max_depth {
            return Err(Error::IndexCorrupt);
        }
        if let Some(pos) = path.iter().position(|n| n == node) {
            let mut cycle: Vec<String> = path[pos..].to_vec();
            cycle.push(node.to_string());
            return Ok(cycle);
        }

        let pkg = match app.packages.get(node) {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        path.push(node.to_string());
        for dep in &pkg.dependencies {
            let cycle = self.find_cycle_dfs(app, dep, path, max_depth)?;
            if !cycle.is_empty() {
                return Ok(cycle);
            }
        }
        path.pop();
        Ok(Vec::new())
    }

    /// Ensures every dependency reference resolves to an indexed package.
    pub(crate) fn link(&self, packages: &BTreeMap<String, Arc<Package>>) -> Result<()> {
        for dep in &self.dependencies {
            if !packages.contains_key(dep) {
                return Err(Error::UnknownDependency {
                    referrer: self.full_name(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Replaces the path and name separators of a fully qualified name with a
/// filesystem-safe delimiter.
pub fn filesystem_safe_name(fqn: &str) -> String {
    fqn.replace('/', "--").replace(':', "--")
}

/// The interpreter a script runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptType {
    #[default]
    Shell,
}

/// Where a script's working directory comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkdirLayout {
    /// Run in the component origin
    #[default]
    Origin,
    /// Run in a fresh directory holding the materialized dependencies
    Packaged,
}

/// A runnable unit with dependencies on packages
#[derive(Debug)]
pub struct Script {
    pub name: String,
    pub component: Arc<Component>,
    pub description: Option<String>,
    pub tpe: ScriptType,
    pub workdir_layout: WorkdirLayout,
    /// KEY=VALUE pairs added to the script's environment
    pub environment: Vec<String>,
    /// Fully qualified package references
    pub dependencies: Vec<String>,
    /// The script source itself
    pub script: String,
}

impl Script {
    /// The fully qualified name, `<component>:<name>`.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.component.name, self.name)
    }

    pub(crate) fn link(&self, packages: &BTreeMap<String, Arc<Package>>) -> Result<()> {
        for dep in &self.dependencies {
            if !packages.contains_key(dep) {
                return Err(Error::UnknownDependency {
                    referrer: self.full_name(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }
}
