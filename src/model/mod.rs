// src/model/mod.rs

//! The application model and loader
//!
//! An application is the root of a repository tree, marked by an
//! `APPLICATION.yaml`. Every directory below it carrying a `BUILD.yaml` is a
//! component; components declare packages (buildable units) and scripts
//! (runnable units). The application owns all component, package and script
//! storage - packages reference each other by fully qualified name and
//! resolve through the application index.
//!
//! Loading is parallel: one task per component manifest, funneled through a
//! bounded channel into the collector.

pub mod component;
pub mod package;
pub mod variant;

#[cfg(test)]
pub(crate) mod testutil;

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::glob;
use crate::version;

pub use component::{Component, GitInfo, COMPONENT_MANIFEST};
pub use package::{
    filesystem_safe_name, CompiledNativeConfig, CompiledNativePackaging, ContainerConfig,
    GenericConfig, Package, PackageConfig, PackageType, Script, ScriptType, ServerJsConfig,
    ServerJsPackaging, WorkdirLayout,
};
pub use variant::PackageVariant;

use component::{load_component, LoadedComponent, LoaderContext};

/// Name of the application manifest file
pub const APPLICATION_MANIFEST: &str = "APPLICATION.yaml";
/// Name of the ignore file next to the application manifest
pub const IGNORE_FILE: &str = ".gorpaignore";

/// Token in type-specific configuration replaced with the package version
pub const PKG_VERSION_TOKEN: &str = "${__pkg_version}";

/// Build arguments handed to the loader
pub type Arguments = BTreeMap<String, String>;

const BUILTIN_HOST_OS: &str = "host-os";
const BUILTIN_HOST_ARCH: &str = "host-arch";

/// One entry of the environment manifest
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentManifestEntry {
    pub name: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(skip)]
    pub value: String,
    #[serde(skip)]
    pub builtin: bool,
}

/// The ordered list of environment values factored into every package
/// version
#[derive(Debug, Clone, Default)]
pub struct EnvironmentManifest(pub Vec<EnvironmentManifestEntry>);

impl EnvironmentManifest {
    /// Writes the manifest as `name: value` lines.
    pub fn write(&self, out: &mut impl Write) -> std::io::Result<()> {
        for entry in &self.0 {
            writeln!(out, "{}: {}", entry.name, entry.value)?;
        }
        Ok(())
    }

    /// The keyed digest of this manifest.
    pub fn digest(&self) -> String {
        let mut buf = Vec::new();
        self.write(&mut buf).expect("writing to a Vec cannot fail");
        version::keyed_digest(&buf)
    }
}

fn default_manifest_entries(tpe: Option<PackageType>) -> Vec<EnvironmentManifestEntry> {
    let entry = |name: &str, command: &[&str], builtin: bool| EnvironmentManifestEntry {
        name: name.to_string(),
        command: command.iter().map(|s| s.to_string()).collect(),
        value: String::new(),
        builtin,
    };

    match tpe {
        None => vec![
            entry("os", &[BUILTIN_HOST_OS], true),
            entry("arch", &[BUILTIN_HOST_ARCH], true),
        ],
        Some(PackageType::CompiledNative) => vec![entry("go", &["go", "version"], false)],
        Some(PackageType::ServerJs) => vec![
            entry("yarn", &["yarn", "-v"], false),
            entry("node", &["node", "--version"], false),
        ],
        // a container-daemon probe would make package versions depend on
        // daemon connectivity; users can opt in via their own entry
        Some(PackageType::Container) | Some(PackageType::Generic) => Vec::new(),
    }
}

/// Provenance settings of an application
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub slsa: bool,
    /// Process-wide signing key; per-component keys take precedence
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationManifest {
    #[serde(default)]
    default_target: Option<String>,
    #[serde(default, rename = "defaultArgs")]
    default_args: BTreeMap<String, String>,
    #[serde(default)]
    default_variant: Option<PackageVariant>,
    #[serde(default)]
    variants: Vec<PackageVariant>,
    #[serde(default)]
    environment_manifest: Vec<EnvironmentManifestEntry>,
    #[serde(default)]
    provenance: ProvenanceSettings,
}

/// The root of a repository tree
#[derive(Debug, Default)]
pub struct Application {
    pub origin: PathBuf,
    pub default_target: Option<String>,
    /// Merged build arguments: caller-supplied values win over defaults
    pub arguments: Arguments,
    pub variants: Vec<PackageVariant>,
    pub selected_variant: Option<PackageVariant>,
    pub environment_manifest: EnvironmentManifest,
    pub provenance: ProvenanceSettings,
    pub git: GitInfo,
    pub components: BTreeMap<String, Arc<Component>>,
    pub packages: BTreeMap<String, Arc<Package>>,
    pub scripts: BTreeMap<String, Arc<Script>>,
    pub(crate) ignores: Vec<String>,
}

impl Application {
    /// Whether a path is excluded from source and component listings.
    pub fn should_ignore_source(&self, path: &str) -> bool {
        self.ignores
            .iter()
            .filter(|p| !p.trim().is_empty())
            .any(|p| path.contains(p.trim()))
    }

    /// Looks up a package by fully qualified name.
    pub fn package(&self, name: &str) -> Result<&Arc<Package>> {
        self.packages
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("package \"{}\" is unknown", name)))
    }

    /// Looks up a script by fully qualified name.
    pub fn script(&self, name: &str) -> Result<&Arc<Script>> {
        self.scripts
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("script \"{}\" is unknown", name)))
    }
}

#[derive(Debug, Default)]
struct LoadOpts {
    /// Packages of previously loaded nested applications, re-indexed under
    /// their outer names before linking
    prelink: BTreeMap<String, Arc<Package>>,
    /// Root application defaults overriding inner application defaults
    argument_defaults: BTreeMap<String, String>,
}

/// Loads the application rooted at `path`.
pub async fn find_application(
    path: &Path,
    args: Arguments,
    variant: Option<&str>,
    settings: &Settings,
) -> Result<Application> {
    load_application(path, args, variant, settings, LoadOpts::default()).await
}

/// Loads the application rooted at `path` together with every application
/// nested below it. Nested packages are re-indexed into the outer
/// application under their relative origin; outer packages may depend on
/// inner ones but not vice versa.
pub async fn find_nested_applications(
    path: &Path,
    args: Arguments,
    variant: Option<&str>,
    settings: &Settings,
) -> Result<Application> {
    let (root_manifest, root_origin) = load_application_yaml(path)?;

    let file_ignores = read_ignore_file(&root_origin);
    let ignore: &glob::IgnoreFn = &glob::ignore_strings(&file_ignores);
    let mut manifests = glob::glob(&root_origin, &format!("**/{}", APPLICATION_MANIFEST), Some(ignore))?;

    // deepest applications first
    manifests.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

    let mut loaded: Vec<(PathBuf, Application)> = Vec::new();
    for manifest in manifests {
        let ws_path = manifest
            .parent()
            .ok_or_else(|| Error::manifest(&manifest, "manifest has no parent directory"))?
            .to_path_buf();
        debug!(path = %ws_path.display(), "loading (possibly nested) application");

        let mut opts = LoadOpts {
            prelink: BTreeMap::new(),
            argument_defaults: root_manifest.default_args.clone(),
        };
        for (other_loc, other_app) in &loaded {
            let rel = match other_loc.strip_prefix(&ws_path) {
                Ok(rel) => rel.to_string_lossy().to_string(),
                Err(_) => continue,
            };
            for (key, pkg) in &other_app.packages {
                let outer_key = prefix_reference(&rel, key);
                let clone = reindex_package(pkg, &rel, Some(outer_key.clone()));
                debug!(package = %outer_key, "prelinking previously loaded application");
                opts.prelink.insert(outer_key, Arc::new(clone));
            }
        }

        let app = load_application(&ws_path, args.clone(), variant, settings, opts).await?;
        loaded.push((ws_path, app));
    }

    let mut app = match loaded.pop() {
        Some((_, app)) => app,
        None => {
            return Err(Error::manifest(
                path,
                format!("no {} found", APPLICATION_MANIFEST),
            ))
        }
    };

    // re-home components and scripts under their outer names
    rename_components(&mut app);
    for (other_loc, other_app) in &loaded {
        let rel = match other_loc.strip_prefix(&app.origin) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => continue,
        };
        for (key, script) in &other_app.scripts {
            let outer_key = prefix_reference(&rel, key);
            let comp_name = component::component_name(&app.origin, &script.component.origin);
            let comp = renamed_component(&mut app.components, &script.component, &comp_name);
            let mut clone = reindex_script(script, &rel);
            clone.component = comp;
            app.scripts.insert(outer_key, Arc::new(clone));
        }
    }

    Ok(app)
}

/// Prefixes a fully qualified reference of an inner application with the
/// inner application's path relative to the outer one.
fn prefix_reference(rel: &str, key: &str) -> String {
    if rel.is_empty() {
        return key.to_string();
    }
    if let Some(stripped) = key.strip_prefix("//") {
        return format!("{}{}", rel, stripped);
    }
    format!("{}/{}", rel, key)
}

fn reindex_package(pkg: &Package, rel: &str, full_name_override: Option<String>) -> Package {
    Package {
        name: pkg.name.clone(),
        component: pkg.component.clone(),
        full_name_override,
        tpe: pkg.tpe,
        raw_sources: pkg.raw_sources.clone(),
        sources: pkg.sources.clone(),
        dependencies: pkg
            .dependencies
            .iter()
            .map(|dep| prefix_reference(rel, dep))
            .collect(),
        layout: pkg
            .layout
            .iter()
            .map(|(dep, loc)| (prefix_reference(rel, dep), loc.clone()))
            .collect(),
        argument_dependencies: pkg.argument_dependencies.clone(),
        environment: pkg.environment.clone(),
        config: pkg.config.clone(),
        definition: pkg.definition.clone(),
        ephemeral: pkg.ephemeral,
        version: pkg.version.clone(),
    }
}

fn reindex_script(script: &Script, rel: &str) -> Script {
    Script {
        name: script.name.clone(),
        component: script.component.clone(),
        description: script.description.clone(),
        tpe: script.tpe,
        workdir_layout: script.workdir_layout,
        environment: script.environment.clone(),
        dependencies: script
            .dependencies
            .iter()
            .map(|dep| prefix_reference(rel, dep))
            .collect(),
        script: script.script.clone(),
    }
}

fn renamed_component(
    components: &mut BTreeMap<String, Arc<Component>>,
    component: &Arc<Component>,
    name: &str,
) -> Arc<Component> {
    if let Some(existing) = components.get(name) {
        return existing.clone();
    }
    let renamed = Arc::new(Component {
        name: name.to_string(),
        origin: component.origin.clone(),
        constants: component.constants.clone(),
        git: component.git.clone(),
        provenance_key_path: component.provenance_key_path.clone(),
    });
    components.insert(name.to_string(), renamed.clone());
    renamed
}

/// After nested loading, component names must be relative to the outermost
/// origin.
fn rename_components(app: &mut Application) {
    let mut new_components = BTreeMap::new();
    let mut renamed_packages = BTreeMap::new();
    for (key, pkg) in &app.packages {
        let name = component::component_name(&app.origin, &pkg.component.origin);
        let comp = renamed_component(&mut new_components, &pkg.component, &name);
        if Arc::ptr_eq(&comp, &pkg.component) {
            continue;
        }
        let mut clone = reindex_package(pkg, "", pkg.full_name_override.clone());
        clone.component = comp;
        renamed_packages.insert(key.clone(), Arc::new(clone));
    }
    for (key, pkg) in renamed_packages {
        app.packages.insert(key, pkg);
    }

    // components that only carry scripts must survive the re-homing too
    let mut renamed_scripts = BTreeMap::new();
    for (key, script) in &app.scripts {
        let name = component::component_name(&app.origin, &script.component.origin);
        let comp = renamed_component(&mut new_components, &script.component, &name);
        if Arc::ptr_eq(&comp, &script.component) {
            continue;
        }
        let mut clone = reindex_script(script, "");
        clone.component = comp;
        renamed_scripts.insert(key.clone(), Arc::new(clone));
    }
    for (key, script) in renamed_scripts {
        app.scripts.insert(key, script);
    }

    app.components = new_components;
}

fn canonical_origin(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| Error::manifest(path, e))
}

fn read_ignore_file(origin: &Path) -> Vec<String> {
    match std::fs::read_to_string(origin.join(IGNORE_FILE)) {
        Ok(content) => content.lines().map(|l| l.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

fn load_application_yaml(path: &Path) -> Result<(ApplicationManifest, PathBuf)> {
    let manifest_path = path.join(APPLICATION_MANIFEST);
    let content =
        std::fs::read_to_string(&manifest_path).map_err(|e| Error::manifest(&manifest_path, e))?;
    let manifest = if content.trim().is_empty() {
        ApplicationManifest::default()
    } else {
        serde_yaml::from_str(&content).map_err(|e| Error::manifest(&manifest_path, e))?
    };
    let origin = canonical_origin(path)?;
    Ok((manifest, origin))
}

async fn load_application(
    path: &Path,
    mut args: Arguments,
    variant: Option<&str>,
    settings: &Settings,
    opts: LoadOpts,
) -> Result<Application> {
    let (mut manifest, origin) = load_application_yaml(path)?;

    let selected_variant = match variant {
        Some(name) => manifest.variants.iter().find(|v| v.name == name).cloned(),
        None => manifest.default_variant.take(),
    };
    if let Some(vnt) = &selected_variant {
        debug!(variant = %vnt.name, "applying variant");
    }

    // build the ignore list: the ignore file plus every nested application
    let mut ignores = read_ignore_file(&origin);
    for nested in glob::glob(&origin, &format!("**/{}", APPLICATION_MANIFEST), None)? {
        let dir = nested.parent().unwrap_or(&origin);
        if dir == origin {
            continue;
        }
        ignores.push(dir.to_string_lossy().to_string());
    }
    debug!(?ignores, "computed application ignores");

    // the root application's defaults override this application's defaults
    for (key, value) in &opts.argument_defaults {
        manifest.default_args.insert(key.clone(), value.clone());
    }
    // user arguments win over any default
    for (key, value) in &manifest.default_args {
        args.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let ctx = Arc::new(LoaderContext {
        origin: origin.clone(),
        args: args.clone(),
        variant: selected_variant.clone(),
        ignores: ignores.clone(),
    });

    let comps = discover_components(&ctx).await?;

    let mut provenance = manifest.provenance;
    if let Some(keypath) = &settings.provenance_keypath {
        provenance.key_path = Some(keypath.clone());
    }

    let mut app = Application {
        origin: origin.clone(),
        default_target: manifest.default_target,
        arguments: args,
        variants: manifest.variants,
        selected_variant,
        environment_manifest: EnvironmentManifest::default(),
        provenance,
        git: GitInfo::resolve(&origin),
        components: BTreeMap::new(),
        packages: BTreeMap::new(),
        scripts: BTreeMap::new(),
        ignores,
    };

    let mut types_used = BTreeSet::new();
    for loaded in comps {
        app.components
            .insert(loaded.component.name.clone(), loaded.component.clone());
        for pkg in loaded.packages {
            types_used.insert(pkg.tpe);
            app.packages.insert(pkg.full_name(), Arc::new(pkg));
        }
        for script in loaded.scripts {
            app.scripts.insert(script.full_name(), Arc::new(script));
        }
    }

    // with all packages loaded the package types in use are known, hence
    // the default environment manifest entries are too
    app.environment_manifest =
        build_environment_manifest(manifest.environment_manifest, &types_used).await?;

    for (key, pkg) in opts.prelink {
        app.packages.insert(key, pkg);
    }

    for pkg in app.packages.values() {
        pkg.link(&app.packages)?;
    }
    for script in app.scripts.values() {
        script.link(&app.packages)?;
    }

    // dependency cycles break the version computation and are not allowed
    for pkg in app.packages.values() {
        let cycle = pkg.find_cycle(&app)?;
        if !cycle.is_empty() {
            return Err(Error::CycleDetected { cycle });
        }
    }

    resolve_builtin_variables(&mut app)?;

    Ok(app)
}

async fn discover_components(ctx: &Arc<LoaderContext>) -> Result<Vec<LoadedComponent>> {
    let ignore: &glob::IgnoreFn = &|p: &str| ctx.should_ignore(p);
    let manifests = glob::glob(&ctx.origin, &format!("**/{}", COMPONENT_MANIFEST), Some(ignore))?;

    let (tx, mut rx) = mpsc::channel::<Result<LoadedComponent>>(16);
    let mut handles = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let ctx = ctx.clone();
        let tx = tx.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let res = load_component(&ctx, &manifest);
            let _ = tx.blocking_send(res);
        }));
    }
    drop(tx);

    let mut comps = Vec::new();
    let mut first_err = None;
    while let Some(res) = rx.recv().await {
        match res {
            Ok(loaded) => {
                if let Some(vnt) = &ctx.variant {
                    if vnt.excludes_component(&loaded.component.name) {
                        debug!(component = %loaded.component.name, "selected variant excludes this component");
                        continue;
                    }
                    comps.push(strip_excluded_dependencies(vnt, loaded));
                } else {
                    comps.push(loaded);
                }
            }
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }
    for handle in handles {
        let _ = handle.await;
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(comps),
    }
}

/// Removes dependencies onto excluded components from surviving packages.
fn strip_excluded_dependencies(
    variant: &PackageVariant,
    mut loaded: LoadedComponent,
) -> LoadedComponent {
    for pkg in &mut loaded.packages {
        pkg.dependencies.retain(|dep| match dep.split_once(':') {
            Some((comp, _)) => !variant.excludes_component(comp),
            None => true,
        });
    }
    loaded
}

/// Executes the commands of the environment manifest and fills in values.
async fn build_environment_manifest(
    user_entries: Vec<EnvironmentManifestEntry>,
    types_used: &BTreeSet<PackageType>,
) -> Result<EnvironmentManifest> {
    let mut entries: BTreeMap<String, EnvironmentManifestEntry> = BTreeMap::new();
    for entry in default_manifest_entries(None) {
        entries.insert(entry.name.clone(), entry);
    }
    for tpe in types_used {
        for entry in default_manifest_entries(Some(*tpe)) {
            entries.insert(entry.name.clone(), entry);
        }
    }
    for entry in user_entries {
        entries.insert(entry.name.clone(), entry);
    }

    let mut res = Vec::with_capacity(entries.len());
    for (name, mut entry) in entries {
        if entry.builtin {
            entry.value = match entry.command.first().map(String::as_str) {
                Some(BUILTIN_HOST_OS) => std::env::consts::OS.to_string(),
                Some(BUILTIN_HOST_ARCH) => std::env::consts::ARCH.to_string(),
                _ => String::new(),
            };
            res.push(entry);
            continue;
        }

        let (cmd, cmd_args) = entry.command.split_first().ok_or_else(|| {
            Error::EnvironmentProbeFailed {
                entry: name.clone(),
                cause: "entry has no command".to_string(),
            }
        })?;
        let out = tokio::process::Command::new(cmd)
            .args(cmd_args)
            .output()
            .await
            .map_err(|e| Error::EnvironmentProbeFailed {
                entry: name.clone(),
                cause: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(Error::EnvironmentProbeFailed {
                entry: name,
                cause: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        entry.value = String::from_utf8_lossy(&out.stdout).trim().to_string();
        res.push(entry);
    }

    res.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(entries = res.len(), "built environment manifest");
    Ok(EnvironmentManifest(res))
}

/// Replaces `${__pkg_version}` in type-specific configuration with the
/// computed package version.
fn resolve_builtin_variables(app: &mut Application) -> Result<()> {
    let mut replacements = Vec::new();
    for (fqn, pkg) in &app.packages {
        let serialized =
            serde_yaml::to_string(&pkg.config).map_err(|e| Error::VersionComputeFailed {
                package: fqn.clone(),
                cause: e.to_string(),
            })?;
        if !serialized.contains(PKG_VERSION_TOKEN) {
            continue;
        }

        let pkg_version = version::version(app, pkg)?;
        let substituted = serialized.replace(PKG_VERSION_TOKEN, &pkg_version);
        let value: serde_yaml::Value =
            serde_yaml::from_str(&substituted).map_err(|e| Error::VersionComputeFailed {
                package: fqn.clone(),
                cause: e.to_string(),
            })?;
        let config = PackageConfig::from_value(pkg.tpe, value)?;
        replacements.push((fqn.clone(), config));
    }

    for (fqn, config) in replacements {
        let entry = app.packages.get_mut(&fqn).expect("package disappeared during load");
        match Arc::get_mut(entry) {
            Some(pkg) => pkg.config = config,
            // shared with an inner application which already resolved it
            None => warn!(package = %fqn, "cannot resolve builtin variables of shared package"),
        }
    }
    Ok(())
}
