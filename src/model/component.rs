// src/model/component.rs

//! Component manifests and their loading
//!
//! A component is a directory carrying a `BUILD.yaml`. Loading performs
//! textual `${name}` substitution on the manifest bytes, records every
//! package's unsubstituted definition, resolves source globs, qualifies
//! dependency references and applies the active variant overlay.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::glob;

use super::package::{
    Package, PackageConfig, PackageType, Script, ScriptType, WorkdirLayout,
};
use super::variant::{deep_merge, PackageVariant};

/// Name of the component manifest file
pub const COMPONENT_MANIFEST: &str = "BUILD.yaml";

/// Git state of a directory tree
#[derive(Debug, Clone, Default)]
pub struct GitInfo {
    /// HEAD commit, if the directory is a repository root
    pub commit: Option<String>,
    /// URL of the `origin` remote
    pub origin: Option<String>,
    /// Whether the working tree has uncommitted changes
    pub dirty: bool,
}

impl GitInfo {
    /// Resolves the Git state of `dir`. Only directories that are
    /// themselves a repository root (contain `.git`) yield a commit.
    pub fn resolve(dir: &Path) -> Self {
        if !dir.join(".git").is_dir() {
            return Self::default();
        }

        let run = |args: &[&str]| -> Option<String> {
            let out = Command::new("git").args(args).current_dir(dir).output().ok()?;
            if !out.status.success() {
                return None;
            }
            Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
        };

        let commit = run(&["rev-parse", "HEAD"]);
        let origin = run(&["config", "--get", "remote.origin.url"]);
        let dirty = run(&["status", "--porcelain"]).map(|s| !s.is_empty()).unwrap_or(true);
        Self { commit, origin, dirty }
    }
}

/// A directory containing a component manifest
#[derive(Debug, Default)]
pub struct Component {
    /// Path relative to the application origin, or `//` for the root
    pub name: String,
    pub origin: PathBuf,
    /// Constants defined in the manifest; they override build arguments
    /// during substitution
    pub constants: BTreeMap<String, String>,
    pub git: GitInfo,
    /// Signing key for attestations of this component's packages,
    /// overriding the process-wide key
    pub provenance_key_path: Option<PathBuf>,
}

/// Shared context for loading components of one application
#[derive(Debug, Clone)]
pub(crate) struct LoaderContext {
    pub origin: PathBuf,
    pub args: BTreeMap<String, String>,
    pub variant: Option<PackageVariant>,
    pub ignores: Vec<String>,
}

impl LoaderContext {
    pub fn should_ignore(&self, path: &str) -> bool {
        self.ignores
            .iter()
            .filter(|p| !p.trim().is_empty())
            .any(|p| path.contains(p.trim()))
    }
}

/// A component together with its packages and scripts, as produced by the
/// per-manifest loading tasks.
#[derive(Debug)]
pub(crate) struct LoadedComponent {
    pub component: Arc<Component>,
    pub packages: Vec<Package>,
    pub scripts: Vec<Script>,
}

#[derive(Debug, Deserialize)]
struct ConstantsOnly {
    #[serde(default, rename = "const")]
    constants: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentManifest {
    #[serde(default, rename = "const")]
    constants: BTreeMap<String, String>,
    #[serde(default)]
    provenance_key_path: Option<PathBuf>,
    #[serde(default)]
    packages: Vec<PackageManifest>,
    #[serde(default)]
    scripts: Vec<ScriptManifest>,
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    name: String,
    #[serde(rename = "type")]
    tpe: PackageType,
    #[serde(default)]
    srcs: Vec<String>,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    layout: BTreeMap<String, String>,
    #[serde(default)]
    argdeps: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    config: serde_yaml::Value,
    #[serde(default)]
    ephemeral: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptManifest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    tpe: ScriptType,
    #[serde(default)]
    workdir_layout: WorkdirLayout,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    script: String,
}

/// Replaces every `${identifier}` occurrence in `content` with the value
/// from `args`. Unknown identifiers are left verbatim for later vetting.
pub fn replace_build_arguments(content: &str, args: &BTreeMap<String, String>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

    re.replace_all(content, |caps: &regex::Captures<'_>| {
        match args.get(&caps[1]) {
            Some(val) => val.clone(),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

/// Loads a component from its `BUILD.yaml` path.
pub(crate) fn load_component(ctx: &LoaderContext, path: &Path) -> Result<LoadedComponent> {
    let mut fc = std::fs::read_to_string(path).map_err(|e| Error::manifest(path, e))?;
    if fc.trim().is_empty() {
        fc = "{}".to_string();
    }

    // constants are parsed first so they participate in substitution
    let consts: ConstantsOnly =
        serde_yaml::from_str(&fc).map_err(|e| Error::manifest(path, e))?;
    let mut compargs = ctx.args.clone();
    for (k, v) in &consts.constants {
        compargs.insert(k.clone(), v.clone());
    }

    let substituted = if compargs.is_empty() {
        fc.clone()
    } else {
        replace_build_arguments(&fc, &compargs)
    };

    let manifest: ComponentManifest =
        serde_yaml::from_str(&substituted).map_err(|e| Error::manifest(path, e))?;
    let raw: serde_yaml::Value =
        serde_yaml::from_str(&fc).map_err(|e| Error::manifest(path, e))?;

    let origin = path
        .parent()
        .ok_or_else(|| Error::manifest(path, "manifest has no parent directory"))?
        .to_path_buf();
    let name = component_name(&ctx.origin, &origin);

    let component = Arc::new(Component {
        name: name.clone(),
        origin: origin.clone(),
        constants: manifest.constants,
        git: GitInfo::resolve(&origin),
        provenance_key_path: manifest.provenance_key_path,
    });

    let raw_packages = raw
        .get("packages")
        .and_then(|v| v.as_sequence())
        .cloned()
        .unwrap_or_default();

    let mut packages = Vec::with_capacity(manifest.packages.len());
    for (idx, pm) in manifest.packages.into_iter().enumerate() {
        let pkg = load_package(ctx, &component, pm, raw_packages.get(idx), path)?;
        packages.push(pkg);
    }

    let mut scripts = Vec::with_capacity(manifest.scripts.len());
    for sm in manifest.scripts {
        scripts.push(Script {
            name: sm.name,
            component: component.clone(),
            description: sm.description,
            tpe: sm.tpe,
            workdir_layout: sm.workdir_layout,
            environment: sm.env,
            dependencies: qualify_references(&name, sm.deps),
            script: sm.script,
        });
    }

    debug!(component = %name, packages = packages.len(), scripts = scripts.len(), "loaded component");
    Ok(LoadedComponent { component, packages, scripts })
}

fn load_package(
    ctx: &LoaderContext,
    component: &Arc<Component>,
    pm: PackageManifest,
    raw_def: Option<&serde_yaml::Value>,
    manifest_path: &Path,
) -> Result<Package> {
    let fqn = format!("{}:{}", component.name, pm.name);

    if let Some(def) = raw_def {
        if def.get("type").and_then(|t| t.as_str()) == Some("server-typescript") {
            warn!(package = %fqn, "package uses deprecated \"server-typescript\" type - use \"server-js\" instead");
        }
    }

    // the definition is the package's manifest before substitution; it
    // feeds the version hash
    let definition = match raw_def {
        Some(def) => serde_yaml::to_string(def)
            .map_err(|e| Error::manifest(manifest_path, e))?
            .into_bytes(),
        None => Vec::new(),
    };

    // variant config overlays merge onto the raw config before typing
    let mut config_value = pm.config;
    if let Some(vnt) = &ctx.variant {
        if let Some(overlay) = vnt.config_for(pm.tpe) {
            deep_merge(&mut config_value, overlay.clone());
        }
    }
    let config = PackageConfig::from_value(pm.tpe, config_value)
        .map_err(|e| Error::manifest(manifest_path, format!("{}: {}", fqn, e)))?;

    let additional = config.additional_sources();
    if pm.srcs.is_empty() && additional.is_empty() {
        return Err(Error::manifest(
            manifest_path,
            format!("package {} has no sources", fqn),
        ));
    }

    let mut sources = std::collections::BTreeSet::new();
    let ignore: &glob::IgnoreFn = &|p: &str| ctx.should_ignore(p);
    for ptn in &pm.srcs {
        for src in glob::glob(&component.origin, ptn, Some(ignore))? {
            sources.insert(src);
        }
    }
    for src in &additional {
        let fullpath = component.origin.join(src);
        if !fullpath.exists() {
            return Err(Error::manifest(
                manifest_path,
                format!("{}: additional source {} does not exist", fqn, src),
            ));
        }
        sources.insert(fullpath);
    }
    if let Some(vnt) = &ctx.variant {
        let (incl, excl) = vnt.resolve_sources(&component.origin)?;
        for src in incl {
            sources.insert(src);
        }
        for src in excl {
            sources.remove(&src);
        }
    }

    // version-relevant arguments become `name: value` entries
    let argument_dependencies = pm
        .argdeps
        .iter()
        .map(|argdep| {
            let val = ctx.args.get(argdep).map(String::as_str).unwrap_or("<not-set>");
            format!("{}: {}", argdep, val)
        })
        .collect();

    let dependencies = qualify_references(&component.name, pm.deps);
    let layout = pm
        .layout
        .into_iter()
        .map(|(dep, loc)| {
            if let Some(stripped) = dep.strip_prefix(':') {
                (format!("{}:{}", component.name, stripped), loc)
            } else {
                (dep, loc)
            }
        })
        .collect();

    let mut environment = pm.env;
    if let Some(vnt) = &ctx.variant {
        environment = merge_environment(environment, &vnt.env)?;
    }

    Ok(Package {
        name: pm.name,
        component: component.clone(),
        full_name_override: None,
        tpe: pm.tpe,
        raw_sources: pm.srcs,
        sources: sources.into_iter().collect(),
        dependencies,
        layout,
        argument_dependencies,
        environment,
        config,
        definition,
        ephemeral: pm.ephemeral,
        version: OnceLock::new(),
    })
}

/// Rewrites references of the form `:name` as `<component>:name`.
fn qualify_references(component: &str, refs: Vec<String>) -> Vec<String> {
    refs.into_iter()
        .map(|dep| {
            if let Some(stripped) = dep.strip_prefix(':') {
                format!("{}:{}", component, stripped)
            } else {
                dep
            }
        })
        .collect()
}

/// Key-preserving merge of KEY=VALUE environment lists; entries from
/// `overlay` win. The result is sorted by key.
fn merge_environment(base: Vec<String>, overlay: &[String]) -> Result<Vec<String>> {
    let mut env = BTreeMap::new();
    for kv in base.iter().chain(overlay.iter()) {
        let (key, value) = kv.split_once('=').ok_or_else(|| {
            Error::InvalidArgument(format!("environment variable must have format KEY=VALUE: {}", kv))
        })?;
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect())
}

/// Derives the component name from its origin, relative to the application
/// origin. The application root itself is named `//`.
pub fn component_name(app_origin: &Path, comp_origin: &Path) -> String {
    match comp_origin.strip_prefix(app_origin) {
        Ok(rel) if rel.as_os_str().is_empty() => "//".to_string(),
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => comp_origin.to_string_lossy().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_build_arguments() {
        let mut args = BTreeMap::new();
        args.insert("msg".to_string(), "hello".to_string());

        let res = replace_build_arguments("cmd: [echo, \"${msg}\"]", &args);
        assert_eq!(res, "cmd: [echo, \"hello\"]");
    }

    #[test]
    fn test_unknown_arguments_left_verbatim() {
        let args = BTreeMap::new();
        let res = replace_build_arguments("image: foo:${__pkg_version}", &args);
        assert_eq!(res, "image: foo:${__pkg_version}");
    }

    #[test]
    fn test_substitution_is_ascii_identifier_only() {
        let mut args = BTreeMap::new();
        args.insert("a".to_string(), "x".to_string());
        // structural or non-identifier forms are not substituted
        let res = replace_build_arguments("${a} ${a.b} ${ a } $a", &args);
        assert_eq!(res, "x ${a.b} ${ a } $a");
    }

    #[test]
    fn test_qualify_references() {
        let refs = vec![":foo".to_string(), "other:bar".to_string()];
        let out = qualify_references("comp", refs);
        assert_eq!(out, vec!["comp:foo", "other:bar"]);
    }

    #[test]
    fn test_merge_environment_overlay_wins() {
        let base = vec!["A=1".to_string(), "B=2".to_string()];
        let overlay = vec!["B=3".to_string(), "C=4=5".to_string()];
        let out = merge_environment(base, &overlay).unwrap();
        assert_eq!(out, vec!["A=1", "B=3", "C=4=5"]);
    }

    #[test]
    fn test_merge_environment_rejects_malformed() {
        assert!(merge_environment(vec!["NOEQUALS".to_string()], &[]).is_err());
    }

    #[test]
    fn test_component_name() {
        let app = Path::new("/repo");
        assert_eq!(component_name(app, Path::new("/repo")), "//");
        assert_eq!(component_name(app, Path::new("/repo/pkg1")), "pkg1");
        assert_eq!(component_name(app, Path::new("/repo/a/b")), "a/b");
    }

    #[test]
    fn test_load_component_records_definition() {
        let dir = tempfile::tempdir().unwrap();
        let comp_dir = dir.path().join("pkg1");
        std::fs::create_dir_all(&comp_dir).unwrap();
        std::fs::write(comp_dir.join("main.txt"), "content").unwrap();
        std::fs::write(
            comp_dir.join(COMPONENT_MANIFEST),
            "const:\n  who: world\npackages:\n- name: foo\n  type: generic\n  srcs:\n  - \"**/*.txt\"\n  config:\n    commands:\n    - [\"echo\", \"${who}\"]\n",
        )
        .unwrap();

        let ctx = LoaderContext {
            origin: dir.path().to_path_buf(),
            args: BTreeMap::new(),
            variant: None,
            ignores: Vec::new(),
        };
        let loaded = load_component(&ctx, &comp_dir.join(COMPONENT_MANIFEST)).unwrap();
        assert_eq!(loaded.component.name, "pkg1");
        assert_eq!(loaded.packages.len(), 1);

        let pkg = &loaded.packages[0];
        assert_eq!(pkg.full_name(), "pkg1:foo");
        assert_eq!(pkg.sources.len(), 1);
        // the definition keeps the unsubstituted bytes
        let def = String::from_utf8(pkg.definition.clone()).unwrap();
        assert!(def.contains("${who}"));
        // the effective config saw the constant
        match &pkg.config {
            PackageConfig::Generic(cfg) => {
                assert_eq!(cfg.commands, vec![vec!["echo".to_string(), "world".to_string()]])
            }
            _ => panic!("wrong config type"),
        }
    }

    #[test]
    fn test_load_component_requires_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(COMPONENT_MANIFEST),
            "packages:\n- name: foo\n  type: generic\n",
        )
        .unwrap();

        let ctx = LoaderContext {
            origin: dir.path().to_path_buf(),
            args: BTreeMap::new(),
            variant: None,
            ignores: Vec::new(),
        };
        let err = load_component(&ctx, &dir.path().join(COMPONENT_MANIFEST)).unwrap_err();
        assert!(err.to_string().contains("//:foo"));
    }
}
