// src/build/mod.rs

//! Build scheduling and execution
//!
//! The scheduler computes the transitive closure of the target, sorts it
//! topologically (ties broken by fully qualified name), consults the local
//! and remote caches and walks the resulting plan with bounded parallelism.
//! A package starts strictly after all its dependencies completed; when a
//! package fails, not-yet-started work is cancelled while in-flight builds
//! run to completion and the first failure wins.
//!
//! The type-specific build procedures live in the sibling modules; they
//! share the common prepare/materialize/pack procedure implemented here.

mod compiled_native;
mod container;
mod generic;
mod script;
mod server_js;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{ArtifactRef, LocalCache, RemoteCache};
use crate::error::{Error, Result};
use crate::model::{filesystem_safe_name, Application, Package, PackageType};
use crate::provenance;
use crate::report::{PlanEntry, Reporter, SilentReporter};
use crate::version;

pub use script::run_script;

/// Options of a single build run
#[derive(Clone)]
pub struct BuildOptions {
    pub local_cache: LocalCache,
    pub remote_cache: Arc<dyn RemoteCache>,
    pub reporter: Arc<dyn Reporter>,
    /// Print the plan and stop
    pub dry_run: bool,
    /// Write the plan as newline-delimited JSON to this path; `-` selects
    /// stderr
    pub dump_plan: Option<PathBuf>,
    /// Disable package-level tests
    pub dont_test: bool,
    /// Disable container image re-tagging on cache hits
    pub dont_retag: bool,
    /// Concurrency limit; 0 disables the cap
    pub max_concurrent_tasks: usize,
    /// Working root for build directories
    pub build_dir: PathBuf,
    /// Process arguments recorded in attestations
    pub invocation_args: Vec<String>,
}

impl BuildOptions {
    pub fn new(local_cache: LocalCache) -> Self {
        Self {
            local_cache,
            remote_cache: Arc::new(crate::cache::NoRemoteCache),
            reporter: Arc::new(SilentReporter),
            dry_run: false,
            dump_plan: None,
            dont_test: false,
            dont_retag: false,
            max_concurrent_tasks: num_cpus(),
            build_dir: std::env::temp_dir().join("gorpa-build"),
            invocation_args: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_remote_cache(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote_cache = remote;
        self
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Shared state of one build run, available to all builders
pub(crate) struct BuildContext {
    pub app: Arc<Application>,
    /// Versions of every package in the closure
    pub versions: BTreeMap<String, String>,
    pub local_cache: LocalCache,
    pub reporter: Arc<dyn Reporter>,
    pub dont_test: bool,
    pub dont_retag: bool,
    pub build_dir: PathBuf,
    pub invocation_args: Vec<String>,
}

impl BuildContext {
    pub fn version_of(&self, pkg: &Package) -> Result<String> {
        self.versions
            .get(&pkg.full_name())
            .cloned()
            .ok_or_else(|| Error::DependencyNotBuilt(pkg.full_name()))
    }
}

/// Working directories of one package build
pub(crate) struct BuildPaths {
    /// Sources and materialized dependencies
    pub workdir: PathBuf,
    /// Files collected here form the artifact
    pub staging: PathBuf,
    /// Sub-paths of `workdir` holding materialized dependencies
    pub dependency_dirs: Vec<PathBuf>,
}

/// Builds `target` and its transitive dependencies.
pub async fn build(app: Arc<Application>, target: &str, opts: BuildOptions) -> Result<()> {
    let run_started = Instant::now();
    let res = build_inner(app, target, &opts).await;
    opts.reporter.build_finished(res.is_ok(), run_started.elapsed());
    res
}

async fn build_inner(app: Arc<Application>, target: &str, opts: &BuildOptions) -> Result<()> {
    let target_pkg = app.package(target)?.clone();
    let order = topological_closure(&app, &target_pkg)?;

    let mut versions = BTreeMap::new();
    for pkg in &order {
        versions.insert(pkg.full_name(), version::version(&app, pkg)?);
    }

    let plan = compute_plan(&order, &versions, &opts.local_cache);
    opts.reporter.plan(&plan);
    if let Some(path) = &opts.dump_plan {
        dump_plan(path, &plan)?;
    }
    if opts.dry_run {
        return Ok(());
    }

    // ask the remote side for everything we do not have; misses are fine
    let missing: Vec<ArtifactRef> = plan
        .iter()
        .filter(|e| !e.cached)
        .map(|e| ArtifactRef {
            package: e.name.clone(),
            version: e.version.clone(),
        })
        .collect();
    if !missing.is_empty() {
        if let Err(e) = opts.remote_cache.download(&opts.local_cache, &missing).await {
            warn!(error = %e, "remote cache download failed");
        }
    }

    let ctx = Arc::new(BuildContext {
        app: app.clone(),
        versions: versions.clone(),
        local_cache: opts.local_cache.clone(),
        reporter: opts.reporter.clone(),
        dont_test: opts.dont_test,
        dont_retag: opts.dont_retag,
        build_dir: opts.build_dir.clone(),
        invocation_args: opts.invocation_args.clone(),
    });
    std::fs::create_dir_all(&ctx.build_dir).map_err(|e| Error::CacheIo {
        operation: "create",
        path: ctx.build_dir.clone(),
        cause: e.to_string(),
    })?;

    schedule(ctx, order, versions, opts).await
}

/// Walks the topologically sorted closure with bounded parallelism.
async fn schedule(
    ctx: Arc<BuildContext>,
    order: Vec<Arc<Package>>,
    versions: BTreeMap<String, String>,
    opts: &BuildOptions,
) -> Result<()> {
    let cap = opts.max_concurrent_tasks;
    let mut completed: BTreeSet<String> = BTreeSet::new();
    let mut started: BTreeSet<String> = BTreeSet::new();
    let mut tasks: JoinSet<(String, Instant, Result<bool>)> = JoinSet::new();
    let mut uploads: JoinSet<()> = JoinSet::new();
    let mut first_failure: Option<Error> = None;

    loop {
        // launch every runnable package, in plan order, while there is room
        if first_failure.is_none() {
            for pkg in &order {
                if cap != 0 && tasks.len() >= cap {
                    break;
                }
                let name = pkg.full_name();
                if started.contains(&name) {
                    continue;
                }
                if !pkg.dependencies.iter().all(|d| completed.contains(d)) {
                    continue;
                }

                started.insert(name.clone());
                let ctx = ctx.clone();
                let pkg = pkg.clone();
                tasks.spawn(async move {
                    let begun = Instant::now();
                    let res = build_package(&ctx, &pkg).await;
                    (pkg.full_name(), begun, res)
                });
            }
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok((name, begun, Ok(cache_hit))) => {
                let duration = begun.elapsed();
                let pkg_version = versions.get(&name).cloned().unwrap_or_default();
                ctx.reporter.package_built(&name, &pkg_version, duration, cache_hit);
                completed.insert(name.clone());

                let ephemeral = ctx.app.packages.get(&name).map(|p| p.ephemeral).unwrap_or(false);
                // once the run failed, results of in-flight builds are
                // discarded and nothing gets pushed anymore
                if !cache_hit && !ephemeral && first_failure.is_none() {
                    let remote = opts.remote_cache.clone();
                    let local = opts.local_cache.clone();
                    let artifact = ArtifactRef {
                        package: name,
                        version: pkg_version,
                    };
                    uploads.spawn(async move {
                        if let Err(e) = remote.upload(&local, &[artifact.clone()]).await {
                            warn!(package = %artifact.package, error = %e, "remote cache upload failed");
                        }
                    });
                }
            }
            Ok((name, _, Err(err))) => {
                ctx.reporter.package_failed(&name, &err);
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
            Err(join_err) => {
                if first_failure.is_none() {
                    first_failure = Some(Error::BuildFailed {
                        package: "<scheduler>".to_string(),
                        stage: "join".to_string(),
                        output: join_err.to_string(),
                        exit_code: None,
                    });
                }
            }
        }
    }

    while uploads.join_next().await.is_some() {}

    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// The transitive dependency closure of `target`, topologically sorted with
/// dependencies first. Ties are broken by fully qualified name.
pub fn topological_closure(app: &Application, target: &Package) -> Result<Vec<Arc<Package>>> {
    let mut closure: BTreeMap<String, Arc<Package>> = BTreeMap::new();
    closure.insert(target.full_name(), app.package(&target.full_name())?.clone());
    for dep in target.transitive_dependencies(app)? {
        closure.insert(dep.full_name(), dep.clone());
    }

    let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();
    for (name, pkg) in &closure {
        in_degree.insert(name.clone(), pkg.dependencies.len());
    }

    let mut ready: BTreeSet<String> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| name.clone())
        .collect();
    let mut order = Vec::with_capacity(closure.len());
    while let Some(name) = ready.iter().next().cloned() {
        ready.remove(&name);
        order.push(closure[&name].clone());

        for (other, pkg) in &closure {
            if pkg.dependencies.iter().any(|d| *d == name) {
                let deg = in_degree.get_mut(other).expect("closure is complete");
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(other.clone());
                }
            }
        }
    }

    if order.len() != closure.len() {
        // load-time cycle detection makes this unreachable
        return Err(Error::IndexCorrupt);
    }
    Ok(order)
}

fn compute_plan(
    order: &[Arc<Package>],
    versions: &BTreeMap<String, String>,
    local: &LocalCache,
) -> Vec<PlanEntry> {
    order
        .iter()
        .map(|pkg| {
            let name = pkg.full_name();
            let pkg_version = versions.get(&name).cloned().unwrap_or_default();
            let cached = local.contains(&pkg_version);
            let mut dependencies = pkg.dependencies.clone();
            dependencies.sort();
            PlanEntry {
                name,
                version: pkg_version,
                dependencies,
                cached,
                reason_for_build: if cached {
                    None
                } else {
                    Some("artifact not present in local cache".to_string())
                },
            }
        })
        .collect()
}

fn dump_plan(path: &Path, plan: &[PlanEntry]) -> Result<()> {
    let io_err = |e: std::io::Error| Error::CacheIo {
        operation: "plan",
        path: path.to_path_buf(),
        cause: e.to_string(),
    };
    if path.as_os_str() == "-" {
        crate::report::write_plan(&mut std::io::stderr(), plan).map_err(io_err)
    } else {
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        crate::report::write_plan(&mut file, plan).map_err(io_err)
    }
}

/// Builds a single package, or re-tags it if it is already cached.
/// Returns whether the artifact came from the cache.
async fn build_package(ctx: &BuildContext, pkg: &Package) -> Result<bool> {
    let fqn = pkg.full_name();
    let pkg_version = ctx.version_of(pkg)?;

    if ctx.local_cache.contains(&pkg_version) {
        if pkg.tpe == PackageType::Container && !ctx.dont_retag {
            container::retag(ctx, pkg, &pkg_version).await?;
        }
        return Ok(true);
    }

    ctx.reporter.package_started(&fqn, &pkg_version);
    debug!(package = %fqn, version = %pkg_version, "building package");

    let workdir_root = tempfile::Builder::new()
        .prefix(&format!("{}-", pkg.filesystem_safe_name()))
        .tempdir_in(&ctx.build_dir)
        .map_err(|e| Error::CacheIo {
            operation: "create",
            path: ctx.build_dir.clone(),
            cause: e.to_string(),
        })?;
    let workdir = workdir_root.path().join("build");
    let staging = workdir_root.path().join("out");
    let fs_err = |e: std::io::Error| Error::BuildFailed {
        package: fqn.clone(),
        stage: "prepare".to_string(),
        output: e.to_string(),
        exit_code: None,
    };
    std::fs::create_dir_all(&workdir).map_err(fs_err)?;
    std::fs::create_dir_all(&staging).map_err(fs_err)?;

    let dependency_dirs = materialize_dependencies(ctx, pkg, &workdir)?;
    copy_sources(ctx, pkg, &workdir)?;

    let paths = BuildPaths {
        workdir,
        staging,
        dependency_dirs,
    };
    match pkg.tpe {
        PackageType::Container => container::build(ctx, pkg, &paths).await?,
        PackageType::ServerJs => server_js::build(ctx, pkg, &paths).await?,
        PackageType::CompiledNative => compiled_native::build(ctx, pkg, &paths).await?,
        PackageType::Generic => generic::build(ctx, pkg, &paths).await?,
    }

    finish_artifact(ctx, pkg, &pkg_version, &paths.staging)?;
    Ok(false)
}

/// Extracts every transitive dependency's artifact into the working
/// directory, at the sub-path given by the package's layout map.
fn materialize_dependencies(
    ctx: &BuildContext,
    pkg: &Package,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for dep in pkg.transitive_dependencies(&ctx.app)? {
        let dep_name = dep.full_name();
        let dep_version = ctx.version_of(dep)?;
        let (loc, present) = ctx.local_cache.location(&dep_version);
        if !present {
            return Err(Error::DependencyNotBuilt(dep_name));
        }

        let sub_path = pkg
            .layout
            .get(&dep_name)
            .cloned()
            .unwrap_or_else(|| filesystem_safe_name(&dep_name));
        let dst = workdir.join(&sub_path);
        crate::archive::unpack(&loc, &dst)?;
        debug!(package = %pkg.full_name(), dependency = %dep_name, location = %sub_path, "materialized dependency");
        dirs.push(dst);
    }
    Ok(dirs)
}

/// Copies the package sources into the working directory, preserving their
/// paths relative to the component origin.
fn copy_sources(ctx: &BuildContext, pkg: &Package, workdir: &Path) -> Result<()> {
    let fqn = pkg.full_name();
    let fail = |cause: String| Error::BuildFailed {
        package: fqn.clone(),
        stage: "prepare".to_string(),
        output: cause,
        exit_code: None,
    };

    for src in &pkg.sources {
        let rel = src
            .strip_prefix(&pkg.component.origin)
            .or_else(|_| src.strip_prefix(&ctx.app.origin))
            .map_err(|_| fail(format!("source {} is outside the application", src.display())))?;
        let dst = workdir.join(rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        std::fs::copy(src, &dst).map_err(|e| fail(format!("{}: {}", src.display(), e)))?;
    }
    Ok(())
}

/// Attaches the attestation bundle and writes the staged files into the
/// local cache as a gzip'd tar artifact. No partial artifacts become
/// visible: packing goes to a temp file, then an atomic rename.
fn finish_artifact(ctx: &BuildContext, pkg: &Package, pkg_version: &str, staging: &Path) -> Result<()> {
    if ctx.app.provenance.enabled {
        let mut bundle =
            provenance::collect_dependency_bundles(&ctx.app, pkg, &ctx.local_cache, &ctx.versions)?;
        if ctx.app.provenance.slsa {
            let subjects = provenance::subjects_from_dir(staging, &pkg.full_name())?;
            let envelope =
                provenance::produce_envelope(&ctx.app, pkg, subjects, &ctx.invocation_args)?;
            let line = serde_json::to_string(&envelope).map_err(|e| Error::Provenance {
                package: pkg.full_name(),
                cause: e.to_string(),
            })?;
            bundle.insert(line);
        }
        provenance::write_bundle(&staging.join(provenance::BUNDLE_FILENAME), &bundle)?;
    }

    let slot = ctx.local_cache.slot()?;
    crate::archive::pack(staging, slot.path())?;
    ctx.local_cache.insert(pkg_version, slot)?;
    Ok(())
}

/// Runs one build step as a subprocess, captures its combined output and
/// reports it. A non-zero exit aborts the package build.
pub(crate) async fn run_step(
    ctx: &BuildContext,
    pkg: &Package,
    stage: &str,
    command: &[String],
    cwd: &Path,
) -> Result<String> {
    let fqn = pkg.full_name();
    let (cmd, args) = command.split_first().ok_or_else(|| Error::BuildFailed {
        package: fqn.clone(),
        stage: stage.to_string(),
        output: "empty command".to_string(),
        exit_code: None,
    })?;
    debug!(package = %fqn, stage, command = ?command, "running build step");

    let mut proc = tokio::process::Command::new(cmd);
    proc.args(args).current_dir(cwd);
    for kv in &pkg.environment {
        if let Some((key, value)) = kv.split_once('=') {
            proc.env(key, value);
        }
    }

    let out = proc.output().await.map_err(|e| Error::BuildFailed {
        package: fqn.clone(),
        stage: stage.to_string(),
        output: format!("cannot run {:?} in {}: {}", command, cwd.display(), e),
        exit_code: None,
    })?;

    let mut combined = String::from_utf8_lossy(&out.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&out.stderr));
    if !combined.is_empty() {
        ctx.reporter.package_log(&fqn, &combined);
    }

    if !out.status.success() {
        return Err(Error::BuildFailed {
            package: fqn,
            stage: stage.to_string(),
            output: format!("{:?} in {}: {}", command, cwd.display(), combined),
            exit_code: out.status.code(),
        });
    }
    Ok(combined)
}

/// Copies a tree, skipping the given sub-directories.
pub(crate) fn copy_tree(src: &Path, dst: &Path, exclude: &[PathBuf]) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let path = entry.path();
        if exclude.iter().any(|ex| path.starts_with(ex)) {
            continue;
        }
        let rel = path.strip_prefix(src).expect("walked path is below its root");
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::{test_application, test_package};

    fn app_with_chain() -> (Application, String) {
        let mut app = test_application();
        let c = test_package("c", vec![]);
        let b = test_package("b", vec!["testcomp:c".to_string()]);
        let a = test_package(
            "a",
            vec!["testcomp:b".to_string(), "testcomp:c".to_string()],
        );
        for p in [a, b, c] {
            app.packages.insert(p.full_name(), Arc::new(p));
        }
        (app, "testcomp:a".to_string())
    }

    #[test]
    fn test_topological_closure_order() {
        let (app, target) = app_with_chain();
        let target = app.packages[&target].clone();
        let order = topological_closure(&app, &target).unwrap();
        let names: Vec<_> = order.iter().map(|p| p.full_name()).collect();
        assert_eq!(names, vec!["testcomp:c", "testcomp:b", "testcomp:a"]);
    }

    #[test]
    fn test_topological_closure_ties_by_name() {
        let mut app = test_application();
        let z = test_package("z", vec![]);
        let a = test_package("a", vec![]);
        let top = test_package(
            "top",
            vec!["testcomp:z".to_string(), "testcomp:a".to_string()],
        );
        for p in [z, a, top] {
            app.packages.insert(p.full_name(), Arc::new(p));
        }

        let target = app.packages["testcomp:top"].clone();
        let order = topological_closure(&app, &target).unwrap();
        let names: Vec<_> = order.iter().map(|p| p.full_name()).collect();
        assert_eq!(names, vec!["testcomp:a", "testcomp:z", "testcomp:top"]);
    }

    #[test]
    fn test_plan_marks_cached_artifacts() {
        let (app, target) = app_with_chain();
        let dir = tempfile::tempdir().unwrap();
        let local = LocalCache::new(dir.path()).unwrap();

        let target = app.packages[&target].clone();
        let order = topological_closure(&app, &target).unwrap();
        let mut versions = BTreeMap::new();
        for pkg in &order {
            versions.insert(pkg.full_name(), version::version(&app, pkg).unwrap());
        }

        // pre-seed one artifact
        let cached_version = versions["testcomp:c"].clone();
        std::fs::write(local.location(&cached_version).0, b"x").unwrap();

        let plan = compute_plan(&order, &versions, &local);
        let by_name: BTreeMap<_, _> = plan.iter().map(|e| (e.name.clone(), e)).collect();
        assert!(by_name["testcomp:c"].cached);
        assert!(by_name["testcomp:c"].reason_for_build.is_none());
        assert!(!by_name["testcomp:a"].cached);
        assert!(by_name["testcomp:a"].reason_for_build.is_some());
    }

    #[test]
    fn test_copy_tree_honours_excludes() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("keep")).unwrap();
        std::fs::create_dir_all(src.path().join("skip")).unwrap();
        std::fs::write(src.path().join("keep/a.txt"), "a").unwrap();
        std::fs::write(src.path().join("skip/b.txt"), "b").unwrap();

        let dst = tempfile::tempdir().unwrap();
        copy_tree(src.path(), dst.path(), &[src.path().join("skip")]).unwrap();

        assert!(dst.path().join("keep/a.txt").is_file());
        assert!(!dst.path().join("skip").exists());
    }
}
