// src/commands/build.rs

//! The build command

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use gorpa::cache::remote_cache_for;
use gorpa::version;
use gorpa::{BuildOptions, CacheLevel, ConsoleReporter, JsonReporter, LocalCache, Reporter, Settings};

use super::{get_application, resolve_target, GlobalArgs};

/// Reporter selection on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Console,
    Jsonl,
}

#[derive(Debug, clap::Args)]
pub struct BuildArgs {
    /// Package to build; defaults to the application's default target
    pub target: Option<String>,

    /// Caching behaviour
    #[arg(short = 'c', long)]
    pub cache: Option<CacheLevel>,

    /// Don't actually build - stop after showing what would need to be
    /// built
    #[arg(long)]
    pub dry_run: bool,

    /// Writes the build plan as newline-delimited JSON to a file; use "-"
    /// for stderr
    #[arg(long)]
    pub dump_plan: Option<PathBuf>,

    /// Disable all package-level tests
    #[arg(long)]
    pub dont_test: bool,

    /// Disable container image re-tagging
    #[arg(long)]
    pub dont_retag: bool,

    /// Limit the number of concurrent build tasks; 0 disables the limit
    #[arg(short = 'j', long)]
    pub max_concurrent_tasks: Option<usize>,

    /// Report format
    #[arg(long, value_enum, default_value = "console")]
    pub report: ReportFormat,

    /// After a successful build, save the artifact to this path
    #[arg(long)]
    pub save: Option<PathBuf>,
}

pub async fn cmd_build(global: &GlobalArgs, args: &BuildArgs, settings: &Settings) -> Result<()> {
    let app = get_application(global, settings).await?;
    let target = resolve_target(&app, args.target.as_deref())?;

    let cache_level = args.cache.unwrap_or(settings.default_cache_level);
    debug!(%cache_level, "configuring caches");

    // with caching disabled the local cache is a throwaway directory
    let mut _cache_guard = None;
    let local_dir = if cache_level == CacheLevel::None {
        let dir = tempfile::tempdir().context("cannot create throwaway cache")?;
        let path = dir.path().to_path_buf();
        _cache_guard = Some(dir);
        path
    } else {
        settings.local_cache_dir()
    };
    let local_cache = LocalCache::new(&local_dir)?;
    let remote_cache = remote_cache_for(settings, cache_level);

    let reporter: Arc<dyn Reporter> = match args.report {
        ReportFormat::Console => Arc::new(ConsoleReporter::new()),
        ReportFormat::Jsonl => Arc::new(JsonReporter::new()),
    };

    let mut opts = BuildOptions::new(local_cache.clone())
        .with_remote_cache(Arc::from(remote_cache))
        .with_reporter(reporter);
    opts.dry_run = args.dry_run;
    opts.dump_plan = args.dump_plan.clone();
    opts.dont_test = args.dont_test;
    opts.dont_retag = args.dont_retag;
    if let Some(max) = args.max_concurrent_tasks {
        opts.max_concurrent_tasks = max;
    }
    opts.build_dir = settings.build_root();
    opts.invocation_args = std::env::args().collect();

    gorpa::build(app.clone(), &target, opts).await?;

    if let Some(save) = &args.save {
        let pkg = app.package(&target)?;
        let pkg_version = version::version(&app, pkg)?;
        let (loc, present) = local_cache.location(&pkg_version);
        if !present {
            anyhow::bail!("build result is not in the local cache despite just being built");
        }
        std::fs::copy(&loc, save)
            .with_context(|| format!("cannot save build result to {}", save.display()))?;
        println!("saved build result to {}", save.display());
    }

    Ok(())
}
