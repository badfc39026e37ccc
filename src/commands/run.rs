// src/commands/run.rs

//! The run command: executes a script after building its dependencies

use anyhow::Result;
use std::sync::Arc;

use gorpa::cache::remote_cache_for;
use gorpa::{BuildOptions, CacheLevel, ConsoleReporter, LocalCache, Settings};

use super::{get_application, GlobalArgs};

pub async fn cmd_run(
    global: &GlobalArgs,
    script: &str,
    cache: Option<CacheLevel>,
    settings: &Settings,
) -> Result<()> {
    let app = get_application(global, settings).await?;

    let cache_level = cache.unwrap_or(settings.default_cache_level);
    let local_cache = LocalCache::new(&settings.local_cache_dir())?;
    let remote_cache = remote_cache_for(settings, cache_level);

    let mut opts = BuildOptions::new(local_cache)
        .with_remote_cache(Arc::from(remote_cache))
        .with_reporter(Arc::new(ConsoleReporter::new()));
    opts.build_dir = settings.build_root();
    opts.invocation_args = std::env::args().collect();

    gorpa::run_script(app, script, opts).await?;
    Ok(())
}
