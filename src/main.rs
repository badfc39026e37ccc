// src/main.rs

//! gorpa - CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

use gorpa::{CacheLevel, Settings};

mod commands;

use commands::{AssertArgs, BuildArgs, CollectKind, GlobalArgs, OutputFormat};

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "gorpa")]
#[command(version)]
#[command(about = "A caching meta-build system", long_about = "gorpa is a heavily caching build system for container, server-js, \
compiled-native and generic packages. It knows three core concepts:\n\
  Application: the root of all operations, marked by an APPLICATION.yaml file.\n\
  Component:   every folder carrying a BUILD.yaml, identified by its path relative to the application root.\n\
  Package:     a buildable unit declared by a component, e.g. some-component:pkg.\n\n\
Configuration happens through the manifests and the environment: APPLICATION_ROOT, \
REMOTE_CACHE_BUCKET, REMOTE_CACHE_STORAGE, CACHE_DIR, BUILD_DIR, DEFAULT_CACHE_LEVEL, \
PROVENANCE_KEYPATH, NESTED_APPLICATION and EXPERIMENTAL.")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Builds a package and its dependencies
    Build(BuildArgs),

    /// Describes a package, its dependencies or the environment manifest
    Describe {
        #[command(subcommand)]
        what: DescribeCommands,
    },

    /// Collects all packages, components or scripts of an application
    Collect {
        /// What to collect
        #[arg(value_enum, default_value = "packages")]
        kind: CollectKind,

        /// Filter by component constants, e.g. `-l foo` or `-l foo=bar`
        #[arg(short = 'l', long)]
        select: Option<String>,

        /// Structured output format; defaults to plain lines
        #[arg(short = 'o', long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Builds a script's dependencies, then runs the script
    Run {
        /// Fully qualified script name
        script: String,

        /// Caching behaviour for the dependency builds
        #[arg(short = 'c', long)]
        cache: Option<CacheLevel>,
    },

    /// Checks the loaded application for suspicious manifests
    Vet {
        /// Only report errors, not warnings
        #[arg(long)]
        ignore_warnings: bool,
    },

    /// Works with attestation bundles
    Provenance {
        #[command(subcommand)]
        what: ProvenanceCommands,
    },

    /// Prints the version of this build
    Version,
}

#[derive(Subcommand)]
enum DescribeCommands {
    /// Lists the transitive dependencies of a package in build order
    Dependencies {
        /// Package to describe; defaults to the application's default
        /// target
        target: Option<String>,

        #[arg(short = 'o', long, value_enum, default_value = "json")]
        output: OutputFormat,
    },

    /// Prints the resolved environment manifest
    EnvironmentManifest,

    /// Describes a package (any other argument)
    #[command(external_subcommand)]
    Package(Vec<String>),
}

#[derive(Subcommand)]
enum ProvenanceCommands {
    /// Runs assertions over a bundle
    Assert(AssertArgs),
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let settings = Settings::from_env();

    match run(cli, &settings).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, settings: &Settings) -> Result<ExitCode> {
    let global = &cli.global;
    match cli.command {
        Commands::Build(args) => {
            commands::cmd_build(global, &args, settings).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Describe { what } => {
            match what {
                DescribeCommands::Dependencies { target, output } => {
                    commands::cmd_describe_dependencies(global, target.as_deref(), output, settings)
                        .await?
                }
                DescribeCommands::EnvironmentManifest => {
                    commands::cmd_describe_environment_manifest(global, settings).await?
                }
                DescribeCommands::Package(args) => {
                    let (target, output) = parse_describe_package_args(&args)?;
                    commands::cmd_describe(global, target.as_deref(), output, settings).await?
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Collect { kind, select, output } => {
            commands::cmd_collect(global, kind, select.as_deref(), output, settings).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run { script, cache } => {
            commands::cmd_run(global, &script, cache, settings).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Vet { ignore_warnings } => {
            let code = commands::cmd_vet(global, ignore_warnings, settings).await?;
            Ok(ExitCode::from(code as u8))
        }

        Commands::Provenance { what } => match what {
            ProvenanceCommands::Assert(args) => {
                let code = commands::cmd_provenance_assert(global, &args, settings).await?;
                Ok(ExitCode::from(code as u8))
            }
        },

        Commands::Version => {
            println!("gorpa {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `describe <pkg> [-o json|yaml]` arrives as an external subcommand; parse
/// the package name and the optional output flag by hand.
fn parse_describe_package_args(args: &[String]) -> Result<(Option<String>, OutputFormat)> {
    let mut target = None;
    let mut output = OutputFormat::Json;
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-o" | "--output" => {
                let Some(value) = iter.next() else {
                    anyhow::bail!("{} requires a value", arg);
                };
                output = match value.as_str() {
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    other => anyhow::bail!("unknown output format: {}", other),
                };
            }
            other if target.is_none() => target = Some(other.to_string()),
            other => anyhow::bail!("unexpected argument: {}", other),
        }
    }
    Ok((target, output))
}
