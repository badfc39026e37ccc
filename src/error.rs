// src/error.rs

//! Central error type for the gorpa build engine
//!
//! Load-phase errors (manifest, linking, cycles, environment probes) abort
//! the whole operation. Build-phase errors fail exactly one package; the
//! scheduler cancels dependents while completed artifacts stay cached.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the build engine
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or parsing a manifest failed
    #[error("{path}: {cause}")]
    ManifestLoad { path: PathBuf, cause: String },

    /// A package or script references a package that is not in the index
    #[error("{referrer}: package \"{dependency}\" is unknown")]
    UnknownDependency { referrer: String, dependency: String },

    /// The dependency graph contains a cycle
    #[error("dependency cycle found: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// Walking the package index did not terminate - the index is broken
    #[error("[internal error] dependency walk exceeds package count: the package index is not built properly")]
    IndexCorrupt,

    /// An environment manifest entry's command failed
    #[error("cannot resolve environment manifest entry {entry}: {cause}")]
    EnvironmentProbeFailed { entry: String, cause: String },

    /// Computing a package version failed
    #[error("cannot compute version of {package}: {cause}")]
    VersionComputeFailed { package: String, cause: String },

    /// A dependency was not built before its dependent - scheduler bug
    #[error("package {0} is not built")]
    DependencyNotBuilt(String),

    /// A build step of a package failed
    #[error("build of {package} failed at {stage}: {output}")]
    BuildFailed {
        package: String,
        stage: String,
        output: String,
        exit_code: Option<i32>,
    },

    /// A local cache operation failed
    #[error("cache {operation} failed for {path}: {cause}")]
    CacheIo {
        operation: &'static str,
        path: PathBuf,
        cause: String,
    },

    /// A remote cache transfer failed
    #[error("remote cache {operation} failed for {package}: {cause}")]
    RemoteCacheIo {
        operation: &'static str,
        package: String,
        cause: String,
    },

    /// Producing or attaching an attestation signature failed
    #[error("cannot sign provenance of {package}: {cause}")]
    SigningFailed { package: String, cause: String },

    /// Producing or consuming an attestation bundle failed
    #[error("provenance error for {package}: {cause}")]
    Provenance { package: String, cause: String },

    /// Anything the caller handed us that does not make sense
    #[error("{0}")]
    InvalidArgument(String),
}

impl Error {
    /// Annotate an I/O error with the manifest path it occurred on
    pub fn manifest(path: impl Into<PathBuf>, cause: impl ToString) -> Self {
        Error::ManifestLoad {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether this error belongs to the load phase (aborts everything)
    /// rather than the build phase (fails one package).
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Error::ManifestLoad { .. }
                | Error::UnknownDependency { .. }
                | Error::CycleDetected { .. }
                | Error::IndexCorrupt
                | Error::EnvironmentProbeFailed { .. }
                | Error::VersionComputeFailed { .. }
        )
    }
}
