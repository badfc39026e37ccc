// src/lib.rs

//! gorpa - a caching meta-build system
//!
//! gorpa composes heterogeneous language-native builds (container images,
//! server-js packages, compiled-native modules, arbitrary command
//! sequences) into one dependency-aware pipeline with content-addressed
//! caching.
//!
//! # Concepts
//!
//! - Application: the repository root, marked by an `APPLICATION.yaml`.
//!   All component names are relative to this path.
//! - Component: every directory below the application origin carrying a
//!   `BUILD.yaml`. Identified by its path relative to the origin.
//! - Package: a buildable unit declared by a component, identified as
//!   `<component>:<name>`. Every package has a content-addressed version;
//!   any observable change to its sources, definition, arguments,
//!   dependencies or environment yields a new version.
//! - Artifact: the gzip-compressed tar output of a package build, stored
//!   in the local cache and exchanged with remote caches under the
//!   package version.
//! - Attestation bundle: SLSA-style provenance envelopes accumulated
//!   across the dependency chain and carried inside every artifact.

pub mod archive;
pub mod build;
pub mod cache;
pub mod config;
mod error;
pub mod glob;
pub mod model;
pub mod provenance;
pub mod report;
pub mod version;
pub mod vet;

pub use build::{build, run_script, BuildOptions};
pub use cache::{LocalCache, RemoteCache};
pub use config::{CacheLevel, Settings};
pub use error::{Error, Result};
pub use model::{
    find_application, find_nested_applications, Application, Arguments, Component, Package,
    PackageType, Script,
};
pub use report::{ConsoleReporter, JsonReporter, PlanEntry, Reporter};
