// src/model/variant.rs

//! Package variants - named overlays over the loaded application
//!
//! A variant may add or remove source files, exclude whole components,
//! override package environments and deep-merge type-specific
//! configuration. At most one variant is active per build.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::glob;

use super::package::PackageType;

/// Source patterns a variant adds to or removes from packages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantSources {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A named overlay over packages of an application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageVariant {
    pub name: String,
    #[serde(default)]
    pub srcs: VariantSources,
    /// Components removed entirely when this variant is active
    #[serde(default)]
    pub exclude_components: Vec<String>,
    /// KEY=VALUE pairs merged over package environments, key-preserving
    #[serde(default)]
    pub env: Vec<String>,
    /// Per-type configuration overlays, deep-merged over package config
    #[serde(default)]
    pub config: BTreeMap<PackageType, serde_yaml::Value>,
}

impl PackageVariant {
    /// Whether this variant removes the named component.
    pub fn excludes_component(&self, name: &str) -> bool {
        self.exclude_components.iter().any(|c| c == name)
    }

    /// The configuration overlay for a package type, if any.
    pub fn config_for(&self, tpe: PackageType) -> Option<&serde_yaml::Value> {
        self.config.get(&tpe)
    }

    /// Resolves the include/exclude patterns against a component origin.
    /// Returns the included and excluded file sets.
    pub fn resolve_sources(&self, origin: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut incl = Vec::new();
        for ptn in &self.srcs.include {
            incl.extend(glob::glob(origin, ptn, None)?);
        }
        let mut excl = Vec::new();
        for ptn in &self.srcs.exclude {
            excl.extend(glob::glob(origin, ptn, None)?);
        }
        Ok((incl, excl))
    }
}

/// Deep-merges `overlay` into `dst`. Mappings merge recursively with
/// overlay entries winning; scalars and sequences are replaced wholesale.
pub fn deep_merge(dst: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (dst, overlay) {
        (serde_yaml::Value::Mapping(dst_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match dst_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst_map.insert(key, value);
                    }
                }
            }
        }
        (dst, overlay) => *dst = overlay,
    }
}
