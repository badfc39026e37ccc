// src/vet.rs

//! Manifest lint checks
//!
//! Vet inspects a loaded application for suspicious manifests: unresolved
//! substitution tokens, deprecated package types, missing container files
//! and command-less generic packages. Findings are warnings unless marked
//! as errors.

use regex::Regex;
use std::sync::OnceLock;

use crate::model::{Application, PackageConfig, PKG_VERSION_TOKEN};

/// One vet finding
#[derive(Debug, Clone)]
pub struct Finding {
    /// Name of the check that produced this finding
    pub check: &'static str,
    /// Fully qualified package name the finding refers to
    pub package: String,
    pub description: String,
    /// Errors fail the vet run; warnings merely surface
    pub error: bool,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = if self.error { "ERR " } else { "WARN" };
        write!(f, "{} {} ({}): {}", severity, self.package, self.check, self.description)
    }
}

/// Runs all checks over every package of the application.
pub fn run(app: &Application) -> Vec<Finding> {
    let mut findings = Vec::new();
    for pkg in app.packages.values() {
        check_unresolved_arguments(app, pkg, &mut findings);
        check_deprecated_type(pkg, &mut findings);
        check_container_file(pkg, &mut findings);
        check_generic_commands(pkg, &mut findings);
    }
    findings.sort_by(|a, b| (a.package.as_str(), a.check).cmp(&(b.package.as_str(), b.check)));
    findings
}

fn substitution_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Substitution tokens that survived loading point at misspelled or
/// missing build arguments.
fn check_unresolved_arguments(
    app: &Application,
    pkg: &std::sync::Arc<crate::model::Package>,
    findings: &mut Vec<Finding>,
) {
    let mut haystack = serde_yaml::to_string(&pkg.config).unwrap_or_default();
    haystack.push_str(&pkg.environment.join("\n"));

    for caps in substitution_pattern().captures_iter(&haystack) {
        let token = &caps[0];
        if token == PKG_VERSION_TOKEN {
            continue;
        }
        let name = &caps[1];
        if app.arguments.contains_key(name) || pkg.component.constants.contains_key(name) {
            continue;
        }
        findings.push(Finding {
            check: "unresolved-arguments",
            package: pkg.full_name(),
            description: format!("unresolved build argument {}", token),
            error: false,
        });
    }
}

fn check_deprecated_type(pkg: &std::sync::Arc<crate::model::Package>, findings: &mut Vec<Finding>) {
    let definition = String::from_utf8_lossy(&pkg.definition);
    if definition.contains("server-typescript") {
        findings.push(Finding {
            check: "deprecated-type",
            package: pkg.full_name(),
            description: "uses the deprecated \"server-typescript\" type - use \"server-js\" instead"
                .to_string(),
            error: false,
        });
    }
}

fn check_container_file(pkg: &std::sync::Arc<crate::model::Package>, findings: &mut Vec<Finding>) {
    let PackageConfig::Container(cfg) = &pkg.config else {
        return;
    };
    if !pkg.component.origin.join(&cfg.file).is_file() {
        findings.push(Finding {
            check: "container-file",
            package: pkg.full_name(),
            description: format!("container file {} does not exist", cfg.file),
            error: true,
        });
    }
}

fn check_generic_commands(pkg: &std::sync::Arc<crate::model::Package>, findings: &mut Vec<Finding>) {
    let PackageConfig::Generic(cfg) = &pkg.config else {
        return;
    };
    if cfg.commands.is_empty() {
        findings.push(Finding {
            check: "generic-commands",
            package: pkg.full_name(),
            description: "generic package runs no commands; the artifact is its sources only"
                .to_string(),
            error: false,
        });
    }
}
