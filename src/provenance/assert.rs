// src/provenance/assert.rs

//! Assertions over attestation bundles
//!
//! The assertion side consumes a bundle - from a loose file or extracted
//! from a cached archive - and runs a configurable list of checks over each
//! envelope and its decoded statement.

use ed25519_dalek::VerifyingKey;
use std::fmt;

use super::{verify_envelope, Envelope, Statement, BUILDER_ID};

type EnvelopeCheck = dyn Fn(&Envelope) -> Vec<Violation> + Send + Sync;
type StatementCheck = dyn Fn(&Statement) -> Vec<Violation> + Send + Sync;

/// A single named check over envelopes and/or statements
pub struct Assertion {
    pub name: &'static str,
    pub description: &'static str,
    run_envelope: Option<Box<EnvelopeCheck>>,
    run_statement: Option<Box<StatementCheck>>,
}

/// A failed assertion
#[derive(Debug, Clone)]
pub struct Violation {
    pub assertion: &'static str,
    /// Entry point of the offending statement, when known
    pub entry_point: Option<String>,
    pub description: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry_point {
            Some(ep) => write!(f, "{} failed {}: {}", ep, self.assertion, self.description),
            None => write!(f, "failed {}: {}", self.assertion, self.description),
        }
    }
}

/// A list of assertions run over a whole bundle
#[derive(Default)]
pub struct Assertions(pub Vec<Assertion>);

impl Assertions {
    /// Runs every assertion over one envelope and its statement.
    /// Returns all violations found.
    pub fn assert_envelope(&self, env: &Envelope) -> Vec<Violation> {
        let mut failed = Vec::new();
        let stmt = env.statement().ok();
        for assertion in &self.0 {
            if let Some(run) = &assertion.run_envelope {
                let mut res = run(env);
                for violation in &mut res {
                    violation.assertion = assertion.name;
                    if violation.entry_point.is_none() {
                        violation.entry_point =
                            stmt.as_ref().map(|s| s.predicate.recipe.entry_point.clone());
                    }
                }
                failed.extend(res);
            }
            if let (Some(run), Some(stmt)) = (&assertion.run_statement, stmt.as_ref()) {
                let mut res = run(stmt);
                for violation in &mut res {
                    violation.assertion = assertion.name;
                    violation.entry_point = Some(stmt.predicate.recipe.entry_point.clone());
                }
                failed.extend(res);
            }
        }
        failed
    }

    /// Runs every assertion over every envelope of a bundle.
    pub fn assert_bundle(&self, envelopes: &[Envelope]) -> Vec<Violation> {
        envelopes
            .iter()
            .flat_map(|env| self.assert_envelope(env))
            .collect()
    }
}

fn violation(description: String) -> Vec<Violation> {
    vec![Violation {
        assertion: "",
        entry_point: None,
        description,
    }]
}

/// Ensures every bundle entry was produced by this tool.
pub fn built_with_this_tool() -> Assertion {
    Assertion {
        name: "built-with-gorpa",
        description: "ensures all bundle entries have been built with gorpa",
        run_envelope: None,
        run_statement: Some(Box::new(|stmt| {
            if stmt.predicate.builder.id.starts_with(BUILDER_ID) {
                return Vec::new();
            }
            violation(format!("was not built using gorpa: {}", stmt.predicate.builder.id))
        })),
    }
}

/// Ensures the builder version equals the given value.
pub fn built_with_version(version: String) -> Assertion {
    Assertion {
        name: "built-with-gorpa-version",
        description: "ensures all bundle entries built with gorpa used the given version",
        run_envelope: None,
        run_statement: Some(Box::new(move |stmt| {
            let id = &stmt.predicate.builder.id;
            if !id.starts_with(BUILDER_ID) {
                return Vec::new();
            }
            let expected = format!("{}:{}", BUILDER_ID, version);
            if *id != expected {
                return violation(format!(
                    "was built using gorpa version {}",
                    id.strip_prefix(&format!("{}:", BUILDER_ID)).unwrap_or(id)
                ));
            }
            Vec::new()
        })),
    }
}

/// Ensures every material is a Git reference.
pub fn git_material_only() -> Assertion {
    Assertion {
        name: "git-material-only",
        description: "ensures all subjects were built from Git material only",
        run_envelope: None,
        run_statement: Some(Box::new(|stmt| {
            for material in &stmt.predicate.materials {
                if material.uri.starts_with("git+") || material.uri.starts_with("git://") {
                    continue;
                }
                return violation(format!("contains non-Git material, e.g. {}", material.uri));
            }
            Vec::new()
        })),
    }
}

/// Ensures every envelope is signed with the given key.
pub fn signed_with(key: VerifyingKey) -> Assertion {
    Assertion {
        name: "signed-with",
        description: "ensures all envelopes are signed with the given key",
        run_envelope: Some(Box::new(move |env| {
            if verify_envelope(env, &key) {
                return Vec::new();
            }
            violation("not signed with the given key".to_string())
        })),
        run_statement: None,
    }
}
