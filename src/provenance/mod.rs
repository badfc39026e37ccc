// src/provenance/mod.rs

//! Attestation bundle assembly
//!
//! When provenance is enabled, every package build carries a
//! newline-delimited JSON bundle of SLSA-style envelopes inside its
//! artifact. Before a build, the bundles of all transitive dependencies are
//! extracted from their cached archives; after the build, a statement over
//! the produced files is synthesized, wrapped in an envelope, optionally
//! signed, and appended.

pub mod assert;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::archive;
use crate::cache::LocalCache;
use crate::error::{Error, Result};
use crate::model::{Application, Package};
use walkdir::WalkDir;

/// Filename of the attestation bundle inside every artifact
pub const BUNDLE_FILENAME: &str = "provenance-bundle.jsonl";

/// Identifies this tool in statement builder ids
pub const BUILDER_ID: &str = "github.com/gorpa-build/gorpa";

/// The envelope payload type
pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v0.1";
const PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v0.1";

/// The builder id of this binary, tool plus version.
pub fn builder_id() -> String {
    format!("{}:{}", BUILDER_ID, env!("CARGO_PKG_VERSION"))
}

/// A file or input with its digest set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub digest: BTreeMap<String, String>,
}

/// An input material of a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub uri: String,
    pub digest: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(rename = "type")]
    pub recipe_type: String,
    pub arguments: Vec<String>,
    pub entry_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    pub arguments: bool,
    pub environment: bool,
    pub materials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub build_started_on: String,
    pub completeness: Completeness,
    pub reproducible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub builder: Builder,
    pub recipe: Recipe,
    pub metadata: Metadata,
    pub materials: Vec<Material>,
}

/// A SLSA-style provenance statement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub subject: Vec<Subject>,
    pub predicate_type: String,
    pub predicate: Predicate,
}

/// A detached signature over an envelope payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    pub keyid: String,
    pub sig: String,
}

/// Wraps a statement payload with its signatures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub payload_type: String,
    /// Base64-encoded statement JSON
    pub payload: String,
    #[serde(default)]
    pub signatures: Vec<EnvelopeSignature>,
}

impl Envelope {
    /// Decodes the payload back into a statement.
    pub fn statement(&self) -> Result<Statement> {
        let raw = BASE64.decode(&self.payload).map_err(|e| Error::Provenance {
            package: "<bundle>".to_string(),
            cause: format!("invalid payload encoding: {}", e),
        })?;
        serde_json::from_slice(&raw).map_err(|e| Error::Provenance {
            package: "<bundle>".to_string(),
            cause: format!("invalid statement: {}", e),
        })
    }
}

fn sha256_digest(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn single_digest(algorithm: &str, value: &str) -> BTreeMap<String, String> {
    let mut digest = BTreeMap::new();
    digest.insert(algorithm.to_string(), value.to_string());
    digest
}

/// Computes subjects for every file below `dir`, with paths relative to it.
pub fn subjects_from_dir(dir: &Path, package: &str) -> Result<Vec<Subject>> {
    let mut res = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Provenance {
            package: package.to_string(),
            cause: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file = std::fs::File::open(entry.path()).map_err(|e| Error::Provenance {
            package: package.to_string(),
            cause: format!("cannot hash {}: {}", entry.path().display(), e),
        })?;
        let digest = sha256_digest(file).map_err(|e| Error::Provenance {
            package: package.to_string(),
            cause: format!("cannot hash {}: {}", entry.path().display(), e),
        })?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        res.push(Subject {
            name: rel,
            digest: single_digest("sha256", &digest),
        });
    }
    Ok(res)
}

/// Computes the materials of a package build: a single Git reference when
/// the tree is clean, the individual source files otherwise.
fn materials_for(app: &Application, pkg: &Package) -> Result<Vec<Material>> {
    let git = if pkg.component.git.commit.is_some() {
        &pkg.component.git
    } else {
        &app.git
    };

    if let (Some(commit), Some(origin), false) = (&git.commit, &git.origin, git.dirty) {
        return Ok(vec![Material {
            uri: format!("git+{}", origin),
            digest: single_digest("sha256", commit),
        }]);
    }

    let fqn = pkg.full_name();
    let mut res = Vec::with_capacity(pkg.sources.len());
    let mut sources = pkg.sources.clone();
    sources.sort();
    for src in &sources {
        let file = std::fs::File::open(src).map_err(|e| Error::Provenance {
            package: fqn.clone(),
            cause: format!("cannot hash {}: {}", src.display(), e),
        })?;
        let digest = sha256_digest(file).map_err(|e| Error::Provenance {
            package: fqn.clone(),
            cause: format!("cannot hash {}: {}", src.display(), e),
        })?;
        let rel = src.strip_prefix(&app.origin).unwrap_or(src);
        res.push(Material {
            uri: format!("file://{}", rel.to_string_lossy()),
            digest: single_digest("sha256", &digest),
        });
    }
    Ok(res)
}

fn load_signing_key(path: &Path, package: &str) -> Result<SigningKey> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::SigningFailed {
        package: package.to_string(),
        cause: format!("{}: {}", path.display(), e),
    })?;
    let bytes = decode_hex(content.trim()).ok_or_else(|| Error::SigningFailed {
        package: package.to_string(),
        cause: format!("{}: key must be 64 hex characters", path.display()),
    })?;
    let seed: [u8; 32] = bytes.try_into().map_err(|_| Error::SigningFailed {
        package: package.to_string(),
        cause: format!("{}: key must be 32 bytes", path.display()),
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Synthesizes the SLSA-style envelope for a package build.
///
/// `subjects` are the files this build produced; `invocation_args` is the
/// process argument vector. The envelope is signed when a key is
/// configured, with the component key taking precedence over the
/// process-wide one.
pub fn produce_envelope(
    app: &Application,
    pkg: &Package,
    subjects: Vec<Subject>,
    invocation_args: &[String],
) -> Result<Envelope> {
    let fqn = pkg.full_name();
    let materials = materials_for(app, pkg)?;

    let statement = Statement {
        statement_type: STATEMENT_TYPE.to_string(),
        subject: subjects,
        predicate_type: PREDICATE_TYPE.to_string(),
        predicate: Predicate {
            builder: Builder { id: builder_id() },
            recipe: Recipe {
                recipe_type: format!(
                    "{}/build@{}:{}",
                    BUILDER_ID,
                    pkg.tpe,
                    pkg.tpe.build_process_version()
                ),
                arguments: invocation_args.to_vec(),
                entry_point: fqn.clone(),
            },
            metadata: Metadata {
                build_started_on: Utc::now().to_rfc3339(),
                completeness: Completeness {
                    arguments: true,
                    environment: false,
                    materials: true,
                },
                reproducible: false,
            },
            materials,
        },
    };

    let payload = serde_json::to_vec_pretty(&statement).map_err(|e| Error::Provenance {
        package: fqn.clone(),
        cause: format!("cannot marshal statement: {}", e),
    })?;

    let mut signatures = Vec::new();
    let key_path = pkg
        .component
        .provenance_key_path
        .as_ref()
        .or(app.provenance.key_path.as_ref());
    if let Some(key_path) = key_path {
        let key = load_signing_key(key_path, &fqn)?;
        let sig = key.sign(&payload);
        signatures.push(EnvelopeSignature {
            keyid: encode_hex(key.verifying_key().as_bytes()),
            sig: BASE64.encode(sig.to_bytes()),
        });
    }

    Ok(Envelope {
        payload_type: PAYLOAD_TYPE.to_string(),
        payload: BASE64.encode(&payload),
        signatures,
    })
}

/// Verifies a signature of an envelope against a verifying key.
pub fn verify_envelope(env: &Envelope, key: &VerifyingKey) -> bool {
    let Ok(payload) = BASE64.decode(&env.payload) else {
        return false;
    };
    env.signatures.iter().any(|s| {
        let Ok(raw) = BASE64.decode(&s.sig) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(raw.as_slice()) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&bytes);
        key.verify(&payload, &sig).is_ok()
    })
}

/// Extracts the attestation bundle of every transitive dependency from its
/// cached archive and returns the union of envelope lines.
pub fn collect_dependency_bundles(
    app: &Application,
    pkg: &Package,
    cache: &LocalCache,
    versions: &BTreeMap<String, String>,
) -> Result<BTreeSet<String>> {
    let mut bundle = BTreeSet::new();
    for dep in pkg.transitive_dependencies(app)? {
        let dep_name = dep.full_name();
        let version = versions
            .get(&dep_name)
            .ok_or_else(|| Error::DependencyNotBuilt(dep_name.clone()))?;
        let (loc, present) = cache.location(version);
        if !present {
            return Err(Error::DependencyNotBuilt(dep_name));
        }

        let content = archive::read_entry(&loc, BUNDLE_FILENAME)?.ok_or_else(|| {
            Error::Provenance {
                package: pkg.full_name(),
                cause: format!("dependency {} has no provenance bundle", dep_name),
            }
        })?;
        let prev = bundle.len();
        for line in String::from_utf8_lossy(&content).lines() {
            if !line.trim().is_empty() {
                bundle.insert(line.to_string());
            }
        }
        debug!(
            dependency = %dep_name,
            new_entries = bundle.len() - prev,
            "extracted bundle from cached archive"
        );
    }
    Ok(bundle)
}

/// Writes a bundle as newline-delimited JSON.
pub fn write_bundle(path: &Path, entries: &BTreeSet<String>) -> Result<()> {
    let mut content = String::new();
    for entry in entries {
        content.push_str(entry);
        content.push('\n');
    }
    std::fs::write(path, content).map_err(|e| Error::Provenance {
        package: "<bundle>".to_string(),
        cause: format!("cannot write {}: {}", path.display(), e),
    })
}

/// Parses a bundle from newline-delimited JSON.
pub fn parse_bundle(content: &[u8]) -> Result<Vec<Envelope>> {
    let mut res = Vec::new();
    for line in String::from_utf8_lossy(content).lines() {
        if line.trim().is_empty() {
            continue;
        }
        let env: Envelope = serde_json::from_str(line).map_err(|e| Error::Provenance {
            package: "<bundle>".to_string(),
            cause: format!("invalid envelope: {}", e),
        })?;
        res.push(env);
    }
    Ok(res)
}
