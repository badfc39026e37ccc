// src/commands/provenance.rs

//! The provenance assert command

use anyhow::{bail, Context, Result};
use ed25519_dalek::VerifyingKey;
use std::path::{Path, PathBuf};

use gorpa::provenance::{self, assert};
use gorpa::version;
use gorpa::{LocalCache, Settings};

use super::{get_application, GlobalArgs};

#[derive(Debug, clap::Args)]
pub struct AssertArgs {
    /// A package name whose cached artifact carries the bundle, or the
    /// path of a loose bundle file
    pub subject: String,

    /// Requires every entry to be built with the given tool version
    #[arg(long)]
    pub built_with_version: Option<String>,

    /// Requires every envelope to be signed with the key in this file
    #[arg(long)]
    pub signed_with: Option<PathBuf>,

    /// Requires every material to be a Git reference
    #[arg(long)]
    pub git_only: bool,
}

pub async fn cmd_provenance_assert(
    global: &GlobalArgs,
    args: &AssertArgs,
    settings: &Settings,
) -> Result<i32> {
    let mut assertions = vec![assert::built_with_this_tool()];
    if let Some(v) = &args.built_with_version {
        assertions.push(assert::built_with_version(v.clone()));
    }
    if args.git_only {
        assertions.push(assert::git_material_only());
    }
    if let Some(key_path) = &args.signed_with {
        assertions.push(assert::signed_with(load_verifying_key(key_path)?));
    }
    let assertions = assert::Assertions(assertions);

    let bundle = load_bundle(global, &args.subject, settings).await?;
    let envelopes = provenance::parse_bundle(&bundle)?;
    if envelopes.is_empty() {
        bail!("bundle contains no envelopes");
    }

    let violations = assertions.assert_bundle(&envelopes);
    for violation in &violations {
        eprintln!("{}", violation);
    }
    if violations.is_empty() {
        println!("{} envelope(s) pass all assertions", envelopes.len());
        Ok(0)
    } else {
        Ok(1)
    }
}

/// The subject is either a loose bundle file or a package whose cached
/// artifact carries the bundle.
async fn load_bundle(global: &GlobalArgs, subject: &str, settings: &Settings) -> Result<Vec<u8>> {
    let path = Path::new(subject);
    if path.is_file() {
        return std::fs::read(path).with_context(|| format!("cannot read {}", subject));
    }

    let app = get_application(global, settings).await?;
    let pkg = app.package(subject)?;
    let pkg_version = version::version(&app, pkg)?;
    let cache = LocalCache::new(&settings.local_cache_dir())?;
    let (loc, present) = cache.location(&pkg_version);
    if !present {
        bail!("package {} is not built", subject);
    }
    gorpa::archive::read_entry(&loc, provenance::BUNDLE_FILENAME)?
        .with_context(|| format!("artifact of {} carries no provenance bundle", subject))
}

/// Reads a signing key file (64 hex characters) and derives the verifying
/// key used for assertion.
fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read key file {}", path.display()))?;
    let content = content.trim();
    let mut bytes = [0u8; 32];
    if content.len() != 64 {
        bail!("key file {} must hold 64 hex characters", path.display());
    }
    for (idx, chunk) in content.as_bytes().chunks(2).enumerate() {
        let hex = std::str::from_utf8(chunk)?;
        bytes[idx] = u8::from_str_radix(hex, 16)
            .with_context(|| format!("key file {} is not valid hex", path.display()))?;
    }
    Ok(ed25519_dalek::SigningKey::from_bytes(&bytes).verifying_key())
}
