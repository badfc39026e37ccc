// src/version.rs

//! Content-addressed package versioning
//!
//! Every package gets a deterministic version derived from its manifest
//! definition, the content of its resolved sources, its version-relevant
//! build arguments, the application's environment manifest and the versions
//! of its transitive dependencies. Any observable change to one of these
//! inputs yields a different version and thereby invalidates exactly the
//! affected artifacts.
//!
//! The hash is a keyed MAC (HMAC-SHA256) with a fixed key compiled into the
//! binary, so versions are stable across executions and hosts as long as
//! the environment manifests agree.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fs::File;
use std::io::Read;

use crate::error::{Error, Result};
use crate::model::{Application, Package};

type HmacSha256 = Hmac<Sha256>;

/// The fixed content-hash key. Identical across installations; changing it
/// invalidates every cache entry ever produced.
const CONTENT_HASH_KEY: [u8; 32] = [
    0x5a, 0x1d, 0x8f, 0x03, 0xc7, 0x44, 0x9e, 0xb2, 0x61, 0x0b, 0xd5, 0x27, 0x3e, 0x88, 0x19,
    0xfa, 0x92, 0x4c, 0x70, 0xe5, 0x2b, 0xa6, 0x0d, 0x31, 0xc8, 0x57, 0xee, 0x12, 0x84, 0x9b,
    0x66, 0x0f,
];

fn new_mac() -> HmacSha256 {
    HmacSha256::new_from_slice(&CONTENT_HASH_KEY).expect("HMAC accepts any key length")
}

fn finish(mac: HmacSha256) -> String {
    format!("{:x}", mac.finalize().into_bytes())
}

/// The keyed digest of an arbitrary byte string, as lowercase hex.
pub fn keyed_digest(data: &[u8]) -> String {
    let mut mac = new_mac();
    mac.update(data);
    finish(mac)
}

/// Computes the version of a package. The result is memoized per package;
/// the first caller computes, subsequent callers observe the stored value.
pub fn version(app: &Application, pkg: &Package) -> Result<String> {
    if let Some(cached) = pkg.version.get() {
        return Ok(cached.clone());
    }

    let computed = compute_version(app, pkg)?;
    // a concurrent caller may have won the race; both computed the same value
    let _ = pkg.version.set(computed.clone());
    Ok(computed)
}

fn compute_version(app: &Application, pkg: &Package) -> Result<String> {
    let fqn = pkg.full_name();
    let fail = |cause: String| Error::VersionComputeFailed {
        package: fqn.clone(),
        cause,
    };

    let mut mac = new_mac();

    // 1. the package definition as written, before argument substitution
    mac.update(&pkg.definition);

    // 2. every source file's content, framed by its path relative to the
    //    application origin; sources are sorted so the digest is stable
    let mut sources = pkg.sources.clone();
    sources.sort();
    let mut buf = [0u8; 8192];
    for src in &sources {
        let rel = src.strip_prefix(&app.origin).unwrap_or(src);
        mac.update(rel.to_string_lossy().as_bytes());
        mac.update(b":");

        let mut file = File::open(src).map_err(|e| fail(format!("{}: {}", src.display(), e)))?;
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| fail(format!("{}: {}", src.display(), e)))?;
            if n == 0 {
                break;
            }
            mac.update(&buf[..n]);
        }
        mac.update(b"\n");
    }

    // 3. version-relevant build arguments, already in `name: value` form
    for argdep in &pkg.argument_dependencies {
        mac.update(argdep.as_bytes());
        mac.update(b"\n");
    }

    // 4. the environment manifest digest
    mac.update(app.environment_manifest.digest().as_bytes());

    // 5. dependency versions, in fully-qualified-name order
    let mut deps: Vec<_> = pkg.dependencies.clone();
    deps.sort();
    for dep in &deps {
        let dep_pkg = app
            .packages
            .get(dep)
            .ok_or_else(|| fail(format!("dependency {} is unknown", dep)))?;
        let dep_version = version(app, dep_pkg)?;
        mac.update(dep.as_bytes());
        mac.update(&[0]);
        mac.update(dep_version.as_bytes());
    }

    // 6. the build-process version of this package type
    mac.update(&pkg.tpe.build_process_version().to_be_bytes());

    Ok(finish(mac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::{test_application, test_package};
    use std::sync::Arc;

    #[test]
    fn test_keyed_digest_is_stable() {
        let a = keyed_digest(b"hello");
        let b = keyed_digest(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_version_is_memoized() {
        let mut app = test_application();
        let pkg = test_package("pkg", vec![]);
        app.packages.insert(pkg.full_name(), Arc::new(pkg));

        let pkg = &app.packages["testcomp:pkg"];
        let v1 = version(&app, pkg).unwrap();
        let v2 = version(&app, pkg).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(pkg.version.get(), Some(&v1));
    }

    #[test]
    fn test_definition_change_changes_version() {
        let mut app = test_application();
        let pkg = test_package("pkg", vec![]);
        app.packages.insert(pkg.full_name(), Arc::new(pkg));
        let v1 = version(&app, &app.packages["testcomp:pkg"]).unwrap();

        let mut changed = test_package("pkg", vec![]);
        changed.definition = b"name: pkg\ntype: generic\nsrcs: [other]\n".to_vec();
        let mut app2 = test_application();
        app2.packages.insert(changed.full_name(), Arc::new(changed));
        let v2 = version(&app2, &app2.packages["testcomp:pkg"]).unwrap();

        assert_ne!(v1, v2);
    }

    #[test]
    fn test_dependency_version_feeds_dependent() {
        let mut app = test_application();
        let dep = test_package("dep", vec![]);
        let top = test_package("top", vec!["testcomp:dep".to_string()]);
        app.packages.insert(dep.full_name(), Arc::new(dep));
        app.packages.insert(top.full_name(), Arc::new(top));
        let v1 = version(&app, &app.packages["testcomp:top"]).unwrap();

        // same graph with a changed dependency definition
        let mut app2 = test_application();
        let mut dep = test_package("dep", vec![]);
        dep.definition = b"name: dep\ntype: generic\nsrcs: [changed]\n".to_vec();
        let top = test_package("top", vec!["testcomp:dep".to_string()]);
        app2.packages.insert(dep.full_name(), Arc::new(dep));
        app2.packages.insert(top.full_name(), Arc::new(top));
        let v2 = version(&app2, &app2.packages["testcomp:top"]).unwrap();

        assert_ne!(v1, v2);
    }

    #[test]
    fn test_argument_dependency_changes_version() {
        let mut app = test_application();
        let mut pkg = test_package("pkg", vec![]);
        pkg.argument_dependencies = vec!["msg: foo".to_string()];
        app.packages.insert(pkg.full_name(), Arc::new(pkg));
        let v1 = version(&app, &app.packages["testcomp:pkg"]).unwrap();

        let mut app2 = test_application();
        let mut pkg = test_package("pkg", vec![]);
        pkg.argument_dependencies = vec!["msg: bar".to_string()];
        app2.packages.insert(pkg.full_name(), Arc::new(pkg));
        let v2 = version(&app2, &app2.packages["testcomp:pkg"]).unwrap();

        assert_ne!(v1, v2);
    }

    #[test]
    fn test_unset_argument_dependency_is_distinct() {
        let mut app = test_application();
        let mut pkg = test_package("pkg", vec![]);
        pkg.argument_dependencies = vec!["msg: <not-set>".to_string()];
        app.packages.insert(pkg.full_name(), Arc::new(pkg));
        let v1 = version(&app, &app.packages["testcomp:pkg"]).unwrap();

        let mut app2 = test_application();
        let pkg = test_package("pkg", vec![]);
        app2.packages.insert(pkg.full_name(), Arc::new(pkg));
        let v2 = version(&app2, &app2.packages["testcomp:pkg"]).unwrap();

        assert_ne!(v1, v2);
    }
}
