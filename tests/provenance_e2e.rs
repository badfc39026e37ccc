// tests/provenance_e2e.rs

//! Attestation bundles across the dependency chain

mod common;

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use common::{write_fixture, RecordingReporter};
use gorpa::provenance::{self, assert as provassert};
use gorpa::{Arguments, BuildOptions, LocalCache, Settings};

const MANIFEST: &str = "packages:\n\
    - name: lib\n  type: generic\n  srcs: [\"lib.txt\"]\n  config:\n    commands:\n    - [\"true\"]\n\
    - name: app\n  type: generic\n  srcs: [\"app.txt\"]\n  deps: [\":lib\"]\n  config:\n    commands:\n    - [\"sh\", \"-c\", \"printf out > generated.txt\"]";

fn fixture(app_manifest: &str) -> tempfile::TempDir {
    write_fixture(&[
        ("APPLICATION.yaml", app_manifest),
        ("pkg1/lib.txt", "library"),
        ("pkg1/app.txt", "application"),
        ("pkg1/BUILD.yaml", MANIFEST),
    ])
}

async fn build_all(dir: &tempfile::TempDir, cache_dir: &std::path::Path, settings: &Settings) -> Arc<gorpa::Application> {
    let app = gorpa::find_application(dir.path(), Arguments::new(), None, settings)
        .await
        .unwrap();
    let app = Arc::new(app);
    let opts = BuildOptions::new(LocalCache::new(cache_dir).unwrap())
        .with_reporter(RecordingReporter::new());
    gorpa::build(app.clone(), "pkg1:app", opts).await.unwrap();
    app
}

fn artifact_of(app: &gorpa::Application, cache_dir: &std::path::Path, pkg: &str) -> std::path::PathBuf {
    let pkg = app.package(pkg).unwrap();
    let version = gorpa::version::version(app, pkg).unwrap();
    let local = LocalCache::new(cache_dir).unwrap();
    let (loc, present) = local.location(&version);
    assert!(present, "artifact of {} must exist", pkg.full_name());
    loc
}

#[tokio::test]
async fn test_artifacts_carry_a_bundle_with_matching_subjects() {
    let dir = fixture("provenance:\n  enabled: true\n  slsa: true");
    let cache_dir = tempfile::tempdir().unwrap();
    let app = build_all(&dir, cache_dir.path(), &Settings::default()).await;

    let artifact = artifact_of(&app, cache_dir.path(), "pkg1:app");
    let bundle = gorpa::archive::read_entry(&artifact, provenance::BUNDLE_FILENAME)
        .unwrap()
        .expect("artifact must carry a bundle");
    let envelopes = provenance::parse_bundle(&bundle).unwrap();

    // the app's own envelope plus the dependency's
    assert_eq!(envelopes.len(), 2);

    // find the app statement and check every packed file appears as a
    // subject with a matching digest
    let statements: Vec<_> = envelopes.iter().map(|e| e.statement().unwrap()).collect();
    let app_stmt = statements
        .iter()
        .find(|s| s.predicate.recipe.entry_point == "pkg1:app")
        .expect("bundle must contain the app statement");

    let subjects: BTreeMap<_, _> = app_stmt
        .subject
        .iter()
        .map(|s| (s.name.clone(), s.digest["sha256"].clone()))
        .collect();

    // read the artifact's files and compare digests
    let file = std::fs::File::open(&artifact).unwrap();
    let mut ar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut seen = 0;
    for entry in ar.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().to_string();
        if name == provenance::BUNDLE_FILENAME {
            continue;
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        let digest = {
            use sha2::Digest;
            format!("{:x}", sha2::Sha256::digest(&content))
        };
        assert_eq!(
            subjects.get(&name),
            Some(&digest),
            "subject digest of {} must match the packed bytes",
            name
        );
        seen += 1;
    }
    assert!(seen > 0);
    assert_eq!(subjects.len(), seen, "every packed file must be a subject");
}

#[tokio::test]
async fn test_dependency_envelopes_are_carried_forward() {
    let dir = fixture("provenance:\n  enabled: true\n  slsa: true");
    let cache_dir = tempfile::tempdir().unwrap();
    let app = build_all(&dir, cache_dir.path(), &Settings::default()).await;

    let lib_artifact = artifact_of(&app, cache_dir.path(), "pkg1:lib");
    let lib_bundle = gorpa::archive::read_entry(&lib_artifact, provenance::BUNDLE_FILENAME)
        .unwrap()
        .unwrap();
    let lib_envelopes = provenance::parse_bundle(&lib_bundle).unwrap();
    assert_eq!(lib_envelopes.len(), 1);

    let app_artifact = artifact_of(&app, cache_dir.path(), "pkg1:app");
    let app_bundle = gorpa::archive::read_entry(&app_artifact, provenance::BUNDLE_FILENAME)
        .unwrap()
        .unwrap();
    let app_envelopes = provenance::parse_bundle(&app_bundle).unwrap();

    // the dependency's envelope appears verbatim in the dependent's bundle
    assert!(app_envelopes
        .iter()
        .any(|e| e.payload == lib_envelopes[0].payload));
}

#[tokio::test]
async fn test_signed_bundles_pass_the_signature_assertion() {
    let key_dir = tempfile::tempdir().unwrap();
    let key_path = key_dir.path().join("signing.key");
    let seed = [42u8; 32];
    let hex: String = seed.iter().map(|b| format!("{:02x}", b)).collect();
    std::fs::write(&key_path, hex).unwrap();

    let dir = fixture("provenance:\n  enabled: true\n  slsa: true");
    let cache_dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        provenance_keypath: Some(key_path),
        ..Default::default()
    };
    let app = build_all(&dir, cache_dir.path(), &settings).await;

    let artifact = artifact_of(&app, cache_dir.path(), "pkg1:app");
    let bundle = gorpa::archive::read_entry(&artifact, provenance::BUNDLE_FILENAME)
        .unwrap()
        .unwrap();
    let envelopes = provenance::parse_bundle(&bundle).unwrap();

    let key = ed25519_dalek_key(&seed);
    let assertions = provassert::Assertions(vec![
        provassert::built_with_this_tool(),
        provassert::built_with_version(env!("CARGO_PKG_VERSION").to_string()),
        provassert::signed_with(key),
    ]);
    let violations = assertions.assert_bundle(&envelopes);
    assert!(violations.is_empty(), "{:?}", violations);

    // a different key must fail
    let wrong = ed25519_dalek_key(&[1u8; 32]);
    let assertions = provassert::Assertions(vec![provassert::signed_with(wrong)]);
    assert!(!assertions.assert_bundle(&envelopes).is_empty());
}

fn ed25519_dalek_key(seed: &[u8; 32]) -> ed25519_dalek::VerifyingKey {
    ed25519_dalek::SigningKey::from_bytes(seed).verifying_key()
}

#[tokio::test]
async fn test_provenance_disabled_leaves_no_bundle() {
    let dir = fixture("");
    let cache_dir = tempfile::tempdir().unwrap();
    let app = build_all(&dir, cache_dir.path(), &Settings::default()).await;

    let artifact = artifact_of(&app, cache_dir.path(), "pkg1:app");
    assert!(gorpa::archive::read_entry(&artifact, provenance::BUNDLE_FILENAME)
        .unwrap()
        .is_none());
}
