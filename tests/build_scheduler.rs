// tests/build_scheduler.rs

//! Scheduler behaviour: caching, ordering, failure cascade, artifacts

mod common;

use std::sync::Arc;

use common::{load, write_fixture, Event, RecordingReporter};
use gorpa::{BuildOptions, LocalCache};

fn options(cache_dir: &std::path::Path, reporter: Arc<RecordingReporter>) -> BuildOptions {
    let local = LocalCache::new(cache_dir).unwrap();
    let mut opts = BuildOptions::new(local).with_reporter(reporter);
    opts.max_concurrent_tasks = 1;
    opts
}

#[tokio::test]
async fn test_warm_cache_builds_nothing() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        ("pkg1/in.txt", "content"),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs: [\"in.txt\"]\n  config:\n    commands:\n    - [\"sh\", \"-c\", \"cp in.txt out.txt\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    // cold run builds the package
    let app = Arc::new(load(&dir).await);
    let reporter = RecordingReporter::new();
    gorpa::build(app.clone(), "pkg1:foo", options(cache_dir.path(), reporter.clone()))
        .await
        .unwrap();
    assert_eq!(reporter.started_order(), vec!["pkg1:foo"]);
    assert_eq!(reporter.built(), vec![("pkg1:foo".to_string(), false)]);

    // warm run reports a cache hit and never invokes the builder
    let app = Arc::new(load(&dir).await);
    let reporter = RecordingReporter::new();
    gorpa::build(app, "pkg1:foo", options(cache_dir.path(), reporter.clone()))
        .await
        .unwrap();
    assert!(reporter.started_order().is_empty(), "cached package must not start a build");
    assert_eq!(reporter.built(), vec![("pkg1:foo".to_string(), true)]);
}

#[tokio::test]
async fn test_serial_build_follows_topological_order() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n\
             - name: base\n  type: generic\n  srcs: [\"*.none\"]\n  config:\n    commands:\n    - [\"true\"]\n\
             - name: mid\n  type: generic\n  srcs: [\"*.none\"]\n  deps: [\":base\"]\n  config:\n    commands:\n    - [\"true\"]\n\
             - name: top\n  type: generic\n  srcs: [\"*.none\"]\n  deps: [\":mid\", \":base\"]\n  config:\n    commands:\n    - [\"true\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    let app = Arc::new(load(&dir).await);
    let reporter = RecordingReporter::new();
    gorpa::build(app, "pkg1:top", options(cache_dir.path(), reporter.clone()))
        .await
        .unwrap();

    let order = reporter.started_order();
    assert_eq!(order.len(), 3);
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("pkg1:base") < pos("pkg1:mid"));
    assert!(pos("pkg1:mid") < pos("pkg1:top"));
}

#[tokio::test]
async fn test_failure_cancels_dependents() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n\
             - name: broken\n  type: generic\n  srcs: [\"*.none\"]\n  config:\n    commands:\n    - [\"sh\", \"-c\", \"echo boom >&2; exit 7\"]\n\
             - name: dependent\n  type: generic\n  srcs: [\"*.none\"]\n  deps: [\":broken\"]\n  config:\n    commands:\n    - [\"true\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    let app = Arc::new(load(&dir).await);
    let reporter = RecordingReporter::new();
    let err = gorpa::build(app, "pkg1:dependent", options(cache_dir.path(), reporter.clone()))
        .await
        .unwrap_err();

    match &err {
        gorpa::Error::BuildFailed { package, exit_code, output, .. } => {
            assert_eq!(package, "pkg1:broken");
            assert_eq!(*exit_code, Some(7));
            assert!(output.contains("boom"));
        }
        other => panic!("unexpected error: {}", other),
    }

    let started = reporter.started_order();
    assert_eq!(started, vec!["pkg1:broken"], "the dependent must never start");
    assert!(reporter.events().contains(&Event::Finished(false)));
}

#[tokio::test]
async fn test_dependencies_are_materialized_into_the_workdir() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        ("pkg1/payload.txt", "payload"),
        (
            "pkg1/BUILD.yaml",
            "packages:\n\
             - name: producer\n  type: generic\n  srcs: [\"payload.txt\"]\n  config:\n    commands:\n    - [\"true\"]\n\
             - name: consumer\n  type: generic\n  srcs: [\"*.none\"]\n  deps: [\":producer\"]\n  config:\n    commands:\n    - [\"test\", \"-f\", \"pkg1--producer/payload.txt\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    let app = Arc::new(load(&dir).await);
    let reporter = RecordingReporter::new();
    gorpa::build(app, "pkg1:consumer", options(cache_dir.path(), reporter.clone()))
        .await
        .unwrap();
    assert_eq!(reporter.built().len(), 2);
}

#[tokio::test]
async fn test_layout_controls_dependency_location() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        ("pkg1/payload.txt", "payload"),
        (
            "pkg1/BUILD.yaml",
            "packages:\n\
             - name: producer\n  type: generic\n  srcs: [\"payload.txt\"]\n  config:\n    commands:\n    - [\"true\"]\n\
             - name: consumer\n  type: generic\n  srcs: [\"*.none\"]\n  deps: [\":producer\"]\n  layout:\n    \":producer\": lib/dep\n  config:\n    commands:\n    - [\"test\", \"-f\", \"lib/dep/payload.txt\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    let app = Arc::new(load(&dir).await);
    gorpa::build(
        app,
        "pkg1:consumer",
        options(cache_dir.path(), RecordingReporter::new()),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_artifact_round_trips_build_outputs() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        ("pkg1/in.txt", "input bytes"),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs: [\"in.txt\"]\n  config:\n    commands:\n    - [\"sh\", \"-c\", \"printf generated > out.txt\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    let app = Arc::new(load(&dir).await);
    gorpa::build(
        app.clone(),
        "pkg1:foo",
        options(cache_dir.path(), RecordingReporter::new()),
    )
    .await
    .unwrap();

    let pkg = app.package("pkg1:foo").unwrap();
    let pkg_version = gorpa::version::version(&app, pkg).unwrap();
    let local = LocalCache::new(cache_dir.path()).unwrap();
    let (artifact, present) = local.location(&pkg_version);
    assert!(present);

    let extracted = tempfile::tempdir().unwrap();
    gorpa::archive::unpack(&artifact, extracted.path()).unwrap();
    assert_eq!(std::fs::read(extracted.path().join("in.txt")).unwrap(), b"input bytes");
    assert_eq!(std::fs::read(extracted.path().join("out.txt")).unwrap(), b"generated");
}

#[tokio::test]
async fn test_dump_plan_writes_newline_delimited_json() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs: [\"*.none\"]\n  config:\n    commands:\n    - [\"true\"]",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();
    let plan_path = cache_dir.path().join("plan.jsonl");

    let app = Arc::new(load(&dir).await);
    let mut opts = options(cache_dir.path(), RecordingReporter::new());
    opts.dry_run = true;
    opts.dump_plan = Some(plan_path.clone());
    gorpa::build(app, "pkg1:foo", opts).await.unwrap();

    let content = std::fs::read_to_string(&plan_path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 1);
    let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(entry["name"], "pkg1:foo");
    assert_eq!(entry["cached"], false);
    assert_eq!(entry["version"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_scripts_run_after_their_dependencies() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        ("pkg1/payload.txt", "payload"),
        (
            "pkg1/BUILD.yaml",
            "packages:\n\
             - name: producer\n  type: generic\n  srcs: [\"payload.txt\"]\n  config:\n    commands:\n    - [\"true\"]\n\
             scripts:\n\
             - name: check\n  deps: [\":producer\"]\n  workdirLayout: packaged\n  script: |\n    test -f pkg1--producer/payload.txt",
        ),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();

    let app = Arc::new(load(&dir).await);
    let opts = options(cache_dir.path(), RecordingReporter::new());
    gorpa::run_script(app, "pkg1:check", opts).await.unwrap();
}
