// tests/version_invariants.rs

//! Version stability and sensitivity across application loads

mod common;

use common::{load, write_fixture};
use gorpa::version;

async fn version_of(dir: &tempfile::TempDir, pkg: &str) -> String {
    let app = load(dir).await;
    let pkg = app.package(pkg).unwrap().clone();
    version::version(&app, &pkg).unwrap()
}

#[tokio::test]
async fn test_version_is_64_hex_characters() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
        ),
    ]);

    let v = version_of(&dir, "pkg1:foo").await;
    assert_eq!(v.len(), 64);
    assert!(v.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[tokio::test]
async fn test_version_is_stable_across_repeated_loads() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
        ),
    ]);

    let v1 = version_of(&dir, "pkg1:foo").await;
    let v2 = version_of(&dir, "pkg1:foo").await;
    assert_eq!(v1, v2);
}

#[tokio::test]
async fn test_definition_change_changes_version() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
        ),
    ]);
    let v1 = version_of(&dir, "pkg1:foo").await;

    std::fs::write(
        dir.path().join("pkg1/BUILD.yaml"),
        "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"alsoDoesNotExist\"",
    )
    .unwrap();
    let v2 = version_of(&dir, "pkg1:foo").await;

    assert_ne!(v1, v2);
}

#[tokio::test]
async fn test_unreferenced_constant_change_keeps_version() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
        ),
    ]);
    let v1 = version_of(&dir, "pkg1:foo").await;

    std::fs::write(
        dir.path().join("pkg1/BUILD.yaml"),
        "const:\n  foobar: baz\npackages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
    )
    .unwrap();
    let v2 = version_of(&dir, "pkg1:foo").await;

    assert_eq!(v1, v2, "component change must not change package version");
}

#[tokio::test]
async fn test_dependency_definition_change_changes_dependent_version() {
    let manifest = |foo_src: &str| {
        format!(
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"{}\"\n- name: bar\n  type: generic\n  srcs:\n  - \"doesNotExist\"\n  deps:\n  - :foo",
            foo_src
        )
    };
    let dir = write_fixture(&[("APPLICATION.yaml", ""), ("pkg1/BUILD.yaml", "")]);
    std::fs::write(dir.path().join("pkg1/BUILD.yaml"), manifest("doesNotExist")).unwrap();
    let v1 = version_of(&dir, "pkg1:bar").await;

    std::fs::write(dir.path().join("pkg1/BUILD.yaml"), manifest("alsoDoesNotExist")).unwrap();
    let v2 = version_of(&dir, "pkg1:bar").await;

    assert_ne!(v1, v2, "dependency definition change must change the dependent");
}

#[tokio::test]
async fn test_unlisted_build_argument_keeps_version() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"\n  config:\n    commands:\n    - [\"echo\", \"${msg}\"]",
        ),
    ]);

    let version_with_arg = |value: &'static str| {
        let path = dir.path().to_path_buf();
        async move {
            let mut args = gorpa::Arguments::new();
            args.insert("msg".to_string(), value.to_string());
            let app = gorpa::find_application(&path, args, None, &gorpa::Settings::default())
                .await
                .unwrap();
            let pkg = app.package("pkg1:foo").unwrap().clone();
            version::version(&app, &pkg).unwrap()
        }
    };

    let v1 = version_with_arg("foo").await;
    let v2 = version_with_arg("bar").await;
    assert_eq!(v1, v2, "build args the package does not list must not change its version");
}

#[tokio::test]
async fn test_listed_argument_dependency_changes_version() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"doesNotExist\"\n  argdeps:\n  - msg\n  config:\n    commands:\n    - [\"echo\", \"${msg}\"]",
        ),
    ]);

    let version_with_arg = |value: &'static str| {
        let path = dir.path().to_path_buf();
        async move {
            let mut args = gorpa::Arguments::new();
            args.insert("msg".to_string(), value.to_string());
            let app = gorpa::find_application(&path, args, None, &gorpa::Settings::default())
                .await
                .unwrap();
            let pkg = app.package("pkg1:foo").unwrap().clone();
            version::version(&app, &pkg).unwrap()
        }
    };

    let v1 = version_with_arg("foo").await;
    let v2 = version_with_arg("bar").await;
    assert_ne!(v1, v2, "listed argument dependencies must change the version");
}

#[tokio::test]
async fn test_source_content_change_changes_version() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        ("pkg1/main.txt", "one"),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: foo\n  type: generic\n  srcs:\n  - \"**/*.txt\"",
        ),
    ]);
    let v1 = version_of(&dir, "pkg1:foo").await;

    std::fs::write(dir.path().join("pkg1/main.txt"), "two").unwrap();
    let v2 = version_of(&dir, "pkg1:foo").await;

    assert_ne!(v1, v2);
}

#[tokio::test]
async fn test_zero_dependency_package_is_isolated() {
    let dir = write_fixture(&[
        ("APPLICATION.yaml", ""),
        (
            "pkg1/BUILD.yaml",
            "packages:\n- name: solo\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
        ),
        (
            "pkg2/BUILD.yaml",
            "packages:\n- name: other\n  type: generic\n  srcs:\n  - \"doesNotExist\"",
        ),
    ]);
    let v1 = version_of(&dir, "pkg1:solo").await;

    // change the unrelated package's definition
    std::fs::write(
        dir.path().join("pkg2/BUILD.yaml"),
        "packages:\n- name: other\n  type: generic\n  srcs:\n  - \"alsoDoesNotExist\"",
    )
    .unwrap();
    let v2 = version_of(&dir, "pkg1:solo").await;

    assert_eq!(v1, v2, "a package without dependencies must not depend on other packages");
}
