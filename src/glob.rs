// src/glob.rs

//! Double-star path matching and filesystem enumeration
//!
//! Patterns are interpreted segment-wise: `**` matches zero or more whole
//! path segments, `*` matches any run of characters within a single segment
//! and `?` matches a single character. Enumeration walks the filesystem and
//! honours an ignore predicate with substring semantics.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Returns true if `path` matches the double-star `pattern`.
///
/// Both pattern and path are split on `/`. A leading `/` anchors the
/// pattern at the filesystem root; otherwise matching is performed against
/// the path's segments as given.
pub fn match_pattern(pattern: &str, path: &str) -> bool {
    let ptn: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // an absolute pattern never matches a relative path; a relative
    // pattern may match an absolute one through a leading double star
    if pattern.starts_with('/') && !path.starts_with('/') {
        return false;
    }
    if pattern == "**" {
        return true;
    }

    match_segments(&ptn, &segs)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            // a trailing double star must consume at least one segment;
            // in the middle it matches zero or more
            if pattern.len() == 1 {
                return !path.is_empty();
            }
            for skip in 0..=path.len() {
                if match_segments(&pattern[1..], &path[skip..]) {
                    return true;
                }
            }
            false
        }
        Some(seg) => match path.first() {
            None => false,
            Some(p) => match_segment(seg, p) && match_segments(&pattern[1..], &path[1..]),
        },
    }
}

/// Matches a single path segment against a pattern segment with `*` and `?`.
fn match_segment(pattern: &str, segment: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();
    match_chars(&p, &s)
}

fn match_chars(pattern: &[char], segment: &[char]) -> bool {
    match pattern.first() {
        None => segment.is_empty(),
        Some('*') => {
            for skip in 0..=segment.len() {
                if match_chars(&pattern[1..], &segment[skip..]) {
                    return true;
                }
            }
            false
        }
        Some('?') => !segment.is_empty() && match_chars(&pattern[1..], &segment[1..]),
        Some(c) => segment.first() == Some(c) && match_chars(&pattern[1..], &segment[1..]),
    }
}

/// Predicate deciding whether a path is excluded from enumeration.
pub type IgnoreFn<'a> = dyn Fn(&str) -> bool + Sync + 'a;

/// Returns an ignore predicate with substring semantics over the given
/// patterns. Empty patterns never match.
pub fn ignore_strings(patterns: &[String]) -> impl Fn(&str) -> bool + Sync + '_ {
    move |path: &str| {
        patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .any(|p| path.contains(p.trim()))
    }
}

/// Enumerates all files below `base` matching `pattern`, skipping entries
/// for which `ignore` returns true. Results are absolute paths in sorted
/// order.
pub fn glob(base: &Path, pattern: &str, ignore: Option<&IgnoreFn>) -> Result<Vec<PathBuf>> {
    let mut res = Vec::new();
    for entry in WalkDir::new(base).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::ManifestLoad {
            path: base.to_path_buf(),
            cause: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(base) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let rel_str = rel.to_string_lossy();
        if let Some(ign) = ignore {
            if ign(&path.to_string_lossy()) {
                continue;
            }
        }
        if match_pattern(pattern, &rel_str) {
            res.push(path.to_path_buf());
        }
    }
    res.sort();
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_match_pattern() {
        let cases: &[(&str, &str, bool)] = &[
            ("**", "/", true),
            ("**/*.go", "foo.go", true),
            ("**/foo.go", "foo.go", true),
            ("**/BUILD.yaml", "fixtures/scripts/BUILD.yaml", true),
            ("**/*.go", "a/b/c/foo.go", true),
            ("**/*.go", "/c/foo.go", true),
            ("**/*.go", "a/b/c/foo.txt", false),
            ("**/*.go", "a/b/c", false),
            ("**/*.go", "/a/b/c", false),
            ("/a/b/**", "/a/b/c", true),
            ("/a/b/**", "/a/b/c/d/e/f/g", true),
            ("/a/b/**", "/a/b", false),
            ("/a/b/**", "a/b/c", false),
            ("/a/b/**/c", "/a/b/c", true),
            ("/a/b/**/c", "/a/b/1/2/3/4/c", true),
            ("/a/b/**/c/*.rs", "/a/b/1/2/3/4/c/foo.rs", true),
            ("/a/b/**/c/*.rs", "/a/b/1/2/3/4/c/foo.txt", false),
            ("/a/b/**/**/c", "/a/b/1/2/3/4/c", true),
            ("/a/b/**/**/c", "/a/b/1/c", true),
            ("/a/b/**/c/**/d", "/a/b/1/c/2/d", true),
            ("/a/b/**/c/**/d", "/a/b/1/c/2", false),
            ("*/*.go", "src/foo.go", true),
            ("*.yaml", "BUILD.yaml", true),
            ("*.yaml", "sub/BUILD.yaml", false),
        ];

        for (pattern, path, expected) in cases {
            assert_eq!(
                match_pattern(pattern, path),
                *expected,
                "pattern {} path {}",
                pattern,
                path
            );
        }
    }

    #[test]
    fn test_match_segment_wildcards() {
        assert!(match_segment("*.yaml", "BUILD.yaml"));
        assert!(match_segment("BUILD.*", "BUILD.yaml"));
        assert!(match_segment("B?ILD.yaml", "BUILD.yaml"));
        assert!(!match_segment("B?ILD.yaml", "BILD.yaml"));
        assert!(match_segment("*", "anything"));
        assert!(match_segment("*", ""));
    }

    #[test]
    fn test_glob_with_ignore() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join("skip/me")).unwrap();
        fs::write(dir.path().join("a/b/BUILD.yaml"), "").unwrap();
        fs::write(dir.path().join("skip/me/BUILD.yaml"), "").unwrap();
        fs::write(dir.path().join("BUILD.yaml"), "").unwrap();

        let ignores = vec!["skip".to_string()];
        let ignore = ignore_strings(&ignores);
        let res = glob(dir.path(), "**/BUILD.yaml", Some(&ignore)).unwrap();

        assert_eq!(res.len(), 2);
        assert!(res.iter().all(|p| !p.to_string_lossy().contains("skip")));
    }

    #[test]
    fn test_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.txt", "a.txt", "b.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let res = glob(dir.path(), "**/*.txt", None).unwrap();
        let names: Vec<_> = res
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }
}
