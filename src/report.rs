// src/report.rs

//! Build reporting
//!
//! The scheduler emits ordered events per package through the [`Reporter`]
//! trait: plan, started, log chunks, built/failed, finished. Events of a
//! single package arrive in order; events of distinct packages may
//! interleave. Implementations must be safe for concurrent calls and
//! serialize internally.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::Error;

/// One node of the build plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_for_build: Option<String>,
}

/// Receives ordered build events
pub trait Reporter: Send + Sync {
    /// The computed build plan, dependencies first.
    fn plan(&self, entries: &[PlanEntry]);

    /// A package build began.
    fn package_started(&self, package: &str, version: &str);

    /// A chunk of build output from a package's build steps.
    fn package_log(&self, package: &str, chunk: &str);

    /// A package finished successfully.
    fn package_built(&self, package: &str, version: &str, duration: Duration, cache_hit: bool);

    /// A package build failed.
    fn package_failed(&self, package: &str, err: &Error);

    /// The whole build finished.
    fn build_finished(&self, success: bool, duration: Duration);
}

/// Human-readable console reporter
#[derive(Default)]
pub struct ConsoleReporter {
    out: Mutex<()>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, line: String) {
        let _guard = self.out.lock().unwrap();
        println!("{}", line);
    }
}

impl Reporter for ConsoleReporter {
    fn plan(&self, entries: &[PlanEntry]) {
        let _guard = self.out.lock().unwrap();
        println!("will build {} package(s):", entries.iter().filter(|e| !e.cached).count());
        for entry in entries {
            let state = if entry.cached { "cached" } else { "build" };
            println!("  [{}] {}\t{}", state, entry.name, entry.version);
        }
    }

    fn package_started(&self, package: &str, version: &str) {
        self.emit(format!("[{}] build started (version {})", package, version));
    }

    fn package_log(&self, package: &str, chunk: &str) {
        let _guard = self.out.lock().unwrap();
        for line in chunk.lines() {
            println!("[{}] {}", package, line);
        }
    }

    fn package_built(&self, package: &str, _version: &str, duration: Duration, cache_hit: bool) {
        if cache_hit {
            self.emit(format!("[{}] found in cache", package));
        } else {
            self.emit(format!("[{}] build succeeded ({:.1}s)", package, duration.as_secs_f64()));
        }
    }

    fn package_failed(&self, package: &str, err: &Error) {
        self.emit(format!("[{}] build failed: {}", package, err));
    }

    fn build_finished(&self, success: bool, duration: Duration) {
        if success {
            self.emit(format!("build succeeded ({:.1}s)", duration.as_secs_f64()));
        } else {
            self.emit(format!("build failed ({:.1}s)", duration.as_secs_f64()));
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum JsonEvent<'a> {
    PackagePlan {
        packages: &'a [PlanEntry],
    },
    PackageStarted {
        package: &'a str,
        version: &'a str,
        time: String,
    },
    PackageLog {
        package: &'a str,
        chunk: &'a str,
    },
    PackageBuilt {
        package: &'a str,
        version: &'a str,
        duration_ms: u128,
        cache_hit: bool,
    },
    PackageFailed {
        package: &'a str,
        error: String,
    },
    BuildFinished {
        success: bool,
        duration_ms: u128,
    },
}

/// Machine-readable reporter emitting one JSON object per line
pub struct JsonReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonReporter {
    pub fn new() -> Self {
        Self::to_writer(Box::new(std::io::stdout()))
    }

    pub fn to_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn emit(&self, event: &JsonEvent<'_>) {
        let mut out = self.out.lock().unwrap();
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(out, "{}", line);
        }
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn plan(&self, entries: &[PlanEntry]) {
        self.emit(&JsonEvent::PackagePlan { packages: entries });
    }

    fn package_started(&self, package: &str, version: &str) {
        self.emit(&JsonEvent::PackageStarted {
            package,
            version,
            time: Utc::now().to_rfc3339(),
        });
    }

    fn package_log(&self, package: &str, chunk: &str) {
        self.emit(&JsonEvent::PackageLog { package, chunk });
    }

    fn package_built(&self, package: &str, version: &str, duration: Duration, cache_hit: bool) {
        self.emit(&JsonEvent::PackageBuilt {
            package,
            version,
            duration_ms: duration.as_millis(),
            cache_hit,
        });
    }

    fn package_failed(&self, package: &str, err: &Error) {
        self.emit(&JsonEvent::PackageFailed {
            package,
            error: err.to_string(),
        });
    }

    fn build_finished(&self, success: bool, duration: Duration) {
        self.emit(&JsonEvent::BuildFinished {
            success,
            duration_ms: duration.as_millis(),
        });
    }
}

/// Reporter that discards everything; used by tests and scripts
#[derive(Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn plan(&self, _entries: &[PlanEntry]) {}
    fn package_started(&self, _package: &str, _version: &str) {}
    fn package_log(&self, _package: &str, _chunk: &str) {}
    fn package_built(&self, _package: &str, _version: &str, _duration: Duration, _cache_hit: bool) {}
    fn package_failed(&self, _package: &str, _err: &Error) {}
    fn build_finished(&self, _success: bool, _duration: Duration) {}
}

/// Serializes plan entries as newline-delimited JSON.
pub fn write_plan(out: &mut impl Write, entries: &[PlanEntry]) -> std::io::Result<()> {
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, cached: bool) -> PlanEntry {
        PlanEntry {
            name: name.to_string(),
            version: "v".repeat(8),
            dependencies: vec!["dep:one".to_string()],
            cached,
            reason_for_build: if cached { None } else { Some("not in cache".to_string()) },
        }
    }

    #[test]
    fn test_write_plan_is_jsonl() {
        let entries = vec![entry("comp:a", false), entry("comp:b", true)];
        let mut buf = Vec::new();
        write_plan(&mut buf, &entries).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        // encoding and re-decoding the plan is the identity
        let decoded: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded["name"], "comp:a");
        assert_eq!(decoded["cached"], false);
        assert_eq!(decoded["reason_for_build"], "not in cache");
        let decoded: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(decoded.get("reason_for_build").is_none());
    }

    #[test]
    fn test_json_reporter_emits_one_line_per_event() {
        let buf: std::sync::Arc<Mutex<Vec<u8>>> = Default::default();

        struct SharedBuf(std::sync::Arc<Mutex<Vec<u8>>>);
        impl Write for SharedBuf {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(data);
                Ok(data.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let reporter = JsonReporter::to_writer(Box::new(SharedBuf(buf.clone())));
        reporter.package_started("comp:a", "v1");
        reporter.package_built("comp:a", "v1", Duration::from_millis(10), false);
        reporter.build_finished(true, Duration::from_millis(12));

        let content = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v.get("event").is_some());
        }
    }
}
