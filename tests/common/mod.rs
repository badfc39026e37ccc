// tests/common/mod.rs

//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gorpa::{Application, Arguments, Error, PlanEntry, Reporter, Settings};

/// Writes a fixture repository into a fresh temp dir.
pub fn write_fixture(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

/// Loads the fixture application without a variant.
pub async fn load(dir: &tempfile::TempDir) -> Application {
    gorpa::find_application(dir.path(), Arguments::new(), None, &Settings::default())
        .await
        .unwrap()
}

/// A reporter event as observed by tests
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Plan(Vec<(String, bool)>),
    Started(String),
    Built { package: String, cache_hit: bool },
    Failed(String),
    Finished(bool),
}

/// Records every reporter event for later inspection
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn started_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn built(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Built { package, cache_hit } => Some((package, cache_hit)),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn plan(&self, entries: &[PlanEntry]) {
        self.events.lock().unwrap().push(Event::Plan(
            entries.iter().map(|e| (e.name.clone(), e.cached)).collect(),
        ));
    }

    fn package_started(&self, package: &str, _version: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(package.to_string()));
    }

    fn package_log(&self, _package: &str, _chunk: &str) {}

    fn package_built(&self, package: &str, _version: &str, _duration: Duration, cache_hit: bool) {
        self.events.lock().unwrap().push(Event::Built {
            package: package.to_string(),
            cache_hit,
        });
    }

    fn package_failed(&self, package: &str, _err: &Error) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Failed(package.to_string()));
    }

    fn build_finished(&self, success: bool, _duration: Duration) {
        self.events.lock().unwrap().push(Event::Finished(success));
    }
}
