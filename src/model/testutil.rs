// src/model/testutil.rs

//! Shared constructors for model tests

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use super::component::Component;
use super::package::{GenericConfig, Package, PackageConfig, PackageType};
use super::Application;

/// An empty application for index-level tests.
pub fn test_application() -> Application {
    Application::default()
}

/// A generic test package in component `testcomp` with the given
/// fully qualified dependencies.
pub fn test_package(name: &str, dependencies: Vec<String>) -> Package {
    static COMPONENT: OnceLock<Arc<Component>> = OnceLock::new();
    let component = COMPONENT
        .get_or_init(|| {
            Arc::new(Component {
                name: "testcomp".to_string(),
                origin: PathBuf::from("testcomp"),
                ..Default::default()
            })
        })
        .clone();

    Package {
        name: name.to_string(),
        component,
        full_name_override: None,
        tpe: PackageType::Generic,
        raw_sources: vec!["does-not-exist".to_string()],
        sources: Vec::new(),
        dependencies,
        layout: Default::default(),
        argument_dependencies: Vec::new(),
        environment: Vec::new(),
        config: PackageConfig::Generic(GenericConfig::default()),
        definition: format!("name: {}\ntype: generic\n", name).into_bytes(),
        ephemeral: false,
        version: OnceLock::new(),
    }
}
