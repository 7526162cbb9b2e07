//! The package environment dependency-sensitive rules load target code into.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::ResolvedConfig;

/// Resolves declared dependencies against the installed package environment.
pub trait DependencyEnvironment {
    /// `Ok(())` when every name resolves, otherwise the unresolvable names
    /// in input order.
    fn resolve(&self, names: &[String]) -> Result<(), Vec<String>>;
}

/// Package libraries on disk: a dependency resolves when some library
/// directory contains `<name>/<manifest>`, or when it ships with the platform.
#[derive(Debug, Clone)]
pub struct LibraryEnvironment {
    library_paths: Vec<PathBuf>,
    manifest_files: Vec<String>,
    builtin: BTreeSet<String>,
}

impl LibraryEnvironment {
    pub fn new(
        library_paths: Vec<PathBuf>,
        manifest_files: Vec<String>,
        builtin: BTreeSet<String>,
    ) -> Self {
        Self {
            library_paths,
            manifest_files,
            builtin,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(
            config.library_paths().to_vec(),
            config.manifest_files().to_vec(),
            config.builtin_packages().clone(),
        )
    }

    fn is_installed(&self, name: &str) -> bool {
        if self.builtin.contains(name) {
            return true;
        }
        self.library_paths.iter().any(|lib| {
            let dir = lib.join(name);
            self.manifest_files.iter().any(|m| dir.join(m).is_file())
        })
    }
}

impl DependencyEnvironment for LibraryEnvironment {
    fn resolve(&self, names: &[String]) -> Result<(), Vec<String>> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.is_installed(n))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

/// Optional platform capabilities (e.g. a Tcl/Tk runtime) and which
/// dependencies need them.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    available: BTreeSet<String>,
    requirements: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn new(available: BTreeSet<String>, requirements: BTreeMap<String, String>) -> Self {
        Self {
            available,
            requirements,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(
            config.available_capabilities().clone(),
            config.capability_requirements().clone(),
        )
    }

    /// First `(dependency, capability)` pair whose capability is unavailable.
    pub fn first_missing<'a>(&'a self, dependencies: &'a [String]) -> Option<(&'a str, &'a str)> {
        dependencies.iter().find_map(|dep| {
            let capability = self.requirements.get(dep)?;
            if self.available.contains(capability) {
                None
            } else {
                Some((dep.as_str(), capability.as_str()))
            }
        })
    }
}
