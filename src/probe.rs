//! Precondition probes: decide per package whether a lint run can safely
//! happen, and say why not when it can't.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::GlobSet;

use crate::config::ResolvedConfig;
use crate::env::{Capabilities, DependencyEnvironment};
use crate::fs::{build_globset, discover_text_files};
use crate::manifest::Manifest;

/// Why a package was left out of a pass. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The archive could not be extracted.
    Staging(String),
    /// The package tree or its manifest could not be read at all.
    Unreadable(String),
    /// A text file does not decode as UTF-8.
    UnreadableEncoding { file: PathBuf },
    /// A dependency needs a platform capability this machine lacks.
    MissingCapability {
        dependency: String,
        capability: String,
    },
    /// Declared dependencies that are not installed.
    UnresolvedDependency(Vec<String>),
    /// The analyzer failed on this package for one rule.
    AnalysisCrashed { rule: String, detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Staging(detail) => write!(f, "staging failed: {detail}"),
            SkipReason::Unreadable(detail) => write!(f, "unreadable package: {detail}"),
            SkipReason::UnreadableEncoding { file } => {
                write!(f, "unreadable encoding ({})", file.display())
            }
            SkipReason::MissingCapability {
                dependency,
                capability,
            } => write!(
                f,
                "missing platform capability: {capability} (required by {dependency})"
            ),
            SkipReason::UnresolvedDependency(names) => {
                write!(f, "unresolved dependency: {}", names.join(", "))
            }
            SkipReason::AnalysisCrashed { rule, detail } => {
                write!(f, "analysis crashed ({rule}): {detail}")
            }
        }
    }
}

pub struct Prober<'a> {
    text_files: GlobSet,
    manifest_files: Vec<String>,
    dependency_fields: Vec<String>,
    capabilities: Capabilities,
    environment: &'a dyn DependencyEnvironment,
}

impl<'a> Prober<'a> {
    pub fn new(
        text_globs: &[String],
        manifest_files: Vec<String>,
        dependency_fields: Vec<String>,
        capabilities: Capabilities,
        environment: &'a dyn DependencyEnvironment,
    ) -> Result<Self> {
        Ok(Self {
            text_files: build_globset(text_globs)?,
            manifest_files,
            dependency_fields,
            capabilities,
            environment,
        })
    }

    pub fn from_config(
        config: &ResolvedConfig,
        environment: &'a dyn DependencyEnvironment,
    ) -> Result<Self> {
        Self::new(
            config.text_globs(),
            config.manifest_files().to_vec(),
            config.dependency_fields().to_vec(),
            Capabilities::from_config(config),
            environment,
        )
    }

    /// Run the probes in order, stopping at the first failure. Dependency
    /// probes only run when `dependency_sensitive` is set.
    pub fn probe(&self, root: &Path, dependency_sensitive: bool) -> Result<(), SkipReason> {
        self.check_encoding(root)?;
        if !dependency_sensitive {
            return Ok(());
        }

        let manifest = Manifest::read(root, &self.manifest_files)
            .map_err(|e| SkipReason::Unreadable(format!("{e:#}")))?;
        let dependencies = manifest.dependencies(&self.dependency_fields);

        if let Some((dependency, capability)) = self.capabilities.first_missing(&dependencies) {
            return Err(SkipReason::MissingCapability {
                dependency: dependency.to_string(),
                capability: capability.to_string(),
            });
        }

        self.environment
            .resolve(&dependencies)
            .map_err(SkipReason::UnresolvedDependency)
    }

    fn check_encoding(&self, root: &Path) -> Result<(), SkipReason> {
        let files = discover_text_files(root, &self.text_files)
            .map_err(|e| SkipReason::Unreadable(format!("{e:#}")))?;
        for file in files {
            let bytes = std::fs::read(&file).map_err(|e| {
                SkipReason::Unreadable(format!("cannot read {}: {e}", file.display()))
            })?;
            if std::str::from_utf8(&bytes).is_err() {
                let relative = file.strip_prefix(root).unwrap_or(&file).to_path_buf();
                return Err(SkipReason::UnreadableEncoding { file: relative });
            }
        }
        Ok(())
    }
}
