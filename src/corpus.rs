//! Corpus resolution: turn a package list or a package directory into the
//! validated list of targets a pass will lint.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::error::CompareError;

/// `<name>_<version>.<archive-ext>`, the naming convention for packaged sources.
static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*?)_(?P<version>[0-9][0-9A-Za-z.\-]*)\.(?:tar\.gz|tgz|tar)$")
        .expect("archive name pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Directory,
    Archive,
}

/// One corpus member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub location: PathBuf,
    pub kind: TargetKind,
}

impl Target {
    pub fn directory(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            kind: TargetKind::Directory,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.location.display())
    }
}

/// Where the corpus comes from.
#[derive(Debug, Clone)]
pub enum CorpusSpec {
    /// Explicit package directories or archives.
    Packages(Vec<PathBuf>),
    /// Every entry directly inside this directory.
    Directory(PathBuf),
}

impl CorpusSpec {
    /// Exactly one of `packages` (non-empty) and `directory` must be supplied.
    pub fn from_options(
        packages: Vec<PathBuf>,
        directory: Option<PathBuf>,
    ) -> Result<Self, CompareError> {
        match (packages.is_empty(), directory) {
            (false, Some(_)) => Err(CompareError::config(
                "--packages and --package-dir are mutually exclusive; supply exactly one",
            )),
            (true, None) => Err(CompareError::config(
                "one of --packages or --package-dir is required",
            )),
            (false, None) => Ok(CorpusSpec::Packages(packages)),
            (true, Some(dir)) => Ok(CorpusSpec::Directory(dir)),
        }
    }
}

/// Down-sampling request: `size` targets, reproducible when `seed` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub size: usize,
    pub seed: Option<u64>,
}

/// Package name encoded in an archive file name, if it follows the convention.
pub fn archive_package_name(file_name: &str) -> Option<&str> {
    ARCHIVE_NAME
        .captures(file_name)
        .and_then(|c| c.name("name"))
        .map(|m| m.as_str())
}

/// Classify one candidate path. Returns `None` (and logs why) when the path
/// is not something the pipeline can lint. `path` must already be absolute:
/// the analyzer runs from the linter checkout, not from the caller's
/// working directory.
fn classify(path: &Path, manifest_files: &[String]) -> Option<Target> {
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        tracing::warn!(path = %path.display(), "skipping path without a file name");
        return None;
    };

    if path.is_dir() {
        if manifest_files.iter().any(|m| path.join(m).is_file()) {
            return Some(Target::directory(file_name, path));
        }
        tracing::warn!(
            path = %path.display(),
            "skipping directory without a package manifest ({})",
            manifest_files.join(", ")
        );
        return None;
    }

    if path.is_file() {
        if let Some(name) = archive_package_name(&file_name) {
            return Some(Target {
                name: name.to_string(),
                location: path.to_path_buf(),
                kind: TargetKind::Archive,
            });
        }
        tracing::warn!(
            path = %path.display(),
            "skipping file not named <name>_<version>.tar.gz"
        );
        return None;
    }

    tracing::warn!(path = %path.display(), "skipping missing package path");
    None
}

fn list_directory(dir: &Path) -> Result<Vec<PathBuf>, CompareError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        CompareError::config(format!(
            "cannot read package directory {}: {e}",
            dir.display()
        ))
    })?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => paths.push(entry.path()),
            Err(e) => tracing::warn!(
                dir = %dir.display(),
                error = %e,
                "skipping unreadable directory entry"
            ),
        }
    }
    paths.sort();
    Ok(paths)
}

/// Resolve `spec` into a deduplicated list of lintable targets, optionally
/// down-sampled. Fails when nothing lintable remains.
pub fn resolve_corpus(
    spec: &CorpusSpec,
    manifest_files: &[String],
    sampling: Option<Sampling>,
) -> Result<Vec<Target>, CompareError> {
    let candidates = match spec {
        CorpusSpec::Packages(paths) => paths.clone(),
        CorpusSpec::Directory(dir) => list_directory(dir)?,
    };

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for path in &candidates {
        let Ok(location) = path.canonicalize() else {
            tracing::warn!(path = %path.display(), "skipping missing package path");
            continue;
        };
        if !seen.insert(location.clone()) {
            continue;
        }
        if let Some(target) = classify(&location, manifest_files) {
            targets.push(target);
        }
    }

    if targets.is_empty() {
        return Err(CompareError::config("corpus resolved to zero lintable packages"));
    }

    match sampling {
        Some(Sampling { size: 0, .. }) => {
            Err(CompareError::config("--sample-size must be at least 1"))
        }
        Some(Sampling { size, seed }) if size < targets.len() => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            Ok(sample_targets(targets, size, &mut rng))
        }
        _ => Ok(targets),
    }
}

/// Uniform random subset of exactly `size` targets without replacement,
/// keeping their relative order. Returns everything when `size >= len`.
pub fn sample_targets<R: Rng + ?Sized>(
    targets: Vec<Target>,
    size: usize,
    rng: &mut R,
) -> Vec<Target> {
    if size >= targets.len() {
        return targets;
    }
    let mut picked = rand::seq::index::sample(rng, targets.len(), size).into_vec();
    picked.sort_unstable();
    let mut picked = picked.into_iter().peekable();
    targets
        .into_iter()
        .enumerate()
        .filter_map(|(i, t)| {
            if picked.peek() == Some(&i) {
                picked.next();
                Some(t)
            } else {
                None
            }
        })
        .collect()
}
