//! Staging: materialize archived targets into a scratch directory that lives
//! exactly as long as the returned [`StagedTarget`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;
use tempfile::TempDir;
use thiserror::Error;

use crate::corpus::{Target, TargetKind};

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("cannot open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("cannot extract {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive entry escapes the package root: {0}")]
    UnsafeEntry(String),

    #[error("archive {0} contains no files")]
    Empty(PathBuf),
}

/// A directory-kind target ready for probing and analysis. For archives the
/// scratch directory is deleted when this value is dropped.
#[derive(Debug)]
pub struct StagedTarget {
    target: Target,
    scratch: Option<TempDir>,
}

impl StagedTarget {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn root(&self) -> &Path {
        &self.target.location
    }
}

/// Stage `target`. Directories pass through untouched; archives are extracted
/// with their single top-level directory stripped.
pub fn stage(target: &Target) -> Result<StagedTarget, StagingError> {
    match target.kind {
        TargetKind::Directory => Ok(StagedTarget {
            target: target.clone(),
            scratch: None,
        }),
        TargetKind::Archive => {
            let scratch = tempfile::Builder::new()
                .prefix(&format!("lintcompare-{}-", target.name))
                .tempdir()
                .map_err(StagingError::Scratch)?;
            extract_archive(&target.location, scratch.path())?;
            tracing::debug!(
                package = %target.name,
                dir = %scratch.path().display(),
                "staged archive"
            );
            Ok(StagedTarget {
                target: Target::directory(target.name.clone(), scratch.path()),
                scratch: Some(scratch),
            })
        }
    }
}

fn open_archive(path: &Path) -> Result<Box<dyn Read>, StagingError> {
    let file = File::open(path).map_err(|source| StagingError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    let name = path.to_string_lossy();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Drop the first path component and reject anything that would land
/// outside `dest`. Returns `None` for the top-level directory itself.
fn strip_leading_component(entry_path: &Path) -> Result<Option<PathBuf>, StagingError> {
    let mut stripped = PathBuf::new();
    let mut seen_root = false;
    for component in entry_path.components() {
        match component {
            Component::Normal(part) if seen_root => stripped.push(part),
            Component::Normal(_) => seen_root = true,
            Component::CurDir => {}
            _ => {
                return Err(StagingError::UnsafeEntry(
                    entry_path.display().to_string(),
                ));
            }
        }
    }
    if stripped.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(stripped))
    }
}

/// Symlinks may only point within the package: relative, and never up
/// through `..`. Otherwise a later entry written through the link could land
/// outside the scratch directory.
fn check_symlink_target(entry_path: &Path, link: &Path) -> Result<(), StagingError> {
    let escapes = link.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(StagingError::UnsafeEntry(format!(
            "{} -> {}",
            entry_path.display(),
            link.display()
        )));
    }
    Ok(())
}

/// Extract a (possibly gzipped) tarball into `dest`, stripping one leading
/// path component so `dest` becomes the package root.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), StagingError> {
    let extract_err = |source: std::io::Error| StagingError::Extract {
        path: archive.to_path_buf(),
        source,
    };

    let mut tar = tar::Archive::new(open_archive(archive)?);
    let mut extracted = 0usize;
    for entry in tar.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let entry_path = entry.path().map_err(extract_err)?.into_owned();
        let Some(relative) = strip_leading_component(&entry_path)? else {
            continue;
        };
        let out = dest.join(&relative);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(extract_err)?;
        }

        match entry.header().entry_type() {
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(extract_err)?
                    .map(|l| l.into_owned())
                    .ok_or_else(|| StagingError::UnsafeEntry(entry_path.display().to_string()))?;
                check_symlink_target(&entry_path, &link)?;
                entry.unpack(&out).map_err(extract_err)?;
            }
            EntryType::Link => {
                // Hard link targets name another archive member, so they are
                // stripped and confined the same way.
                let link = entry
                    .link_name()
                    .map_err(extract_err)?
                    .map(|l| l.into_owned())
                    .ok_or_else(|| StagingError::UnsafeEntry(entry_path.display().to_string()))?;
                let Some(source) = strip_leading_component(&link)? else {
                    return Err(StagingError::UnsafeEntry(entry_path.display().to_string()));
                };
                std::fs::hard_link(dest.join(source), &out).map_err(extract_err)?;
            }
            _ => {
                entry.unpack(&out).map_err(extract_err)?;
            }
        }
        extracted += 1;
    }

    if extracted == 0 {
        return Err(StagingError::Empty(archive.to_path_buf()));
    }
    Ok(())
}
