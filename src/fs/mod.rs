use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

/// Build a matcher for file-name globs such as `*.R` or `DESCRIPTION`.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid text file pattern: {pattern}"))?;
        builder.add(glob);
    }
    builder.build().context("failed to build text file patterns")
}

/// Every file under `root` whose file name matches `matcher`, sorted.
///
/// Unlike a lint run this sees everything in the package: hidden files and
/// ignore files are not honoured, since a packaged source tree may ship
/// files its own VCS would ignore.
pub fn discover_text_files(root: &Path, matcher: &GlobSet) -> Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false).follow_links(false);

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.context("error walking package directory")?;
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if path.file_name().is_some_and(|name| matcher.is_match(name)) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}
