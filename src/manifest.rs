//! Package manifests in DCF form (`Key: value`, indented continuation lines),
//! as used by R's `DESCRIPTION` file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

/// The platform itself shows up in `Depends` but is never a package.
const PLATFORM_PSEUDO_DEPENDENCY: &str = "R";

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    fields: BTreeMap<String, String>,
}

impl Manifest {
    pub fn parse(content: &str) -> Self {
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(key) = &current {
                    if let Some(value) = fields.get_mut(key) {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_string();
                fields.insert(key.clone(), value.trim().to_string());
                current = Some(key);
            } else {
                current = None;
            }
        }

        Self { fields }
    }

    /// Read the first manifest file from `candidates` that exists under `root`.
    /// A package without any manifest yields an empty manifest.
    pub fn read(root: &Path, candidates: &[String]) -> Result<Self> {
        for name in candidates {
            let path = root.join(name);
            if !path.is_file() {
                continue;
            }
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            return Ok(Self::parse(&String::from_utf8_lossy(&bytes)));
        }
        Ok(Self::default())
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Declared dependency names from `fields`, in declaration order,
    /// without version constraints and without duplicates.
    pub fn dependencies(&self, fields: &[String]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for field in fields {
            let Some(value) = self.field(field) else {
                continue;
            };
            for entry in value.split(',') {
                let name = entry
                    .split('(')
                    .next()
                    .unwrap_or_default()
                    .trim();
                if name.is_empty() || name == PLATFORM_PSEUDO_DEPENDENCY {
                    continue;
                }
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }
}
