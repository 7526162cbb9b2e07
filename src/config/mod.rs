use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_yml::Value;

/// Environment variable holding extra package library directories
/// (platform path-list syntax). Searched before configured directories.
pub const LIBRARY_PATH_ENV: &str = "LINTCOMPARE_LIBRARY_PATH";

/// Per-rule options from the `rules:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
    /// The rule executes target code, so the target's declared
    /// dependencies must be loadable before it can run.
    pub dependency_sensitive: bool,
}

/// Resolved configuration from `.lintcompare.yml`, layered over built-in
/// defaults suited to R package corpora.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    config_path: Option<PathBuf>,
    default_rules: Vec<String>,
    rules: BTreeMap<String, RuleOptions>,
    manifest_files: Vec<String>,
    dependency_fields: Vec<String>,
    text_globs: Vec<String>,
    library_paths: Vec<PathBuf>,
    builtin_packages: BTreeSet<String>,
    available_capabilities: BTreeSet<String>,
    capability_requirements: BTreeMap<String, String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            default_rules: vec!["object_usage_linter".to_string()],
            rules: BTreeMap::new(),
            manifest_files: vec!["DESCRIPTION".to_string()],
            dependency_fields: ["Depends", "Imports", "LinkingTo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            text_globs: [
                "*.R", "*.r", "*.Rmd", "*.rmd", "*.qmd", "*.Rnw", "*.Rd", "DESCRIPTION", "NAMESPACE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            library_paths: Vec::new(),
            builtin_packages: [
                "R", "base", "compiler", "datasets", "graphics", "grDevices", "grid", "methods",
                "parallel", "splines", "stats", "stats4", "tools", "utils",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            available_capabilities: BTreeSet::new(),
            capability_requirements: [("tcltk", "tcltk")]
                .iter()
                .map(|(dep, cap)| (dep.to_string(), cap.to_string()))
                .collect(),
        }
    }
}

/// Load config from `path`. A missing file yields the built-in defaults
/// unless `required` is set (the user named the file explicitly).
pub fn load_config(path: &Path, required: bool) -> Result<ResolvedConfig> {
    let mut config = ResolvedConfig::default();
    config.library_paths = library_paths_from_env();

    if !path.exists() {
        if required {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(config);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let raw: Value = serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config.config_path = Some(path.to_path_buf());

    let Value::Mapping(map) = &raw else {
        return Ok(config);
    };

    for (key, value) in map {
        let Some(key_str) = key.as_str() else {
            continue;
        };
        match key_str {
            "default_rules" => {
                if let Some(list) = value_to_string_list(value) {
                    config.default_rules = list;
                }
            }
            "rules" => {
                if let Some(rules) = value.as_mapping() {
                    for (name, options) in rules {
                        if let Some(name) = name.as_str() {
                            config
                                .rules
                                .insert(name.to_string(), parse_rule_options(options));
                        }
                    }
                }
            }
            "manifest" => {
                if let Some(files) = extract_string_list(value, "files") {
                    config.manifest_files = files;
                }
                if let Some(fields) = extract_string_list(value, "dependency_fields") {
                    config.dependency_fields = fields;
                }
            }
            "text_globs" => {
                if let Some(list) = value_to_string_list(value) {
                    config.text_globs = list;
                }
            }
            "environment" => {
                if let Some(paths) = extract_string_list(value, "library_paths") {
                    let base = path.parent().unwrap_or(Path::new("."));
                    config
                        .library_paths
                        .extend(paths.into_iter().map(|p| base.join(p)));
                }
                if let Some(builtin) = extract_string_list(value, "builtin") {
                    config.builtin_packages.extend(builtin);
                }
            }
            "capabilities" => {
                if let Some(available) = extract_string_list(value, "available") {
                    config.available_capabilities = available.into_iter().collect();
                }
                if let Some(reqs) = value
                    .as_mapping()
                    .and_then(|m| m.get(Value::String("requirements".into())))
                    .and_then(|v| v.as_mapping())
                {
                    for (dep, cap) in reqs {
                        if let (Some(dep), Some(cap)) = (dep.as_str(), cap.as_str()) {
                            config
                                .capability_requirements
                                .insert(dep.to_string(), cap.to_string());
                        }
                    }
                }
            }
            other => {
                tracing::debug!(key = other, "ignoring unknown config key");
            }
        }
    }

    Ok(config)
}

impl ResolvedConfig {
    /// Path of the file this config was read from, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn default_rules(&self) -> &[String] {
        &self.default_rules
    }

    /// Rules declared in the config file, layered over the built-in rule table.
    pub fn rules(&self) -> &BTreeMap<String, RuleOptions> {
        &self.rules
    }

    pub fn manifest_files(&self) -> &[String] {
        &self.manifest_files
    }

    pub fn dependency_fields(&self) -> &[String] {
        &self.dependency_fields
    }

    pub fn text_globs(&self) -> &[String] {
        &self.text_globs
    }

    pub fn library_paths(&self) -> &[PathBuf] {
        &self.library_paths
    }

    pub fn builtin_packages(&self) -> &BTreeSet<String> {
        &self.builtin_packages
    }

    pub fn available_capabilities(&self) -> &BTreeSet<String> {
        &self.available_capabilities
    }

    /// Dependency name -> platform capability it needs.
    pub fn capability_requirements(&self) -> &BTreeMap<String, String> {
        &self.capability_requirements
    }
}

fn library_paths_from_env() -> Vec<PathBuf> {
    std::env::var_os(LIBRARY_PATH_ENV)
        .map(|raw| {
            std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_rule_options(value: &Value) -> RuleOptions {
    let mut options = RuleOptions::default();
    if let Value::Mapping(map) = value {
        for (k, v) in map {
            if k.as_str() == Some("dependency_sensitive") {
                if let Some(b) = v.as_bool() {
                    options.dependency_sensitive = b;
                }
            }
        }
    }
    options
}

fn extract_string_list(value: &Value, key: &str) -> Option<Vec<String>> {
    value
        .as_mapping()?
        .get(Value::String(key.to_string()))
        .and_then(value_to_string_list)
}

fn value_to_string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Sequence(seq) => Some(
            seq.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        ),
        _ => None,
    }
}
