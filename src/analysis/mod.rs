pub mod command;
pub mod registry;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::probe::SkipReason;
use crate::revision::RevisionLabel;
use registry::RuleSpec;

/// One finding as the analyzer reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawFinding {
    pub line_number: usize,
    #[serde(default)]
    pub column_number: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// The offending source line.
    #[serde(default)]
    pub line: Option<String>,
    /// Highlighted column ranges; the first one becomes the record's span.
    #[serde(default)]
    pub ranges: Vec<(usize, usize)>,
    /// Anything else the rule reports, kept as extra columns.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Runs one rule over one package directory.
pub trait Analyzer {
    fn run(&self, target_dir: &Path, rule: &RuleSpec) -> anyhow::Result<Vec<RawFinding>>;
}

/// One normalized row of the dataset, attributed to exactly one
/// (revision, package, rule).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingRecord {
    pub revision: RevisionLabel,
    pub target: String,
    pub rule: String,
    pub line: usize,
    pub column: usize,
    pub kind: String,
    pub message: String,
    pub source_line: Option<String>,
    pub span: Option<(usize, usize)>,
    pub extra: BTreeMap<String, String>,
}

/// Strip the package root from paths the analyzer echoes back, so archive
/// packages staged into different scratch directories compare equal.
fn relativize(value: &str, root: &Path) -> String {
    match Path::new(value).strip_prefix(root) {
        Ok(rest) => rest.to_string_lossy().into_owned(),
        Err(_) => value.to_string(),
    }
}

impl FindingRecord {
    pub fn from_raw(
        raw: RawFinding,
        root: &Path,
        target: &str,
        rule: &RuleSpec,
        revision: &RevisionLabel,
    ) -> Self {
        let extra = raw
            .extra
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => relativize(&s, root),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();

        Self {
            revision: revision.clone(),
            target: target.to_string(),
            rule: rule.name().to_string(),
            line: raw.line_number,
            column: raw.column_number,
            kind: raw.kind,
            message: raw.message,
            source_line: raw.line,
            span: raw.ranges.first().copied(),
            extra,
        }
    }
}

/// Run `rule` over the package at `root` and stamp the findings. Any analyzer
/// failure becomes a skip for this package and rule only.
pub fn analyze_target(
    analyzer: &dyn Analyzer,
    root: &Path,
    target: &str,
    rule: &RuleSpec,
    revision: &RevisionLabel,
) -> Result<Vec<FindingRecord>, SkipReason> {
    let raw = analyzer
        .run(root, rule)
        .map_err(|e| SkipReason::AnalysisCrashed {
            rule: rule.name().to_string(),
            detail: format!("{e:#}"),
        })?;
    Ok(raw
        .into_iter()
        .map(|f| FindingRecord::from_raw(f, root, target, rule, revision))
        .collect())
}
