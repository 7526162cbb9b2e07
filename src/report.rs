//! The labeled dataset: every finding from both passes, plus the skips that
//! explain missing packages.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::analysis::FindingRecord;
use crate::error::CompareError;
use crate::probe::SkipReason;
use crate::revision::RevisionLabel;

/// Fixed leading columns of the exported CSV.
pub const BASE_COLUMNS: &[&str] = &[
    "source",
    "package",
    "rule",
    "line_number",
    "column_number",
    "type",
    "message",
    "line",
];

const SPAN_COLUMNS: &[&str] = &["span_start", "span_end"];

/// A package left out of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipOutcome {
    pub revision: RevisionLabel,
    pub target: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct Report {
    records: Vec<FindingRecord>,
    skips: Vec<SkipOutcome>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = FindingRecord>) {
        self.records.extend(records);
    }

    /// Record a skip and warn about it right away.
    pub fn record_skip(&mut self, skip: SkipOutcome) {
        tracing::warn!(
            revision = %skip.revision,
            package = %skip.target,
            reason = %skip.reason,
            "skipping package"
        );
        self.skips.push(skip);
    }

    pub fn records(&self) -> &[FindingRecord] {
        &self.records
    }

    pub fn skips(&self) -> &[SkipOutcome] {
        &self.skips
    }

    /// Rule-specific columns: the union of every record's extra keys, sorted,
    /// minus names that would shadow a fixed column.
    pub fn extra_columns(&self) -> Vec<String> {
        let mut keys: BTreeSet<&str> = BTreeSet::new();
        for record in &self.records {
            keys.extend(record.extra.keys().map(String::as_str));
        }
        keys.into_iter()
            .filter(|k| !BASE_COLUMNS.contains(k) && !SPAN_COLUMNS.contains(k))
            .map(String::from)
            .collect()
    }

    fn has_spans(&self) -> bool {
        self.records.iter().any(|r| r.span.is_some())
    }

    /// Write the dataset as CSV with a header row. Output depends only on the
    /// records held, so repeated calls produce identical bytes.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let extras = self.extra_columns();
        let spans = self.has_spans();

        let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(out);
        let mut header: Vec<&str> = BASE_COLUMNS.to_vec();
        header.extend(extras.iter().map(String::as_str));
        if spans {
            header.extend_from_slice(SPAN_COLUMNS);
        }
        wtr.write_record(&header)?;

        for r in &self.records {
            let mut row = vec![
                r.revision.id.clone(),
                r.target.clone(),
                r.rule.clone(),
                r.line.to_string(),
                r.column.to_string(),
                r.kind.clone(),
                r.message.clone(),
                r.source_line.clone().unwrap_or_default(),
            ];
            for key in &extras {
                row.push(r.extra.get(key).cloned().unwrap_or_default());
            }
            if spans {
                match r.span {
                    Some((start, end)) => {
                        row.push(start.to_string());
                        row.push(end.to_string());
                    }
                    None => {
                        row.push(String::new());
                        row.push(String::new());
                    }
                }
            }
            wtr.write_record(&row)?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Persist the dataset to `path`, creating parent directories.
    pub fn export(&self, path: &Path) -> Result<(), CompareError> {
        let write = || -> Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            self.write_csv(BufWriter::new(file))
        };
        write().map_err(|source| CompareError::Export {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Record counts per (source, rule), in label order.
    pub fn counts(&self) -> BTreeMap<(RevisionLabel, String), usize> {
        let mut counts = BTreeMap::new();
        for r in &self.records {
            *counts
                .entry((r.revision.clone(), r.rule.clone()))
                .or_insert(0) += 1;
        }
        counts
    }

    pub fn print_summary(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "lintcompare summary:")?;
        writeln!(out, "  {:<24} {:<36} {:>8}", "source", "rule", "findings")?;
        for ((label, rule), count) in self.counts() {
            writeln!(out, "  {:<24} {:<36} {:>8}", label.id, rule, count)?;
        }

        let mut skipped: BTreeMap<&RevisionLabel, usize> = BTreeMap::new();
        for skip in &self.skips {
            *skipped.entry(&skip.revision).or_insert(0) += 1;
        }
        for (label, count) in skipped {
            let word = if count == 1 { "skip" } else { "skips" };
            writeln!(out, "  {}: {count} {word} (see warnings above)", label.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::{Revision, RevisionRole};

    fn label(role: RevisionRole, id: &str) -> RevisionLabel {
        RevisionLabel::new(role, &Revision::Branch(id.to_string()))
    }

    fn record(source: &str, package: &str, line: usize) -> FindingRecord {
        FindingRecord {
            revision: label(RevisionRole::Baseline, source),
            target: package.to_string(),
            rule: "object_usage_linter".to_string(),
            line,
            column: 3,
            kind: "warning".to_string(),
            message: "no visible binding for global variable 'x'".to_string(),
            source_line: Some("  y <- x".to_string()),
            span: None,
            extra: BTreeMap::new(),
        }
    }

    fn render(report: &Report) -> String {
        let mut buf = Vec::new();
        report.write_csv(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn empty_report_has_header_only() {
        let out = render(&Report::new());
        assert_eq!(
            out,
            "source,package,rule,line_number,column_number,type,message,line\n"
        );
    }

    #[test]
    fn rows_follow_header() {
        let mut report = Report::new();
        report.extend([record("main", "pkgA", 4)]);
        let out = render(&report);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "main,pkgA,object_usage_linter,4,3,warning,no visible binding for global variable 'x',  y <- x"
        );
    }

    #[test]
    fn extra_and_span_columns_are_flattened() {
        let mut a = record("main", "pkgA", 1);
        a.extra.insert("filename".into(), "R/a.R".into());
        a.span = Some((3, 7));
        let mut b = record("main", "pkgB", 2);
        b.extra.insert("fixable".into(), "true".into());
        b.extra.insert("message".into(), "shadowed".into());

        let mut report = Report::new();
        report.extend([a, b]);
        assert_eq!(report.extra_columns(), vec!["filename", "fixable"]);

        let out = render(&report);
        let mut rdr = csv::Reader::from_reader(out.as_bytes());
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec![
                "source", "package", "rule", "line_number", "column_number", "type", "message",
                "line", "filename", "fixable", "span_start", "span_end"
            ]
        );
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][8], "R/a.R");
        assert_eq!(&rows[0][10], "3");
        assert_eq!(&rows[1][8], "");
        assert_eq!(&rows[1][9], "true");
        assert_eq!(&rows[1][11], "");
    }

    #[test]
    fn export_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let mut report = Report::new();
        report.extend([record("main", "pkgA", 1), record("feature", "pkgA", 1)]);

        report.export(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        report.export(&path).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn export_to_unwritable_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let err = Report::new().export(&blocker.join("out.csv")).unwrap_err();
        assert!(matches!(err, CompareError::Export { .. }));
    }

    #[test]
    fn summary_counts_by_source_and_rule() {
        let mut report = Report::new();
        report.extend([
            record("main", "pkgA", 1),
            record("main", "pkgB", 1),
            record("feature", "pkgA", 1),
        ]);
        report.record_skip(SkipOutcome {
            revision: label(RevisionRole::Baseline, "main"),
            target: "pkgC".to_string(),
            reason: SkipReason::UnresolvedDependency(vec!["foo".to_string()]),
        });

        let counts = report.counts();
        assert_eq!(
            counts[&(label(RevisionRole::Baseline, "main"), "object_usage_linter".to_string())],
            2
        );

        let mut buf = Vec::new();
        report.print_summary(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("main: 1 skip"));
    }
}
