//! The comparison driver: one pass per revision over the same packages and
//! rules, collecting findings and skips into a single [`Report`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::analysis::registry::RuleSpec;
use crate::analysis::{Analyzer, analyze_target};
use crate::corpus::Target;
use crate::error::CompareError;
use crate::probe::{Prober, SkipReason};
use crate::report::{Report, SkipOutcome};
use crate::revision::{Revision, RevisionController, RevisionLabel, RevisionRole};
use crate::stage::stage;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Route Ctrl-C to a flag the pipeline polls between packages, so the
/// checkout is restored by the normal unwinding path.
pub fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
}

/// The process-wide flag set by the Ctrl-C handler.
pub fn interrupt_flag() -> &'static AtomicBool {
    &INTERRUPTED
}

pub struct Comparison<'a> {
    targets: &'a [Target],
    rules: &'a [RuleSpec],
    analyzer: &'a dyn Analyzer,
    prober: &'a Prober<'a>,
    interrupted: &'a AtomicBool,
}

impl<'a> Comparison<'a> {
    pub fn new(
        targets: &'a [Target],
        rules: &'a [RuleSpec],
        analyzer: &'a dyn Analyzer,
        prober: &'a Prober<'a>,
    ) -> Self {
        Self {
            targets,
            rules,
            analyzer,
            prober,
            interrupted: interrupt_flag(),
        }
    }

    /// Poll `flag` instead of the process-wide Ctrl-C flag.
    pub fn with_interrupt_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupted = flag;
        self
    }

    /// Analyze every package under `baseline`, then under `candidate`. The
    /// checkout is back on its original ref when this returns, whether it
    /// returns `Ok` or `Err`.
    pub fn run(
        &self,
        controller: &mut RevisionController<'_>,
        baseline: &Revision,
        candidate: &Revision,
    ) -> Result<Report, CompareError> {
        let mut report = Report::new();
        for (role, revision) in [
            (RevisionRole::Baseline, baseline),
            (RevisionRole::Candidate, candidate),
        ] {
            let label = RevisionLabel::new(role, revision);
            controller.with_revision(revision, || self.run_pass(&label, &mut report))?;
        }
        Ok(report)
    }

    fn run_pass(&self, label: &RevisionLabel, report: &mut Report) -> Result<(), CompareError> {
        let start = Instant::now();
        let before = report.records().len();
        let dependency_sensitive = self.rules.iter().any(RuleSpec::dependency_sensitive);

        for target in self.targets {
            self.check_interrupted()?;
            tracing::debug!(revision = %label, package = %target, "analyzing");

            let staged = match stage(target) {
                Ok(staged) => staged,
                Err(e) => {
                    self.skip(report, label, target, SkipReason::Staging(e.to_string()));
                    continue;
                }
            };

            if let Err(reason) = self.prober.probe(staged.root(), dependency_sensitive) {
                self.skip(report, label, target, reason);
                continue;
            }

            for rule in self.rules {
                let analyzed =
                    analyze_target(self.analyzer, staged.root(), &target.name, rule, label);
                // Ctrl-C also reaches the analyzer child, so a crash seen after
                // the flag is set is the interruption, not the package.
                self.check_interrupted()?;
                match analyzed {
                    Ok(records) => report.extend(records),
                    Err(reason) => self.skip(report, label, target, reason),
                }
            }
        }
        self.check_interrupted()?;

        tracing::info!(
            revision = %label,
            findings = report.records().len() - before,
            "pass finished in {:.1?}",
            start.elapsed()
        );
        Ok(())
    }

    fn check_interrupted(&self) -> Result<(), CompareError> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(CompareError::Interrupted);
        }
        Ok(())
    }

    fn skip(&self, report: &mut Report, label: &RevisionLabel, target: &Target, reason: SkipReason) {
        report.record_skip(SkipOutcome {
            revision: label.clone(),
            target: target.name.clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RawFinding;
    use crate::env::{Capabilities, DependencyEnvironment};
    use crate::revision::VersionControl;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    static NEXT_FAKE: AtomicUsize = AtomicUsize::new(0);

    struct FakeVcs {
        id: usize,
        head: RefCell<String>,
    }

    impl FakeVcs {
        fn new() -> Self {
            Self {
                id: NEXT_FAKE.fetch_add(1, Ordering::Relaxed),
                head: RefCell::new("dev".to_string()),
            }
        }
    }

    impl VersionControl for FakeVcs {
        fn location(&self) -> String {
            format!("pipeline-fake-{}", self.id)
        }
        fn current_ref(&self) -> anyhow::Result<String> {
            Ok(self.head.borrow().clone())
        }
        fn is_clean(&self) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn checkout(&self, reference: &str) -> anyhow::Result<()> {
            *self.head.borrow_mut() = reference.to_string();
            Ok(())
        }
        fn fetch_and_checkout(&self, proposal: u64) -> anyhow::Result<()> {
            *self.head.borrow_mut() = format!("pr-{proposal}");
            Ok(())
        }
    }

    /// Reports one finding per call, tagged with the head it ran under.
    struct HeadAnalyzer<'a> {
        vcs: &'a FakeVcs,
        crash_on: Option<&'static str>,
        interrupt_after_first: Option<&'a AtomicBool>,
    }

    impl Analyzer for HeadAnalyzer<'_> {
        fn run(&self, target_dir: &Path, rule: &RuleSpec) -> anyhow::Result<Vec<RawFinding>> {
            if let Some(flag) = self.interrupt_after_first {
                flag.store(true, Ordering::SeqCst);
            }
            if self.crash_on == Some(rule.name()) {
                anyhow::bail!("linter exited with code 2");
            }
            let mut extra = BTreeMap::new();
            extra.insert(
                "head".to_string(),
                serde_json::Value::String(self.vcs.head.borrow().clone()),
            );
            extra.insert(
                "filename".to_string(),
                serde_json::Value::String(target_dir.join("R/a.R").display().to_string()),
            );
            Ok(vec![RawFinding {
                line_number: 1,
                column_number: 1,
                kind: "style".to_string(),
                message: rule.name().to_string(),
                line: None,
                ranges: Vec::new(),
                extra,
            }])
        }
    }

    struct NoDependencies;

    impl DependencyEnvironment for NoDependencies {
        fn resolve(&self, names: &[String]) -> Result<(), Vec<String>> {
            if names.is_empty() { Ok(()) } else { Err(names.to_vec()) }
        }
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn prober(env: &NoDependencies) -> Prober<'_> {
        Prober::new(
            &strings(&["*.R", "DESCRIPTION"]),
            strings(&["DESCRIPTION"]),
            strings(&["Imports"]),
            Capabilities::default(),
            env,
        )
        .unwrap()
    }

    fn package(root: &Path, name: &str, description: &str) -> Target {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("R")).unwrap();
        std::fs::write(dir.join("DESCRIPTION"), description).unwrap();
        std::fs::write(dir.join("R/a.R"), "f <- function() 1\n").unwrap();
        Target::directory(name, dir)
    }

    #[test]
    fn both_passes_are_labeled_and_restored() {
        let corpus = tempfile::tempdir().unwrap();
        let targets = vec![
            package(corpus.path(), "pkgA", "Package: pkgA\n"),
            package(corpus.path(), "pkgB", "Package: pkgB\n"),
        ];
        let rules = vec![RuleSpec::new("quotes_linter", false)];
        let vcs = FakeVcs::new();
        let analyzer = HeadAnalyzer { vcs: &vcs, crash_on: None, interrupt_after_first: None };
        let env = NoDependencies;
        let prober = prober(&env);
        let flag = AtomicBool::new(false);

        let mut controller = RevisionController::acquire(&vcs).unwrap();
        let report = Comparison::new(&targets, &rules, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(
                &mut controller,
                &Revision::Branch("main".into()),
                &Revision::PullRequest(12),
            )
            .unwrap();

        assert_eq!(report.records().len(), 4);
        for record in report.records() {
            assert_eq!(record.extra["head"], record.revision.id);
            assert_eq!(record.extra["filename"], "R/a.R");
        }
        let sources: Vec<&str> = report.records().iter().map(|r| r.revision.id.as_str()).collect();
        assert_eq!(sources, vec!["main", "main", "pr-12", "pr-12"]);
        assert!(report.skips().is_empty());
        assert_eq!(*vcs.head.borrow(), "dev");
    }

    #[test]
    fn unresolved_dependency_only_matters_for_sensitive_rules() {
        let corpus = tempfile::tempdir().unwrap();
        let targets = vec![package(corpus.path(), "pkgA", "Package: pkgA\nImports: foo\n")];
        let vcs = FakeVcs::new();
        let analyzer = HeadAnalyzer { vcs: &vcs, crash_on: None, interrupt_after_first: None };
        let env = NoDependencies;
        let prober = prober(&env);
        let flag = AtomicBool::new(false);
        let base = Revision::Branch("main".into());
        let cand = Revision::Branch("next".into());

        let insensitive = vec![RuleSpec::new("quotes_linter", false)];
        let mut controller = RevisionController::acquire(&vcs).unwrap();
        let report = Comparison::new(&targets, &insensitive, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(&mut controller, &base, &cand)
            .unwrap();
        assert_eq!(report.records().len(), 2);

        let sensitive = vec![RuleSpec::new("object_usage_linter", true)];
        let report = Comparison::new(&targets, &sensitive, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(&mut controller, &base, &cand)
            .unwrap();
        assert!(report.records().is_empty());
        assert_eq!(report.skips().len(), 2);
        assert_eq!(
            report.skips()[0].reason,
            SkipReason::UnresolvedDependency(vec!["foo".to_string()])
        );
    }

    #[test]
    fn crashed_rule_skips_only_that_rule() {
        let corpus = tempfile::tempdir().unwrap();
        let targets = vec![package(corpus.path(), "pkgA", "Package: pkgA\n")];
        let rules = vec![
            RuleSpec::new("quotes_linter", false),
            RuleSpec::new("brace_linter", false),
        ];
        let vcs = FakeVcs::new();
        let analyzer = HeadAnalyzer {
            vcs: &vcs,
            crash_on: Some("brace_linter"),
            interrupt_after_first: None,
        };
        let env = NoDependencies;
        let prober = prober(&env);
        let flag = AtomicBool::new(false);

        let mut controller = RevisionController::acquire(&vcs).unwrap();
        let report = Comparison::new(&targets, &rules, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(
                &mut controller,
                &Revision::Branch("main".into()),
                &Revision::Branch("next".into()),
            )
            .unwrap();
        assert_eq!(report.records().len(), 2);
        assert!(report.records().iter().all(|r| r.rule == "quotes_linter"));
        assert_eq!(report.skips().len(), 2);
    }

    #[test]
    fn unstageable_archive_is_skipped() {
        let corpus = tempfile::tempdir().unwrap();
        let archive = corpus.path().join("broken_1.0.tar.gz");
        std::fs::write(&archive, b"not gzip").unwrap();
        let targets = vec![Target {
            name: "broken".to_string(),
            location: archive,
            kind: crate::corpus::TargetKind::Archive,
        }];
        let rules = vec![RuleSpec::new("quotes_linter", false)];
        let vcs = FakeVcs::new();
        let analyzer = HeadAnalyzer { vcs: &vcs, crash_on: None, interrupt_after_first: None };
        let env = NoDependencies;
        let prober = prober(&env);
        let flag = AtomicBool::new(false);

        let mut controller = RevisionController::acquire(&vcs).unwrap();
        let report = Comparison::new(&targets, &rules, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(
                &mut controller,
                &Revision::Branch("main".into()),
                &Revision::Branch("next".into()),
            )
            .unwrap();
        assert!(report.records().is_empty());
        assert!(matches!(report.skips()[0].reason, SkipReason::Staging(_)));
    }

    /// Fails like a child process killed by SIGINT, raising the interrupt
    /// flag while the candidate pass analyzes `last`.
    struct KilledOnLastTarget<'a> {
        vcs: &'a FakeVcs,
        candidate: &'static str,
        last: &'static str,
        flag: &'a AtomicBool,
    }

    impl Analyzer for KilledOnLastTarget<'_> {
        fn run(&self, target_dir: &Path, _rule: &RuleSpec) -> anyhow::Result<Vec<RawFinding>> {
            if *self.vcs.head.borrow() == self.candidate && target_dir.ends_with(self.last) {
                self.flag.store(true, Ordering::SeqCst);
                anyhow::bail!("linter terminated by signal");
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn interrupt_during_last_candidate_target_is_not_a_skip() {
        let corpus = tempfile::tempdir().unwrap();
        let targets = vec![
            package(corpus.path(), "pkgA", "Package: pkgA\n"),
            package(corpus.path(), "pkgB", "Package: pkgB\n"),
        ];
        let rules = vec![RuleSpec::new("quotes_linter", false)];
        let vcs = FakeVcs::new();
        let flag = AtomicBool::new(false);
        let analyzer = KilledOnLastTarget {
            vcs: &vcs,
            candidate: "next",
            last: "pkgB",
            flag: &flag,
        };
        let env = NoDependencies;
        let prober = prober(&env);

        let mut controller = RevisionController::acquire(&vcs).unwrap();
        let result = Comparison::new(&targets, &rules, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(
                &mut controller,
                &Revision::Branch("main".into()),
                &Revision::Branch("next".into()),
            );
        assert!(matches!(result, Err(CompareError::Interrupted)));
        assert_eq!(*vcs.head.borrow(), "dev");
    }

    #[test]
    fn interrupt_stops_the_pass_and_restores() {
        let corpus = tempfile::tempdir().unwrap();
        let targets = vec![
            package(corpus.path(), "pkgA", "Package: pkgA\n"),
            package(corpus.path(), "pkgB", "Package: pkgB\n"),
        ];
        let rules = vec![RuleSpec::new("quotes_linter", false)];
        let vcs = FakeVcs::new();
        let flag = AtomicBool::new(false);
        let analyzer = HeadAnalyzer {
            vcs: &vcs,
            crash_on: None,
            interrupt_after_first: Some(&flag),
        };
        let env = NoDependencies;
        let prober = prober(&env);

        let mut controller = RevisionController::acquire(&vcs).unwrap();
        let result = Comparison::new(&targets, &rules, &analyzer, &prober)
            .with_interrupt_flag(&flag)
            .run(
                &mut controller,
                &Revision::Branch("main".into()),
                &Revision::Branch("next".into()),
            );
        assert!(matches!(result, Err(CompareError::Interrupted)));
        assert_eq!(*vcs.head.borrow(), "dev");
    }
}
