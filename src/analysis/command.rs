use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use super::registry::RuleSpec;
use super::{Analyzer, RawFinding};

/// Runs an external lint command per (package, rule):
/// `<program> <args..> --rule <RULE> <PACKAGE_DIR>`, from the linter checkout
/// so the revision currently checked out is the one that runs.
///
/// Exit 0 means clean and 1 means findings were reported; anything else is a
/// crash. Stdout must be a JSON array of findings.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
}

impl CommandAnalyzer {
    /// Split a whitespace-separated command line such as
    /// `Rscript tools/lint_json.R`.
    pub fn from_command_line(command: &str, workdir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let Some(program) = parts.next() else {
            anyhow::bail!("--analyzer-cmd is empty");
        };
        Ok(Self {
            program,
            args: parts.collect(),
            workdir: workdir.into(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Analyzer for CommandAnalyzer {
    fn run(&self, target_dir: &Path, rule: &RuleSpec) -> Result<Vec<RawFinding>> {
        // The child runs from `workdir`, so a relative package path would
        // resolve against the wrong directory.
        let target_dir = std::path::absolute(target_dir)
            .with_context(|| format!("cannot resolve {}", target_dir.display()))?;
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--rule")
            .arg(rule.name())
            .arg(&target_dir)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("failed to execute '{}'", self.program))?;

        let code = output.status.code().unwrap_or(127);
        if code >= 2 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with code {} (expected 0 or 1): {}",
                self.program,
                code,
                stderr.trim()
            );
        }

        parse_findings(&output.stdout)
            .with_context(|| format!("failed to parse {} output", self.program))
    }
}

/// Parse analyzer stdout. Blank output means no findings.
pub fn parse_findings(stdout: &[u8]) -> Result<Vec<RawFinding>> {
    let text = std::str::from_utf8(stdout).context("analyzer output was not valid UTF-8")?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_command_line() {
        let a = CommandAnalyzer::from_command_line("Rscript  --vanilla tools/lint.R", ".").unwrap();
        assert_eq!(a.program(), "Rscript");
        assert_eq!(a.args, vec!["--vanilla", "tools/lint.R"]);
    }

    #[test]
    fn empty_command_line_errors() {
        assert!(CommandAnalyzer::from_command_line("   ", ".").is_err());
    }

    #[test]
    fn blank_output_is_no_findings() {
        assert!(parse_findings(b"\n").unwrap().is_empty());
        assert!(parse_findings(b"[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_output_errors() {
        assert!(parse_findings(b"Error in loadNamespace(x)").is_err());
    }

    #[test]
    fn missing_program_errors() {
        let a = CommandAnalyzer::from_command_line("definitely-not-a-real-linter-binary", ".")
            .unwrap();
        let rule = RuleSpec::new("quotes_linter", false);
        assert!(a.run(Path::new("."), &rule).is_err());
    }

    #[cfg(unix)]
    mod script {
        use super::*;

        /// Command line running `body` as a shell script.
        fn write_script(dir: &Path, body: &str) -> String {
            let path = dir.join("fake_lint.sh");
            std::fs::write(&path, format!("{body}\n")).unwrap();
            format!("sh {}", path.display())
        }

        #[test]
        fn passes_rule_and_target_and_parses_json() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(
                dir.path(),
                r#"echo "[{\"line_number\": 1, \"type\": \"style\", \"message\": \"$2\", \"dir\": \"$3\"}]"
exit 1"#,
            );
            let a = CommandAnalyzer::from_command_line(&script, dir.path()).unwrap();
            let rule = RuleSpec::new("quotes_linter", false);
            let findings = a.run(Path::new("/corpus/pkgA"), &rule).unwrap();
            assert_eq!(findings.len(), 1);
            assert_eq!(findings[0].message, "quotes_linter");
            assert_eq!(findings[0].extra["dir"], "/corpus/pkgA");
        }

        #[test]
        fn relative_target_dir_is_resolved_before_changing_directory() {
            let workdir = tempfile::tempdir().unwrap();
            let corpus = tempfile::tempdir_in(".").unwrap();
            std::fs::create_dir_all(corpus.path().join("pkgA")).unwrap();
            std::fs::write(corpus.path().join("pkgA/DESCRIPTION"), "Package: pkgA\n").unwrap();

            let script = write_script(
                workdir.path(),
                r#"test -f "$3/DESCRIPTION" || { echo "no package at $3 from $(pwd)" >&2; exit 2; }
echo '[]'"#,
            );
            let a = CommandAnalyzer::from_command_line(&script, workdir.path()).unwrap();
            let rule = RuleSpec::new("quotes_linter", false);
            let relative = corpus.path().join("pkgA");
            assert!(relative.is_relative());
            assert!(a.run(&relative, &rule).unwrap().is_empty());
        }

        #[test]
        fn exit_code_two_is_a_crash() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(dir.path(), "echo 'there is no package called foo' >&2\nexit 2");
            let a = CommandAnalyzer::from_command_line(&script, dir.path()).unwrap();
            let rule = RuleSpec::new("object_usage_linter", true);
            let err = a.run(Path::new("/corpus/pkgA"), &rule).unwrap_err();
            assert!(format!("{err:#}").contains("no package called foo"));
        }
    }
}
