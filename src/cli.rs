use std::path::PathBuf;

use clap::Parser;

use crate::corpus::{CorpusSpec, Sampling};
use crate::error::CompareError;
use crate::revision::Revision;

#[derive(Parser, Debug)]
#[command(
    name = "lintcompare",
    version,
    about = "Compare linter output between a baseline and a candidate revision over a corpus of packages"
)]
pub struct Args {
    /// Rules to run (comma-separated). Defaults to the configured default rules.
    #[arg(long, value_delimiter = ',')]
    pub rules: Vec<String>,

    /// Candidate branch to compare against the base branch
    #[arg(long, value_name = "NAME")]
    pub branch: Option<String>,

    /// Candidate pull request number, fetched from the remote
    #[arg(long = "pr", value_name = "N")]
    pub pull_request: Option<u64>,

    /// Packages to lint: directories or `<name>_<version>.tar.gz` archives (comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "PATHS")]
    pub packages: Vec<PathBuf>,

    /// Directory whose entries are the packages to lint
    #[arg(long, value_name = "DIR")]
    pub package_dir: Option<PathBuf>,

    /// Lint a uniform random sample of this many packages
    #[arg(long, value_name = "N")]
    pub sample_size: Option<usize>,

    /// Seed for --sample-size, for a reproducible sample
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Output CSV path [default: ~/lintcompare_<timestamp>.csv]
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Baseline branch
    #[arg(long, default_value = "main", value_name = "NAME")]
    pub base_branch: String,

    /// Checkout of the linter whose revisions are compared
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub repo: PathBuf,

    /// Remote to fetch pull requests from
    #[arg(long, default_value = "origin", value_name = "NAME")]
    pub remote: String,

    /// Command that lints one package and prints a JSON array of findings.
    /// Invoked from the checkout as `<CMD> --rule <RULE> <PACKAGE_DIR>`.
    #[arg(long, value_name = "CMD", default_value = "Rscript tools/lint_json.R")]
    pub analyzer_cmd: String,

    /// Path to configuration file [default: <repo>/.lintcompare.yml]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List all registered rules, one per line, then exit
    #[arg(long)]
    pub list_rules: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// The candidate revision. Exactly one of `--branch` and `--pr` must be given.
    pub fn candidate(&self) -> Result<Revision, CompareError> {
        match (&self.branch, self.pull_request) {
            (Some(_), Some(_)) => Err(CompareError::config(
                "--branch and --pr are mutually exclusive; supply exactly one",
            )),
            (None, None) => Err(CompareError::config(
                "one of --branch or --pr is required",
            )),
            (Some(branch), None) => Ok(Revision::Branch(branch.clone())),
            (None, Some(number)) => Ok(Revision::PullRequest(number)),
        }
    }

    pub fn baseline(&self) -> Revision {
        Revision::Branch(self.base_branch.clone())
    }

    /// Baseline and candidate, which must carry different `source` labels.
    pub fn revisions(&self) -> Result<(Revision, Revision), CompareError> {
        let baseline = self.baseline();
        let candidate = self.candidate()?;
        if baseline.to_string() == candidate.to_string() {
            return Err(CompareError::config(format!(
                "baseline and candidate are both '{baseline}'; pick a different --base-branch"
            )));
        }
        Ok((baseline, candidate))
    }

    /// Where the corpus comes from. Exactly one of `--packages` and
    /// `--package-dir` must be given.
    pub fn corpus_spec(&self) -> Result<CorpusSpec, CompareError> {
        CorpusSpec::from_options(self.packages.clone(), self.package_dir.clone())
    }

    pub fn sampling(&self) -> Option<Sampling> {
        self.sample_size.map(|size| Sampling {
            size,
            seed: self.seed,
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(default_output_path)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.repo.join(".lintcompare.yml"))
    }
}

/// `$HOME/lintcompare_<YYYYmmdd_HHMMSS>.csv`, falling back to the working
/// directory when `HOME` is unset.
pub fn default_output_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_name = format!("lintcompare_{stamp}.csv");
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(file_name),
        None => PathBuf::from(file_name),
    }
}
