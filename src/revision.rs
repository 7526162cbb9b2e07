//! Revision control for the linter checkout under comparison.
//!
//! The checkout is one mutable, process-wide resource. A
//! [`RevisionController`] leases it for the duration of a run, captures the
//! ref it started on, and puts it back on every exit path: normal return,
//! error, panic unwinding, and (via the interrupt flag checked by the
//! pipeline) Ctrl-C.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::error::CompareError;

/// A revision of the linter to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    /// A local branch or any other ref `git checkout` accepts.
    Branch(String),
    /// A pull request, fetched from the remote as `pull/<N>/head`.
    PullRequest(u64),
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Branch(name) => f.write_str(name),
            Revision::PullRequest(number) => write!(f, "pr-{number}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RevisionRole {
    Baseline,
    Candidate,
}

/// Tag attached to every finding produced under a revision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RevisionLabel {
    pub role: RevisionRole,
    pub id: String,
}

impl RevisionLabel {
    pub fn new(role: RevisionRole, revision: &Revision) -> Self {
        Self {
            role,
            id: revision.to_string(),
        }
    }
}

impl fmt::Display for RevisionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Version-control operations the controller needs.
pub trait VersionControl {
    /// Stable identity of the checkout, used for the exclusive lease.
    fn location(&self) -> String;
    /// Branch name, or commit id when detached.
    fn current_ref(&self) -> Result<String>;
    /// True when tracked files have no uncommitted changes.
    fn is_clean(&self) -> Result<bool>;
    fn checkout(&self, reference: &str) -> Result<()>;
    fn fetch_and_checkout(&self, proposal: u64) -> Result<()>;
}

/// A git work tree driven through the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    repo: PathBuf,
    remote: String,
}

impl GitCheckout {
    pub fn new(repo: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .with_context(|| format!("failed to run git in {}", self.repo.display()))
    }

    fn git_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VersionControl for GitCheckout {
    fn location(&self) -> String {
        self.repo
            .canonicalize()
            .unwrap_or_else(|_| self.repo.clone())
            .display()
            .to_string()
    }

    fn current_ref(&self) -> Result<String> {
        let branch = self.git(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if branch.status.success() {
            let name = String::from_utf8_lossy(&branch.stdout).trim().to_string();
            if !name.is_empty() {
                return Ok(name);
            }
        }
        let sha = self.git_ok(&["rev-parse", "HEAD"])?;
        if sha.is_empty() {
            anyhow::bail!("git rev-parse HEAD returned empty output");
        }
        Ok(sha)
    }

    fn is_clean(&self) -> Result<bool> {
        let status = self.git_ok(&["status", "--porcelain", "--untracked-files=no"])?;
        Ok(status.is_empty())
    }

    fn checkout(&self, reference: &str) -> Result<()> {
        self.git_ok(&["checkout", "--quiet", reference])?;
        Ok(())
    }

    fn fetch_and_checkout(&self, proposal: u64) -> Result<()> {
        let refspec = format!("pull/{proposal}/head");
        self.git_ok(&["fetch", "--quiet", &self.remote, &refspec])?;
        self.git_ok(&["checkout", "--quiet", "--detach", "FETCH_HEAD"])?;
        Ok(())
    }
}

/// Checkouts currently leased by a controller in this process.
static LEASED: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionState {
    Original,
    Switched,
    Restoring,
}

pub struct RevisionController<'a> {
    vcs: &'a dyn VersionControl,
    lease: String,
    original: String,
    state: RevisionState,
}

impl<'a> RevisionController<'a> {
    /// Take the exclusive lease on `vcs` and remember where it started.
    /// Fails if another controller holds it or the work tree is dirty.
    pub fn acquire(vcs: &'a dyn VersionControl) -> Result<Self, CompareError> {
        let lease = vcs.location();
        let mut leased = LEASED.lock().unwrap_or_else(|e| e.into_inner());
        if leased.contains(&lease) {
            return Err(CompareError::RevisionSwitch(format!(
                "checkout {lease} is already held by another comparison"
            )));
        }

        let clean = vcs
            .is_clean()
            .map_err(|e| CompareError::RevisionSwitch(format!("{e:#}")))?;
        if !clean {
            return Err(CompareError::RevisionSwitch(format!(
                "checkout {lease} has uncommitted changes; commit or stash them first"
            )));
        }
        let original = vcs
            .current_ref()
            .map_err(|e| CompareError::RevisionSwitch(format!("{e:#}")))?;

        leased.insert(lease.clone());
        tracing::debug!(checkout = %lease, original = %original, "acquired checkout");
        Ok(Self {
            vcs,
            lease,
            original,
            state: RevisionState::Original,
        })
    }

    pub fn original_ref(&self) -> &str {
        &self.original
    }

    pub fn state(&self) -> RevisionState {
        self.state
    }

    /// Check out `revision`. On failure the original ref is restored before
    /// the error is returned.
    pub fn switch_to(&mut self, revision: &Revision) -> Result<(), CompareError> {
        self.state = RevisionState::Switched;
        tracing::info!(revision = %revision, "checking out");
        let switched = match revision {
            Revision::Branch(name) => self.vcs.checkout(name),
            Revision::PullRequest(number) => self.vcs.fetch_and_checkout(*number),
        };
        if let Err(e) = switched {
            let err = CompareError::RevisionSwitch(format!("cannot check out {revision}: {e:#}"));
            if let Err(restore_err) = self.restore() {
                tracing::error!(error = %restore_err, "restoring after failed switch");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Return the checkout to the ref captured at acquisition.
    pub fn restore(&mut self) -> Result<(), CompareError> {
        if self.state == RevisionState::Original {
            return Ok(());
        }
        self.state = RevisionState::Restoring;
        self.vcs.checkout(&self.original).map_err(|e| {
            CompareError::RevisionSwitch(format!("cannot restore {}: {e:#}", self.original))
        })?;
        self.state = RevisionState::Original;
        tracing::info!(revision = %self.original, "restored checkout");
        Ok(())
    }

    /// Switch to `revision`, run `body`, and restore, whatever `body` returns.
    /// A body error takes precedence over a restore error.
    pub fn with_revision<T>(
        &mut self,
        revision: &Revision,
        body: impl FnOnce() -> Result<T, CompareError>,
    ) -> Result<T, CompareError> {
        self.switch_to(revision)?;
        let result = body();
        let restored = self.restore();
        match (result, restored) {
            (Err(e), Err(restore_err)) => {
                tracing::error!(error = %restore_err, "restoring after failed pass");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}

impl Drop for RevisionController<'_> {
    fn drop(&mut self) {
        match self.state {
            RevisionState::Switched => {
                if let Err(e) = self.restore() {
                    tracing::error!(error = %e, "checkout left on a switched revision");
                }
            }
            RevisionState::Restoring => {
                tracing::error!(
                    original = %self.original,
                    "checkout restoration did not complete; check out the original ref by hand"
                );
            }
            RevisionState::Original => {}
        }
        let mut leased = LEASED.lock().unwrap_or_else(|e| e.into_inner());
        leased.remove(&self.lease);
    }
}
