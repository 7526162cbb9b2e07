use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Anything that only affects one target is a
/// [`SkipReason`](crate::probe::SkipReason) instead and never surfaces here.
#[derive(Error, Debug)]
pub enum CompareError {
    /// Invalid or incomplete run configuration. Raised before any revision switch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The checkout could not be switched or restored.
    #[error("revision switch failed: {0}")]
    RevisionSwitch(String),

    /// Ctrl-C was received mid-pass.
    #[error("interrupted")]
    Interrupted,

    /// The dataset could not be written.
    #[error("failed to export dataset to {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl CompareError {
    pub fn config(msg: impl Into<String>) -> Self {
        CompareError::Configuration(msg.into())
    }

    /// Process exit code for this error: 2 for configuration problems, 3 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompareError::Configuration(_) => 2,
            _ => 3,
        }
    }
}
