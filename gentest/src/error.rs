//! Typed errors for conditions callers branch on.
//!
//! Everything else travels as `anyhow::Error`; these types are attached to
//! that chain and recovered with `downcast_ref`.

use std::path::PathBuf;

/// The generation surface has no active buffer to sample or edit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no active editor")]
pub struct NoActiveBufferError;

/// A unit or artifact path has no final file-name component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot derive unit name from '{}'", .path.display())]
pub struct MissingUnitNameError {
    pub path: PathBuf,
}

/// A command run with the fatal exit policy did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{command}` failed with exit code {exit_code:?}{}", timed_out_suffix(.timed_out))]
pub struct CommandFailedError {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stderr: String,
}

fn timed_out_suffix(timed_out: &bool) -> &'static str {
    if *timed_out { " (timed out)" } else { "" }
}

/// Forcing the working tree back to the baseline failed.
///
/// This is the one failure the pipeline cannot recover from: every later
/// candidate would start from an unknown tree.
#[derive(Debug, thiserror::Error)]
#[error("failed to restore baseline '{baseline}'")]
pub struct BaselineRestoreError {
    pub baseline: String,
    #[source]
    pub source: anyhow::Error,
}
