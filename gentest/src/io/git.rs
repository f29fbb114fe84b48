//! Git adapter for the version isolation steps.
//!
//! Every invocation goes through [`run_logged`], so the experiment log shows
//! each checkout, branch and commit together with git's own output.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::log_sink::LogSink;
use crate::io::process::{CommandRunner, CommandSpec, ExitPolicy, ProcessResult, run_logged};

/// Wrapper for executing git commands in a working directory.
pub struct Git<'a, R: CommandRunner + ?Sized> {
    workdir: PathBuf,
    runner: &'a R,
    log: &'a dyn LogSink,
}

impl<'a, R: CommandRunner + ?Sized> Git<'a, R> {
    pub fn new(workdir: impl Into<PathBuf>, runner: &'a R, log: &'a dyn LogSink) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
            log,
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let result = self.run(
            &[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ],
            ExitPolicy::Tolerate,
        )?;
        Ok(result.success())
    }

    /// Checkout `branch`, discarding local modifications to tracked files.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_force(&self, branch: &str) -> Result<()> {
        debug!(branch, "force checkout");
        self.run_checked(&["checkout", "-f", branch])?;
        Ok(())
    }

    /// Remove untracked files and directories below `pathspec` (ignored files are kept).
    #[instrument(skip_all, fields(pathspec = %pathspec.display()))]
    pub fn clean_untracked(&self, pathspec: &Path) -> Result<()> {
        debug!("removing untracked files");
        let pathspec = pathspec.to_string_lossy();
        self.run_checked(&["clean", "-fd", "--", pathspec.as_ref()])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Create `branch` at HEAD, resetting it if it already exists.
    #[instrument(skip_all, fields(branch))]
    pub fn force_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "force-creating branch");
        self.run_checked(&["branch", "-f", branch])?;
        Ok(())
    }

    /// Delete a local branch regardless of merge state.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Absolute path of the repository's metadata directory (`.git`).
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<ProcessResult> {
        self.run(args, ExitPolicy::Fatal)
    }

    fn run(&self, args: &[&str], policy: ExitPolicy) -> Result<ProcessResult> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("git".to_string());
        argv.extend(args.iter().map(|arg| arg.to_string()));
        let spec = CommandSpec::new(argv, &self.workdir);
        run_logged(self.runner, self.log, &spec, policy)
    }
}
