//! Generation surface: the buffer an external generator writes into.
//!
//! The [`GenerationSurface`] trait decouples the pipeline from the host that
//! actually produces tests. The pipeline opens a unit, triggers generation
//! into an artifact, samples the buffer until it settles, edits it and saves
//! it. Tests use a scripted surface; [`CommandSurface`] binds the trait to a
//! generator process that streams into the artifact file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::template::render_command;
use crate::error::NoActiveBufferError;

/// Host capability driven by the pipeline.
pub trait GenerationSurface {
    /// Open the unit the generator should work on.
    fn open(&mut self, unit: &Path) -> Result<()>;

    /// Start generation for the opened unit. The artifact becomes the active buffer.
    fn trigger(&mut self, artifact: &Path) -> Result<()>;

    /// Text of the active buffer, or `None` when no buffer is active.
    fn current_text(&self) -> Result<Option<String>>;

    /// Replace the active buffer's text with `transform(text)`.
    fn edit(&mut self, transform: &dyn Fn(&str) -> String) -> Result<()>;

    /// Persist the active buffer.
    fn save(&mut self) -> Result<()>;
}

#[derive(Debug)]
struct ActiveBuffer {
    path: PathBuf,
    pending: Option<String>,
}

/// Surface backed by a generator process writing the artifact file.
///
/// With `capture_stdout`, the generator's stdout is redirected into the
/// artifact; otherwise the generator is expected to write `{output}` itself.
#[derive(Debug)]
pub struct CommandSurface {
    workdir: PathBuf,
    command: Vec<String>,
    capture_stdout: bool,
    opened: Option<PathBuf>,
    active: Option<ActiveBuffer>,
    child: Option<Child>,
}

impl CommandSurface {
    pub fn new(workdir: impl Into<PathBuf>, command: Vec<String>, capture_stdout: bool) -> Self {
        Self {
            workdir: workdir.into(),
            command,
            capture_stdout,
            opened: None,
            active: None,
            child: None,
        }
    }

    fn stop_generator(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait().context("poll generator")? {
            Some(status) => {
                debug!(exit_code = ?status.code(), "generator already exited");
            }
            None => {
                warn!("generator still running, killing");
                child.kill().context("kill generator")?;
                child.wait().context("wait generator after kill")?;
            }
        }
        Ok(())
    }

    fn active(&self) -> Result<&ActiveBuffer> {
        self.active
            .as_ref()
            .ok_or_else(|| anyhow::Error::new(NoActiveBufferError))
    }
}

impl GenerationSurface for CommandSurface {
    #[instrument(skip_all, fields(unit = %unit.display()))]
    fn open(&mut self, unit: &Path) -> Result<()> {
        self.stop_generator()?;
        let path = self.workdir.join(unit);
        if !path.is_file() {
            return Err(anyhow!("open {}: no such file", path.display()));
        }
        self.opened = Some(path);
        self.active = None;
        Ok(())
    }

    #[instrument(skip_all, fields(artifact = %artifact.display()))]
    fn trigger(&mut self, artifact: &Path) -> Result<()> {
        let unit = self
            .opened
            .clone()
            .ok_or_else(|| anyhow!("trigger generation: no unit opened"))?;
        self.stop_generator()?;

        let output = self.workdir.join(artifact);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create artifact dir {}", parent.display()))?;
        }
        let unit_arg = unit.to_string_lossy();
        let output_arg = output.to_string_lossy();
        let argv = render_command(
            &self.command,
            &[("unit", unit_arg.as_ref()), ("output", output_arg.as_ref())],
        );
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty generator command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        if self.capture_stdout {
            let file = File::create(&output)
                .with_context(|| format!("create artifact {}", output.display()))?;
            cmd.stdout(Stdio::from(file));
        } else {
            cmd.stdout(Stdio::null());
        }

        info!(program = %program, "starting generator");
        let child = cmd
            .spawn()
            .with_context(|| format!("spawn generator {program}"))?;
        self.child = Some(child);
        self.active = Some(ActiveBuffer {
            path: output,
            pending: None,
        });
        Ok(())
    }

    fn current_text(&self) -> Result<Option<String>> {
        let Some(active) = &self.active else {
            return Ok(None);
        };
        if let Some(text) = &active.pending {
            return Ok(Some(text.clone()));
        }
        match fs::read(&active.path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Some(String::new())),
            Err(err) => Err(err).with_context(|| format!("read {}", active.path.display())),
        }
    }

    fn edit(&mut self, transform: &dyn Fn(&str) -> String) -> Result<()> {
        self.active()?;
        let text = self.current_text()?.unwrap_or_default();
        let edited = transform(&text);
        if let Some(active) = self.active.as_mut() {
            active.pending = Some(edited);
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn save(&mut self) -> Result<()> {
        self.active()?;
        self.stop_generator()?;
        let Some(active) = self.active.as_mut() else {
            return Err(NoActiveBufferError.into());
        };
        if let Some(text) = active.pending.take() {
            fs::write(&active.path, text)
                .with_context(|| format!("save {}", active.path.display()))?;
        } else if !active.path.exists() {
            fs::write(&active.path, "")
                .with_context(|| format!("save {}", active.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for CommandSurface {
    fn drop(&mut self) {
        if let Err(err) = self.stop_generator() {
            warn!(err = %err, "failed to stop generator");
        }
    }
}
