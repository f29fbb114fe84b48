//! Scripted collaborators for pipeline tests.
//!
//! - [`ScriptedSurface`]: replays buffer samples per unit instead of running a generator.
//! - [`FakeClock`]: advances virtual time on `sleep` and records every sleep.
//! - [`RecordingRunner`]: runs real processes and records each argv.
//! - [`MemoryLogSink`]: keeps log lines in memory, without timestamps.
//! - [`TestRepo`]: temp git repository with a committed `baseline` branch.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::naming::unit_name;
use crate::error::NoActiveBufferError;
use crate::io::log_sink::LogSink;
use crate::io::process::{CommandRunner, CommandSpec, ProcessResult, SystemRunner};
use crate::io::surface::GenerationSurface;
use crate::stabilize::Clock;

/// In-memory log sink.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, line: &str) -> Result<()> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| anyhow!("memory log lock poisoned"))?;
        lines.extend(line.split('\n').map(str::to_string));
        Ok(())
    }
}

/// Buffer samples for one unit. `None` means no active buffer at that sample.
pub type Script = Vec<Option<String>>;

/// Surface that replays scripted buffer samples.
///
/// Each `current_text` call returns the next sample of the script selected by
/// the opened unit's file name (or the default script); the last sample
/// repeats once the script is exhausted. `save` writes the buffer to the
/// artifact path under `root`, when one is set.
#[derive(Debug, Default)]
pub struct ScriptedSurface {
    root: Option<PathBuf>,
    scripts: HashMap<String, Script>,
    default_script: Script,
    current: Script,
    cursor: Cell<usize>,
    last: RefCell<Option<String>>,
    pending: Option<String>,
    artifact: Option<PathBuf>,
    events: Vec<String>,
}

impl ScriptedSurface {
    /// Surface that saves artifacts under `root`.
    pub fn in_dir(root: &Path) -> Self {
        Self {
            root: Some(root.to_path_buf()),
            ..Self::default()
        }
    }

    /// Detached surface replaying `texts` (no open/trigger needed).
    pub fn with_texts(texts: Vec<String>) -> Self {
        let script: Script = texts.into_iter().map(Some).collect();
        Self {
            default_script: script.clone(),
            current: script,
            ..Self::default()
        }
    }

    /// Detached surface that never has an active buffer.
    pub fn without_buffer() -> Self {
        Self {
            default_script: vec![None],
            current: vec![None],
            ..Self::default()
        }
    }

    /// Script the samples for the unit named `unit_name` (e.g. `Foo.java`).
    pub fn script(mut self, unit_name: &str, texts: &[&str]) -> Self {
        let script = texts.iter().map(|t| Some(t.to_string())).collect();
        self.scripts.insert(unit_name.to_string(), script);
        self
    }

    /// Unit named `unit_name` never gets an active buffer.
    pub fn script_no_buffer(mut self, unit_name: &str) -> Self {
        self.scripts.insert(unit_name.to_string(), vec![None]);
        self
    }

    /// Samples taken since the last `open`.
    pub fn samples_taken(&self) -> usize {
        self.cursor.get()
    }

    /// `open <unit>`, `trigger <artifact>`, `edit`, `save <artifact>` in call order.
    pub fn events(&self) -> &[String] {
        &self.events
    }
}

impl GenerationSurface for ScriptedSurface {
    fn open(&mut self, unit: &Path) -> Result<()> {
        let name = unit_name(unit)?;
        self.current = self
            .scripts
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        self.cursor.set(0);
        self.last.replace(None);
        self.pending = None;
        self.artifact = None;
        self.events.push(format!("open {}", unit.display()));
        Ok(())
    }

    fn trigger(&mut self, artifact: &Path) -> Result<()> {
        self.artifact = Some(artifact.to_path_buf());
        self.events.push(format!("trigger {}", artifact.display()));
        Ok(())
    }

    fn current_text(&self) -> Result<Option<String>> {
        if let Some(text) = &self.pending {
            return Ok(Some(text.clone()));
        }
        let Some(last_index) = self.current.len().checked_sub(1) else {
            return Ok(None);
        };
        let index = self.cursor.get().min(last_index);
        self.cursor.set(self.cursor.get() + 1);
        let sample = self.current[index].clone();
        self.last.replace(sample.clone());
        Ok(sample)
    }

    fn edit(&mut self, transform: &dyn Fn(&str) -> String) -> Result<()> {
        let base = match &self.pending {
            Some(text) => text.clone(),
            None => self.last.borrow().clone().ok_or(NoActiveBufferError)?,
        };
        self.pending = Some(transform(&base));
        self.events.push("edit".to_string());
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let artifact = self.artifact.clone().ok_or(NoActiveBufferError)?;
        let text = match self.pending.take() {
            Some(text) => text,
            None => self.last.borrow().clone().unwrap_or_default(),
        };
        if let Some(root) = &self.root {
            let path = root.join(&artifact);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&path, &text).with_context(|| format!("write {}", path.display()))?;
        }
        self.last.replace(Some(text));
        self.events.push(format!("save {}", artifact.display()));
        Ok(())
    }
}

/// Virtual clock: `sleep` advances `now` instantly.
#[derive(Debug)]
pub struct FakeClock {
    base: Instant,
    offset: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
        self.sleeps.borrow_mut().push(duration);
    }
}

/// Runner used by unit tests: 30 s timeout, 64 KiB output limit.
pub fn system_runner() -> SystemRunner {
    SystemRunner::new(Duration::from_secs(30), 64 * 1024)
}

/// Real process runner that records every argv it executes.
#[derive(Debug)]
pub struct RecordingRunner {
    inner: SystemRunner,
    calls: RefCell<Vec<Vec<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            inner: system_runner(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    /// Recorded calls whose argv starts with `prefix`.
    pub fn calls_starting_with(&self, prefix: &[&str]) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| {
                argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
            })
            .collect()
    }
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for RecordingRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessResult> {
        self.calls.borrow_mut().push(spec.argv.clone());
        self.inner.execute(spec)
    }
}

/// Temporary git repository whose initial commit lives on `baseline`.
///
/// The repository contains `README.md` (`hi\n`) and `.gitignore`.
#[derive(Debug)]
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/baseline"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "Test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "hi\n")?;
        repo.write_file(".gitignore", "target/\n")?;
        repo.commit_all("init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_file(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage everything and commit on the current branch.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Run git in the repository and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Files changed by the tip commit of `branch`.
    pub fn files_in_commit(&self, branch: &str) -> Result<Vec<String>> {
        let out = self.git(&["show", "--name-only", "--pretty=format:", branch])?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Contents of `rel` at `branch`.
    pub fn show_file(&self, branch: &str, rel: &str) -> Result<String> {
        self.git(&["show", &format!("{branch}:{rel}")])
    }
}
