//! Run folders, per-candidate reports, and run metadata.
//!
//! Layout of one run:
//!
//! ```text
//! {runs_root}/{epoch_millis}_{project}[_smallset]/
//!   experiment.log
//!   meta.json
//!   reports/{key}.report.txt
//!   git/            (archived copy of the repository metadata)
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{CandidateRecord, Outcome};
use crate::io::process::ProcessResult;

pub const LOG_FILE: &str = "experiment.log";
pub const META_FILE: &str = "meta.json";
pub const REPORTS_DIR: &str = "reports";
pub const ARCHIVE_DIR: &str = "git";

/// Metadata for one run, persisted to `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMeta {
    pub run_index: u32,
    pub project: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub total: usize,
    pub timeout: usize,
    pub empty: usize,
    pub success: usize,
    pub error: usize,
    pub records: Vec<CandidateRecord>,
}

/// State owned by one run: its folder, reports and timing.
#[derive(Debug)]
pub struct RunContext {
    pub run_index: u32,
    pub project: String,
    pub run_folder: PathBuf,
    pub reports_folder: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunContext {
    /// Create a fresh run folder under `runs_root`.
    ///
    /// The folder is named from the current epoch milliseconds; on a name
    /// collision the timestamp is bumped until creation succeeds.
    #[instrument(skip_all, fields(run_index, runs_root = %runs_root.display()))]
    pub fn create(runs_root: &Path, project: &str, small_set: bool, run_index: u32) -> Result<Self> {
        fs::create_dir_all(runs_root)
            .with_context(|| format!("create runs root {}", runs_root.display()))?;
        let started_at = Utc::now();
        let suffix = if small_set { "_smallset" } else { "" };

        let mut millis = started_at.timestamp_millis();
        let run_folder = loop {
            let candidate = runs_root.join(format!("{millis}_{project}{suffix}"));
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create run folder {}", candidate.display()));
                }
            }
        };
        let reports_folder = run_folder.join(REPORTS_DIR);
        fs::create_dir_all(&reports_folder)
            .with_context(|| format!("create reports dir {}", reports_folder.display()))?;
        debug!(run_folder = %run_folder.display(), "run folder created");

        Ok(Self {
            run_index,
            project: project.to_string(),
            run_folder,
            reports_folder,
            started_at,
            ended_at: None,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.run_folder.join(LOG_FILE)
    }

    pub fn report_path(&self, key: &str) -> PathBuf {
        self.reports_folder.join(format!("{key}.report.txt"))
    }

    /// Write the report for `key` unless one already exists.
    ///
    /// Returns `false` when a report was already written (reports are write-once).
    pub fn write_report(&self, key: &str, body: &str) -> Result<bool> {
        let path = self.report_path(key);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "report already written");
                return Ok(false);
            }
            Err(err) => return Err(err).with_context(|| format!("create {}", path.display())),
        };
        file.write_all(body.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(true)
    }

    /// Copy the repository metadata directory into the run folder.
    #[instrument(skip_all)]
    pub fn archive_vcs(&self, git_dir: &Path) -> Result<PathBuf> {
        let target = self.run_folder.join(ARCHIVE_DIR);
        copy_dir_recursive(git_dir, &target)?;
        Ok(target)
    }

    /// Stamp the end time and write `meta.json`.
    pub fn finalize(&mut self, records: &[CandidateRecord]) -> Result<RunMeta> {
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);
        let count = |outcome: Outcome| records.iter().filter(|r| r.outcome == outcome).count();
        let duration = ended_at - self.started_at;
        let meta = RunMeta {
            run_index: self.run_index,
            project: self.project.clone(),
            start_time: self.started_at.to_rfc3339(),
            end_time: ended_at.to_rfc3339(),
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            total: records.len(),
            timeout: count(Outcome::Timeout),
            empty: count(Outcome::Empty),
            success: count(Outcome::Success),
            error: count(Outcome::Error),
            records: records.to_vec(),
        };
        write_meta(&self.run_folder.join(META_FILE), &meta)?;
        Ok(meta)
    }
}

/// Body of a `success` report: exit code header, then both streams.
pub fn build_report_body(result: &ProcessResult) -> String {
    let code = match result.exit_code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    };
    let mut body = format!("exit_code: {code}\n");
    if result.timed_out {
        body.push_str("timed_out: true\n");
    }
    body.push_str("=== stdout ===\n");
    push_section(&mut body, &result.stdout, result.stdout_truncated);
    body.push_str("=== stderr ===\n");
    push_section(&mut body, &result.stderr, result.stderr_truncated);
    body
}

fn push_section(body: &mut String, text: &str, truncated: usize) {
    body.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        body.push('\n');
    }
    if truncated > 0 {
        body.push_str(&format!("[truncated {truncated} bytes]\n"));
    }
}

/// Body of an `error` report.
pub fn error_report_body(err: &anyhow::Error) -> String {
    format!("{}\n{err:#}\n", Outcome::Error.sentinel())
}

pub fn read_meta(path: &Path) -> Result<RunMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_meta(path: &Path, meta: &RunMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Err(anyhow!("missing {}", src.display()));
    }
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type().context("read file type")?;
        if file_type.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else if file_type.is_file() {
            fs::copy(&path, &target).with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}
