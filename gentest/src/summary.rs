//! Aggregate outcomes across finished run folders.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::Outcome;
use crate::io::report::{META_FILE, read_meta};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub runs: usize,
    pub candidates: usize,
    pub timeout: usize,
    pub empty: usize,
    pub success: usize,
    pub error: usize,
    /// Builds that exited with status 0, out of builds that ran.
    pub passing_builds: usize,
    pub builds: usize,
    pub avg_duration_secs: Option<f64>,
    /// Outcome counts per candidate key across runs.
    pub per_key: BTreeMap<String, BTreeMap<Outcome, usize>>,
}

impl Summary {
    pub fn pass_rate(&self) -> Option<f64> {
        (self.builds > 0).then(|| self.passing_builds as f64 / self.builds as f64)
    }
}

pub fn load_run_dirs(runs_root: &Path) -> Result<Vec<PathBuf>> {
    if !runs_root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(runs_root).with_context(|| format!("read {}", runs_root.display()))? {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Summarize every run folder under `runs_root`.
///
/// Folders without a readable `meta.json` (unfinished or aborted runs) are
/// skipped with a warning.
pub fn aggregate(runs_root: &Path) -> Result<(Summary, Vec<String>)> {
    let mut summary = Summary::default();
    let mut warnings = Vec::new();

    for run_dir in load_run_dirs(runs_root)? {
        let meta = match read_meta(&run_dir.join(META_FILE)) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", run_dir.display()));
                continue;
            }
        };

        summary.runs += 1;
        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });

        for record in &meta.records {
            summary.candidates += 1;
            match record.outcome {
                Outcome::Timeout => summary.timeout += 1,
                Outcome::Empty => summary.empty += 1,
                Outcome::Success => summary.success += 1,
                Outcome::Error => summary.error += 1,
            }
            if record.outcome == Outcome::Success {
                summary.builds += 1;
                if record.exit_code == Some(0) {
                    summary.passing_builds += 1;
                }
            }
            let key = record.key.clone().unwrap_or_else(|| record.unit.clone());
            *summary
                .per_key
                .entry(key)
                .or_default()
                .entry(record.outcome)
                .or_insert(0) += 1;
        }
    }

    Ok((summary, warnings))
}

/// Human-readable summary, one line per statistic then one per key.
pub fn render(summary: &Summary) -> String {
    let mut out = format!(
        "runs: {}\ncandidates: {}\ntimeout: {}\nempty: {}\nsuccess: {}\nerror: {}\n",
        summary.runs,
        summary.candidates,
        summary.timeout,
        summary.empty,
        summary.success,
        summary.error
    );
    match summary.pass_rate() {
        Some(rate) => out.push_str(&format!(
            "passing builds: {}/{} ({:.1}%)\n",
            summary.passing_builds,
            summary.builds,
            rate * 100.0
        )),
        None => out.push_str("passing builds: n/a\n"),
    }
    if let Some(avg) = summary.avg_duration_secs {
        out.push_str(&format!("avg run duration: {avg:.1}s\n"));
    }
    for (key, outcomes) in &summary.per_key {
        let counts: Vec<String> = outcomes
            .iter()
            .map(|(outcome, count)| format!("{outcome}={count}"))
            .collect();
        out.push_str(&format!("{key}: {}\n", counts.join(" ")));
    }
    out
}
