//! Durable, append-only experiment log.
//!
//! # Separation of Concerns
//!
//! - **Tracing (`logging`)**: dev diagnostics via `RUST_LOG`, output to stderr.
//! - **Log sink (this module)**: product artifact inside the run folder. Every
//!   event is one line prefixed with an ISO-8601 UTC timestamp, written and
//!   flushed before the caller continues.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};

/// Append-only line sink shared by every pipeline component.
pub trait LogSink {
    /// Append one event. Embedded newlines are split into separate events.
    fn append(&self, line: &str) -> Result<()>;
}

/// Append a multi-line payload (stdout, stderr) as one event per line.
pub fn append_block(sink: &dyn LogSink, label: &str, text: &str) -> Result<()> {
    for line in text.lines() {
        sink.append(&format!("{label}| {line}"))?;
    }
    Ok(())
}

/// Current UTC time in the log's timestamp format.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Log sink backed by a file opened in append mode.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileLogSink {
    /// Open (or create) the log file; parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Flush and release the file.
    pub fn close(self) -> Result<()> {
        let mut writer = self
            .writer
            .into_inner()
            .map_err(|_| anyhow!("log writer lock poisoned"))?;
        writer
            .flush()
            .with_context(|| format!("flush log {}", self.path.display()))
    }
}

impl LogSink for FileLogSink {
    fn append(&self, line: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("log writer lock poisoned"))?;
        let stamp = timestamp();
        for part in line.split('\n') {
            writeln!(writer, "{stamp} {}", part.trim_end_matches('\r'))
                .with_context(|| format!("write log {}", self.path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flush log {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_timestamped_and_appended() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/experiment.log");

        let sink = FileLogSink::open(&path).expect("open");
        sink.append("first").expect("append");
        sink.close().expect("close");

        let sink = FileLogSink::open(&path).expect("reopen");
        append_block(&sink, "stdout", "a\nb\n").expect("block");
        sink.close().expect("close");

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" stdout| a"));
        assert!(lines[2].ends_with(" stdout| b"));
        for line in lines {
            let (stamp, _) = line.split_once(' ').expect("timestamp prefix");
            chrono::DateTime::parse_from_rfc3339(stamp).expect("rfc3339 timestamp");
        }
    }

    #[test]
    fn embedded_newlines_become_separate_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("experiment.log");
        let sink = FileLogSink::open(&path).expect("open");
        sink.append("one\ntwo").expect("append");
        sink.close().expect("close");

        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 2);
    }
}
