//! Shared deterministic types for the experiment pipeline.
//!
//! These types define stable contracts between components. They do not depend
//! on external state and serialize to stable JSON for run metadata.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::naming::unit_name;
use crate::error::MissingUnitNameError;

/// A (source unit, test unit) pair scheduled for one pass through the pipeline.
///
/// Paths are relative to the project root. Candidates are immutable for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateUnit {
    /// Generation target, e.g. `src/main/java/org/demo/Foo.java`.
    pub unit_path: PathBuf,
    /// Where the generated artifact is expected, e.g. `src/test/java/org/demo/FooTest.java`.
    pub test_path: PathBuf,
}

impl CandidateUnit {
    pub fn new(unit_path: impl Into<PathBuf>, test_path: impl Into<PathBuf>) -> Self {
        Self {
            unit_path: unit_path.into(),
            test_path: test_path.into(),
        }
    }

    /// File name of the unit (`Foo.java`).
    pub fn unit_name(&self) -> Result<String, MissingUnitNameError> {
        unit_name(&self.unit_path)
    }

    /// File name of the expected artifact (`FooTest.java`).
    pub fn test_name(&self) -> Result<String, MissingUnitNameError> {
        unit_name(&self.test_path)
    }
}

impl fmt::Display for CandidateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.unit_path.display(),
            self.test_path.display()
        )
    }
}

/// Result of waiting for the generation buffer to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizationResult {
    pub timed_out: bool,
    /// Length (bytes) of the last sampled buffer text.
    pub final_length: usize,
}

/// Terminal classification of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The buffer never settled before the deadline.
    Timeout,
    /// The buffer settled at zero length.
    Empty,
    /// The build/test tool ran to completion, whether tests passed or not.
    Success,
    /// An unexpected failure from an external call.
    Error,
}

impl Outcome {
    /// Fixed token written to reports and logs.
    pub fn sentinel(self) -> &'static str {
        match self {
            Outcome::Timeout => "timeout",
            Outcome::Empty => "empty",
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }

    /// True for outcomes followed by the generation cooldown.
    pub fn needs_cooldown(self) -> bool {
        matches!(self, Outcome::Timeout | Outcome::Empty)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sentinel())
    }
}

/// Per-candidate pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reset,
    Branching,
    Generating,
    Stabilizing,
    Relocating,
    ImportRepair,
    Executing,
    Committing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reset => "reset",
            Stage::Branching => "branching",
            Stage::Generating => "generating",
            Stage::Stabilizing => "stabilizing",
            Stage::Relocating => "relocating",
            Stage::ImportRepair => "import_repair",
            Stage::Executing => "executing",
            Stage::Committing => "committing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What happened to one candidate, persisted in the run's `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub unit: String,
    pub test: String,
    pub key: Option<String>,
    pub outcome: Outcome,
    /// Last stage entered (the failing stage for errors).
    pub stage: Stage,
    /// Exit code of the build/test tool, when it ran.
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}
