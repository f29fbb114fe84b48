//! Experiment harness for external test generators.
//!
//! For every (source unit, test unit) pair in a project, the harness isolates
//! work on a per-unit git branch, triggers an external generator, waits for
//! its output to settle, post-processes the artifact, runs the build/test
//! tool, and records the outcome. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (naming, input lists, relocation).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, processes, git, log sink,
//!   generation surface, run folders). Behind traits where tests substitute them.
//!
//! Orchestration modules ([`stabilize`], [`pipeline`], [`experiment`],
//! [`summary`]) coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod experiment;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod stabilize;
pub mod summary;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
