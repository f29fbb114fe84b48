//! Side-effecting adapters used by the pipeline.

pub mod config;
pub mod discovery;
pub mod git;
pub mod log_sink;
pub mod process;
pub mod report;
pub mod surface;
