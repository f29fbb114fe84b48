//! Deterministic, pure logic shared by the experiment pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod candidates;
pub mod naming;
pub mod relocate;
pub mod template;
pub mod types;
