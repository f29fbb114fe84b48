//! Wait for an asynchronously written buffer to stop changing.
//!
//! Generation has no completion signal. The buffer is sampled once per poll
//! interval and considered settled when two consecutive samples have the same
//! length (and, optionally, a non-empty buffer ends with a closing marker).

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::types::StabilizationResult;
use crate::error::NoActiveBufferError;
use crate::io::surface::GenerationSurface;

/// Time source for polling loops.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizeOptions {
    pub interval: Duration,
    pub timeout: Duration,
    /// Required last non-whitespace character of a non-empty buffer.
    pub closing_marker: Option<char>,
}

/// Poll `surface` until its text settles or `timeout` elapses.
///
/// A missing buffer at any sample fails with [`NoActiveBufferError`]. A
/// deadline miss is a normal result with `timed_out` set.
#[instrument(skip_all, fields(interval_ms = opts.interval.as_millis() as u64, timeout_ms = opts.timeout.as_millis() as u64))]
pub fn await_stable<S, C>(
    surface: &S,
    clock: &C,
    opts: &StabilizeOptions,
) -> Result<StabilizationResult>
where
    S: GenerationSurface + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now();
    let mut previous: Option<usize> = None;

    loop {
        clock.sleep(opts.interval);
        let text = surface.current_text()?.ok_or(NoActiveBufferError)?;
        let length = text.len();
        debug!(length, "sampled buffer");

        if previous == Some(length) && marker_satisfied(&text, opts.closing_marker) {
            return Ok(StabilizationResult {
                timed_out: false,
                final_length: length,
            });
        }
        previous = Some(length);

        if clock.now().duration_since(start) >= opts.timeout {
            warn!(length, "buffer did not stabilize before deadline");
            return Ok(StabilizationResult {
                timed_out: true,
                final_length: length,
            });
        }
    }
}

fn marker_satisfied(text: &str, marker: Option<char>) -> bool {
    let Some(marker) = marker else {
        return true;
    };
    match text.trim_end().chars().last() {
        Some(last) => last == marker,
        // An empty buffer is settled as-is so it classifies as `empty`.
        None => true,
    }
}
