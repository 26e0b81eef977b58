// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The rendezvous protocol: bounded polling loops that drive the dual FSM
//! through the seven-step per-iteration exchange, with the fence discipline
//! documented in [`crate::region::layout`].

pub mod reader;
pub mod writer;

use crate::error::IvshmemError;
use std::thread;
use std::time::Duration;

pub use reader::ReaderSession;
pub use writer::WriterSession;

/// Polling bounds for every blocking wait in the protocol. No domain
/// crossing ever uses a futex, condvar, or other blocking primitive — only
/// a poll loop bounded by one of these timeouts, yielding between polls.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    /// Bound on the initial handshake (Reader observing `magic = ready` and
    /// a sane Writer state, or the Writer observing the Reader reach READY).
    pub handshake: Duration,
    /// Bound on the Writer waiting for `reader_state = PROCESSING` to
    /// appear after publishing SENDING.
    pub processing_appear: Duration,
    /// Bound on the Writer waiting for `reader_state` to leave PROCESSING.
    pub processing_clear: Duration,
    /// Bound on the Writer waiting for `reader_state = ACKNOWLEDGED`.
    pub acknowledged: Duration,
    /// Bound on either peer waiting for the counterpart to return to READY.
    pub ready: Duration,
    /// Sleep between polls of a state word.
    pub poll_yield: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(50),
            processing_appear: Duration::from_secs(1),
            processing_clear: Duration::from_secs(2),
            acknowledged: Duration::from_secs(10),
            ready: Duration::from_secs(1),
            poll_yield: Duration::from_micros(10),
        }
    }
}

/// Sleep for one poll interval. A free function so every poll loop in
/// `writer`/`reader` goes through one spot and uses a single, uniform
/// poll-yield duration.
#[inline]
pub(crate) fn poll_yield(timeouts: &Timeouts) {
    thread::sleep(timeouts.poll_yield);
}

/// Outcome of a bounded poll loop: either the awaited condition was
/// observed, or the timeout elapsed first.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Observed,
    TimedOut,
}

/// Poll `condition` at `timeouts.poll_yield` intervals until it returns
/// `true` or `budget` elapses.
pub(crate) fn poll_until(budget: Duration, timeouts: &Timeouts, mut condition: impl FnMut() -> bool) -> PollOutcome {
    let start = std::time::Instant::now();
    loop {
        if condition() {
            return PollOutcome::Observed;
        }
        if start.elapsed() >= budget {
            return PollOutcome::TimedOut;
        }
        poll_yield(timeouts);
    }
}

/// Poll `load` at `timeouts.poll_yield` intervals until it returns a value
/// for which `is_target` holds, `budget` elapses, or it returns a value
/// `is_valid` rejects.
///
/// Used at the handshake, where an out-of-range state word means the
/// region is corrupt or was written by an incompatible peer — a condition
/// no amount of further waiting will resolve, so it is reported as
/// [`IvshmemError::InvalidStateValue`] immediately rather than spinning
/// until the handshake timeout expires.
pub(crate) fn poll_until_valid(
    budget: Duration,
    timeouts: &Timeouts,
    field: &'static str,
    mut load: impl FnMut() -> u32,
    is_valid: impl Fn(u32) -> bool,
    is_target: impl Fn(u32) -> bool,
) -> std::result::Result<PollOutcome, IvshmemError> {
    let start = std::time::Instant::now();
    loop {
        let value = load();
        if is_target(value) {
            return Ok(PollOutcome::Observed);
        }
        if !is_valid(value) {
            return Err(IvshmemError::InvalidStateValue { field, value });
        }
        if start.elapsed() >= budget {
            return Ok(PollOutcome::TimedOut);
        }
        poll_yield(timeouts);
    }
}
