// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Reader's five-phase measurement harness, run once per iteration
//! inside the PROCESSING state:
//!
//! - **A — warmup**: touch the payload once, untimed, so the working set is
//!   resident before any phase that *is* timed begins.
//! - **B — hot-read**: read the payload while it is still cache-warm from
//!   phase A / the Writer's own copy.
//! - **C — cold-read**: evict the payload from cache, then read it again.
//! - **D — read+write copy**: evict the payload from cache again, then copy
//!   it into a local buffer.
//! - **E — verify**: digest the local buffer and compare against the
//!   advertised digest.

use crate::cache;
use crate::digest::{compute_digest, digests_match, DIGEST_SIZE};
use std::sync::atomic::{fence, Ordering};
use std::time::Instant;

/// Result of running all five phases once.
pub struct PhaseResult {
    pub hot_read_duration_ns: u64,
    pub cold_read_duration_ns: u64,
    pub read_write_duration_ns: u64,
    pub verify_duration_ns: u64,
    /// Same measurement as `verify_duration_ns`: the local buffer digested
    /// in phase E is by definition in-cache, so this field has no
    /// independent value of its own.
    pub cached_verify_duration_ns: u64,
    pub total_duration_ns: u64,
    pub cache_flush_degraded: bool,
    pub verified: bool,
}

/// Run phases A-E over `payload`, comparing against `advertised_digest`.
///
/// `payload` must be exactly `data_size` bytes, a reference into the shared
/// region valid for the duration of the call (the caller holds PROCESSING,
/// so the Writer will not touch it until ACKNOWLEDGED).
#[must_use]
pub fn run(payload: &[u8], advertised_digest: &[u8; DIGEST_SIZE]) -> PhaseResult {
    let total_start = Instant::now();

    // Phase A: warmup, untimed.
    let mut sink: u64 = 0;
    for &b in payload {
        sink = sink.wrapping_add(u64::from(b));
    }
    std::hint::black_box(sink);
    fence(Ordering::SeqCst);

    // Phase B: hot-read.
    let hot_start = Instant::now();
    let mut hot_sink: u64 = 0;
    for &b in payload {
        hot_sink = hot_sink.wrapping_add(u64::from(b));
    }
    std::hint::black_box(hot_sink);
    let hot_read_duration_ns = hot_start.elapsed().as_nanos() as u64;

    // Phase C: cold-read, cache explicitly evicted first.
    // SAFETY: payload is valid for its own length for the duration of this
    // call.
    let cold_flush_degraded = unsafe { cache::flush_range(payload.as_ptr(), payload.len()) };
    fence(Ordering::SeqCst);
    let cold_start = Instant::now();
    let mut cold_sink: u64 = 0;
    for &b in payload {
        cold_sink = cold_sink.wrapping_add(u64::from(b));
    }
    std::hint::black_box(cold_sink);
    let cold_read_duration_ns = cold_start.elapsed().as_nanos() as u64;

    // Phase D: read+write copy. The cold-read above just streamed the whole
    // payload back into cache, so it must be re-flushed here too, or the
    // copy below would measure a warm read instead of the cold read+write
    // the phase is meant to isolate.
    // SAFETY: payload is valid for its own length for the duration of this
    // call.
    let rw_flush_degraded = unsafe { cache::flush_range(payload.as_ptr(), payload.len()) };
    fence(Ordering::SeqCst);
    let rw_start = Instant::now();
    let local = payload.to_vec();
    let read_write_duration_ns = rw_start.elapsed().as_nanos() as u64;
    fence(Ordering::SeqCst);

    // Phase E: digest and compare.
    let verify_start = Instant::now();
    let computed = compute_digest(&local);
    let verified = digests_match(advertised_digest, &computed);
    let verify_duration_ns = verify_start.elapsed().as_nanos() as u64;

    let total_duration_ns = total_start.elapsed().as_nanos() as u64;

    PhaseResult {
        hot_read_duration_ns,
        cold_read_duration_ns,
        read_write_duration_ns,
        verify_duration_ns,
        cached_verify_duration_ns: verify_duration_ns,
        total_duration_ns,
        cache_flush_degraded: cold_flush_degraded || rw_flush_degraded,
        verified,
    }
}
