// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-iteration results. Unlike [`crate::error::IvshmemError`], nothing
//! here aborts a suite: a timed-out or digest-mismatched iteration is data,
//! recorded and reported, while the suite moves on to the next iteration.

use std::fmt;

/// Why an iteration failed to complete cleanly. Distinct from
/// [`crate::error::IvshmemError`], which is reserved for setup/handshake
/// failures that abort the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationFailure {
    /// A bounded poll loop elapsed before the expected state transition.
    Timeout,
    /// The Reader's recomputed digest did not match the advertised one.
    DigestMismatch,
}

impl fmt::Display for IterationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::DigestMismatch => f.write_str("digest mismatch"),
        }
    }
}

/// All measurements and outcome data for one Writer <-> Reader exchange.
#[derive(Clone, Copy, Debug)]
pub struct IterationRecord {
    pub iteration: u32,
    pub payload_size: usize,

    /// Writer-side: time to copy the payload into the region (step 2).
    pub host_copy_duration_ns: u64,
    /// Writer-side: time from publishing SENDING to observing ACKNOWLEDGED.
    pub round_trip_duration_ns: u64,
    /// Writer-side estimate of pure cross-domain notification latency:
    /// `round_trip_duration_ns` minus the Reader's reported
    /// `total_duration_ns`.
    pub notification_estimate_ns: u64,

    /// Reader-side phase B: hot read (cache still warm from the Writer's
    /// copy).
    pub hot_read_duration_ns: u64,
    /// Reader-side phase C: cold read, cache explicitly evicted first.
    pub cold_read_duration_ns: u64,
    /// Reader-side phase D: read-and-copy into a local buffer.
    pub read_write_duration_ns: u64,
    /// Reader-side phase E: digest computation and comparison.
    pub verify_duration_ns: u64,
    /// Reader-side total of phases B through E.
    pub total_duration_ns: u64,

    /// Whether phase C's cache flush is believed to have degraded to a
    /// no-op (unsupported architecture).
    pub cache_flush_degraded: bool,

    /// Opaque bytes from the Reader's optional performance-counter sampler
    /// (`crate::measurement::PerfSampler`), read back by the Writer after
    /// ACKNOWLEDGED. All-zero when the Reader used `NullPerfSampler`.
    pub perf_sample: [u8; crate::region::layout::PERF_SAMPLE_SIZE],

    pub outcome: Result<(), IterationFailure>,
}

impl IterationRecord {
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for IterationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Ok(()) => write!(
                f,
                "iter {:>5} | size {:>8} B | copy {:>8} ns | rtt {:>9} ns | notify {:>8} ns | verify {:>7} ns | OK",
                self.iteration,
                self.payload_size,
                self.host_copy_duration_ns,
                self.round_trip_duration_ns,
                self.notification_estimate_ns,
                self.verify_duration_ns,
            ),
            Err(reason) => write!(
                f,
                "iter {:>5} | size {:>8} B | FAILED: {reason}",
                self.iteration, self.payload_size,
            ),
        }
    }
}

/// Print a human-readable summary table: one line per record, then a
/// trailing aggregate line with success count and round-trip percentiles.
pub fn print_summary(records: &[IterationRecord]) {
    for record in records {
        println!("{record}");
    }

    let successes: Vec<&IterationRecord> = records.iter().filter(|r| r.success()).collect();
    let failures = records.len() - successes.len();

    if successes.is_empty() {
        println!("no successful iterations out of {}", records.len());
        return;
    }

    let mut round_trips: Vec<u64> = successes.iter().map(|r| r.round_trip_duration_ns).collect();
    round_trips.sort_unstable();
    let p50 = percentile(&round_trips, 50.0);
    let p99 = percentile(&round_trips, 99.0);
    let mean: f64 = round_trips.iter().sum::<u64>() as f64 / round_trips.len() as f64;

    println!(
        "{} / {} iterations succeeded, {failures} failed | round-trip mean {mean:.0} ns, p50 {p50} ns, p99 {p99} ns",
        successes.len(),
        records.len(),
    );
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(iteration: u32, rtt_ns: u64, outcome: Result<(), IterationFailure>) -> IterationRecord {
        IterationRecord {
            iteration,
            payload_size: 1024,
            host_copy_duration_ns: 100,
            round_trip_duration_ns: rtt_ns,
            notification_estimate_ns: rtt_ns.saturating_sub(400),
            hot_read_duration_ns: 50,
            cold_read_duration_ns: 200,
            read_write_duration_ns: 80,
            verify_duration_ns: 70,
            total_duration_ns: 400,
            cache_flush_degraded: false,
            perf_sample: [0u8; crate::region::layout::PERF_SAMPLE_SIZE],
            outcome,
        }
    }

    #[test]
    fn success_reports_true_only_when_outcome_ok() {
        assert!(sample(1, 1000, Ok(())).success());
        assert!(!sample(2, 1000, Err(IterationFailure::Timeout)).success());
    }

    #[test]
    fn percentile_of_sorted_values_is_stable() {
        let values = vec![10, 20, 30, 40, 50];
        assert_eq!(percentile(&values, 50.0), 30);
        assert_eq!(percentile(&values, 0.0), 10);
        assert_eq!(percentile(&values, 100.0), 50);
    }

    #[test]
    fn print_summary_handles_all_failures_without_panicking() {
        let records = vec![
            sample(1, 0, Err(IterationFailure::Timeout)),
            sample(2, 0, Err(IterationFailure::DigestMismatch)),
        ];
        print_summary(&records);
    }
}
