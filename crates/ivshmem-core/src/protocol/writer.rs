// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Writer side of the rendezvous protocol: the host process that owns
//! payload generation and drives each iteration's seven steps.

use super::{poll_until, poll_until_valid, PollOutcome, Timeouts};
use crate::digest::compute_digest;
use crate::error::{IvshmemError, Result};
use crate::fsm::{ReaderState, WriterState};
use crate::record::{IterationFailure, IterationRecord};
use crate::region::layout::FrameHeader;
use crate::region::SharedRegion;
use log::{debug, warn};
use std::time::Instant;

/// Drives one region as the Writer: performs the initial handshake, then
/// runs any number of iterations, each publishing a payload and collecting
/// the Reader's timing breakdown.
pub struct WriterSession {
    region: SharedRegion,
    timeouts: Timeouts,
    sequence: u32,
}

impl WriterSession {
    #[must_use]
    pub fn new(region: SharedRegion, timeouts: Timeouts) -> Self {
        Self {
            region,
            timeouts,
            sequence: 0,
        }
    }

    /// Perform first-time setup and the handshake with the Reader:
    /// advertise `magic`, move to `INITIALISING`, then wait for the Reader
    /// to reach `READY` before declaring ourselves `READY`.
    pub fn initialise(&mut self) -> Result<()> {
        let header = self.region.header();

        header.store_writer_state(WriterState::Initialising.as_u32());
        FrameHeader::fence();
        header.store_magic(crate::region::layout::MAGIC_READY);
        FrameHeader::fence();

        debug!("[writer] advertised magic, waiting for reader handshake");

        let outcome = poll_until_valid(
            self.timeouts.handshake,
            &self.timeouts,
            "reader_state",
            || header.load_reader_state(),
            |v| ReaderState::from_u32(v).is_some(),
            |v| v == ReaderState::Ready.as_u32(),
        )?;
        if outcome == PollOutcome::TimedOut {
            return Err(IvshmemError::HandshakeTimeout {
                waited: self.timeouts.handshake,
            });
        }
        FrameHeader::fence();

        header.store_writer_state(WriterState::Ready.as_u32());
        FrameHeader::fence();
        debug!("[writer] handshake complete, writer READY");
        Ok(())
    }

    /// Run one full iteration: publish `payload`, wait for the Reader to
    /// process and acknowledge it, and return the collected record.
    ///
    /// A timeout or digest mismatch is not an `Err` — it is recorded on the
    /// returned [`IterationRecord`] and the caller may continue with the
    /// next iteration.
    pub fn send_iteration(&mut self, iteration: u32, payload: &[u8]) -> Result<IterationRecord> {
        let capacity = self.region.payload_capacity();
        if payload.len() > capacity {
            return Err(IvshmemError::PayloadTooLarge {
                size: payload.len(),
                capacity,
            });
        }

        let header = self.region.header();
        let digest = compute_digest(payload);

        // Step 1 (pre-prepare) has already happened: digest computed above
        // while writer_state is still READY, so the Reader never observes
        // a digest for data it cannot yet see.

        // Step 2: host-copy, then fence before publishing the new state.
        let copy_start = Instant::now();
        // SAFETY: writer_state is READY, so the Reader is not reading the
        // payload buffer; we are the sole writer of header fields here.
        unsafe {
            self.region
                .payload_slice_mut(payload.len())
                .copy_from_slice(payload);
            header.write_digest(&digest);
        }
        header.store_data_size(payload.len() as u32);
        header.store_sequence(self.sequence);
        FrameHeader::fence();
        let host_copy_duration_ns = copy_start.elapsed().as_nanos() as u64;

        // Step 3: publish SENDING, then fence.
        let round_trip_start = Instant::now();
        header.store_writer_state(WriterState::Sending.as_u32());
        FrameHeader::fence();

        // Step 4a: wait for the Reader to pick the message up.
        if poll_until(self.timeouts.processing_appear, &self.timeouts, || {
            header.load_reader_state() == ReaderState::Processing.as_u32()
        }) == PollOutcome::TimedOut
        {
            warn!(
                "[writer] iteration {iteration}: reader never entered PROCESSING within {:?}",
                self.timeouts.processing_appear
            );
            return Ok(self.reset_after_timeout(iteration, payload.len(), host_copy_duration_ns));
        }

        // Step 4b: wait for the Reader to finish processing.
        if poll_until(self.timeouts.processing_clear, &self.timeouts, || {
            header.load_reader_state() != ReaderState::Processing.as_u32()
        }) == PollOutcome::TimedOut
        {
            warn!(
                "[writer] iteration {iteration}: reader stuck in PROCESSING past {:?}",
                self.timeouts.processing_clear
            );
            return Ok(self.reset_after_timeout(iteration, payload.len(), host_copy_duration_ns));
        }

        // Step 4c: wait for the explicit acknowledgement.
        if poll_until(self.timeouts.acknowledged, &self.timeouts, || {
            header.load_reader_state() == ReaderState::Acknowledged.as_u32()
        }) == PollOutcome::TimedOut
        {
            warn!(
                "[writer] iteration {iteration}: no ACKNOWLEDGED within {:?}",
                self.timeouts.acknowledged
            );
            return Ok(self.reset_after_timeout(iteration, payload.len(), host_copy_duration_ns));
        }

        // Fence before reading the Reader-owned fields.
        FrameHeader::fence();
        let round_trip_duration_ns = round_trip_start.elapsed().as_nanos() as u64;

        // Step 5: read back the Reader's timings and error code.
        let timings = &header.timings;
        let hot_read_duration_ns = timings.hot_read_duration.load(std::sync::atomic::Ordering::Relaxed);
        let cold_read_duration_ns = timings.cold_read_duration.load(std::sync::atomic::Ordering::Relaxed);
        let read_write_duration_ns = timings.read_write_duration.load(std::sync::atomic::Ordering::Relaxed);
        let verify_duration_ns = timings.verify_duration.load(std::sync::atomic::Ordering::Relaxed);
        let total_duration_ns = timings.total_duration.load(std::sync::atomic::Ordering::Relaxed);
        let error_code = header.load_error_code();
        let cache_flush_degraded = header.load_cache_flush_degraded();
        // SAFETY: we just observed ACKNOWLEDGED and fenced, so the Reader's
        // perf_sample write for this sequence is visible and stable.
        let perf_sample = unsafe { header.read_perf_sample() };

        // notification_estimate is round_trip_duration minus the Reader's
        // *reported* total_duration (not a re-sum of the individual phases,
        // which would silently exclude the Reader's own per-iteration
        // bookkeeping between entering PROCESSING and the start of phase B).
        let notification_estimate_ns = round_trip_duration_ns.saturating_sub(total_duration_ns);

        let outcome = if error_code == 0 {
            Ok(())
        } else {
            Err(IterationFailure::DigestMismatch)
        };

        // Step 6: return to READY, and wait for the Reader to do the same.
        header.store_writer_state(WriterState::Ready.as_u32());
        FrameHeader::fence();

        if poll_until(self.timeouts.ready, &self.timeouts, || {
            header.load_reader_state() == ReaderState::Ready.as_u32()
        }) == PollOutcome::TimedOut
        {
            warn!(
                "[writer] iteration {iteration}: reader did not return to READY within {:?}",
                self.timeouts.ready
            );
        }

        self.sequence = self.sequence.wrapping_add(1);

        Ok(IterationRecord {
            iteration,
            payload_size: payload.len(),
            host_copy_duration_ns,
            round_trip_duration_ns,
            notification_estimate_ns,
            hot_read_duration_ns,
            cold_read_duration_ns,
            read_write_duration_ns,
            verify_duration_ns,
            total_duration_ns,
            cache_flush_degraded,
            perf_sample,
            outcome,
        })
    }

    /// An iteration timeout is a soft failure: force `writer_state` back to
    /// READY so the next `send_iteration` call can proceed even though this
    /// one never reached ACKNOWLEDGED, then build the failed record.
    fn reset_after_timeout(&self, iteration: u32, payload_size: usize, host_copy_duration_ns: u64) -> IterationRecord {
        let header = self.region.header();
        header.store_writer_state(WriterState::Ready.as_u32());
        FrameHeader::fence();
        self.timeout_record(iteration, payload_size, host_copy_duration_ns)
    }

    fn timeout_record(&self, iteration: u32, payload_size: usize, host_copy_duration_ns: u64) -> IterationRecord {
        IterationRecord {
            iteration,
            payload_size,
            host_copy_duration_ns,
            round_trip_duration_ns: 0,
            notification_estimate_ns: 0,
            hot_read_duration_ns: 0,
            cold_read_duration_ns: 0,
            read_write_duration_ns: 0,
            verify_duration_ns: 0,
            total_duration_ns: 0,
            cache_flush_degraded: false,
            perf_sample: [0u8; crate::region::layout::PERF_SAMPLE_SIZE],
            outcome: Err(IterationFailure::Timeout),
        }
    }

    /// Run `count` iterations of a fixed payload size, used by the latency
    /// suite.
    pub fn run_latency_suite(&mut self, count: u32, payload_size: usize) -> Result<Vec<IterationRecord>> {
        let payload = vec![0xA5u8; payload_size];
        let mut records = Vec::with_capacity(count as usize);
        for i in 0..count {
            records.push(self.send_iteration(i, &payload)?);
        }
        Ok(records)
    }

    /// Run a round of iterations per payload size, used by the bandwidth
    /// suite.
    ///
    /// Widens the post-SENDING wait for PROCESSING to 2s for the bandwidth
    /// suite (vs. 1s for latency), since larger payloads make the Reader's
    /// own warm-up/copy setup slower to begin. The override is scoped to
    /// this call and restored afterwards.
    pub fn run_bandwidth_suite(
        &mut self,
        sizes: &[usize],
        iterations_per_size: u32,
    ) -> Result<Vec<IterationRecord>> {
        let saved_processing_appear = self.timeouts.processing_appear;
        self.timeouts.processing_appear = std::time::Duration::from_secs(2);

        let mut records = Vec::new();
        let mut iteration = 0u32;
        for &size in sizes {
            let payload = vec![0x5Au8; size];
            for _ in 0..iterations_per_size {
                match self.send_iteration(iteration, &payload) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        self.timeouts.processing_appear = saved_processing_appear;
                        return Err(e);
                    }
                }
                iteration += 1;
            }
        }

        self.timeouts.processing_appear = saved_processing_appear;
        Ok(records)
    }

    /// Signal suite completion: set `test_complete` and move to
    /// `COMPLETED`, so the Reader stops waiting for further iterations.
    pub fn shutdown(&mut self) {
        let header = self.region.header();
        header.store_test_complete(true);
        header.store_writer_state(WriterState::Completed.as_u32());
        FrameHeader::fence();
        debug!("[writer] signalled test_complete, writer COMPLETED");
    }

    #[must_use]
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::ReaderState as RS;
    use std::thread;
    use std::time::Duration;

    fn unique_path(label: &str) -> std::path::PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("ivshmem_bench_writer_{label}_{ts}"))
    }

    #[test]
    fn send_iteration_times_out_when_no_reader_present() {
        let path = unique_path("no_reader");
        let region = SharedRegion::create_host(&path, 4096).expect("create");
        let mut timeouts = Timeouts::default();
        timeouts.processing_appear = Duration::from_millis(20);
        timeouts.poll_yield = Duration::from_micros(1);
        let mut writer = WriterSession::new(region, timeouts);

        // Skip the handshake: there is no reader to complete it, so drive
        // writer_state to READY directly to exercise send_iteration alone.
        writer.region.header().store_writer_state(WriterState::Ready.as_u32());
        FrameHeader::fence();

        let record = writer.send_iteration(0, b"hello").expect("no fatal error");
        assert!(!record.success());

        drop(writer);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn send_iteration_rejects_oversized_payload() {
        let path = unique_path("oversized");
        let region = SharedRegion::create_host(&path, 4096).expect("create");
        let mut writer = WriterSession::new(region, Timeouts::default());
        let capacity = writer.region.payload_capacity();
        let oversized = vec![0u8; capacity + 1];

        let result = writer.send_iteration(0, &oversized);
        assert!(matches!(result, Err(IvshmemError::PayloadTooLarge { .. })));

        drop(writer);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn full_handshake_completes_against_a_simulated_reader() {
        let path = unique_path("handshake");
        let region = SharedRegion::create_host(&path, 4096).expect("create");
        let mut timeouts = Timeouts::default();
        timeouts.handshake = Duration::from_secs(2);
        timeouts.poll_yield = Duration::from_micros(1);
        let mut writer = WriterSession::new(region, timeouts);

        let reader_path = path.clone();
        let reader = thread::spawn(move || {
            let region = SharedRegion::open_host(&reader_path, 4096).expect("open");
            let header = region.header();
            while header.load_magic() != crate::region::layout::MAGIC_READY {
                thread::sleep(Duration::from_micros(1));
            }
            header.store_reader_state(RS::WaitingForWriter.as_u32());
            FrameHeader::fence();
            while header.load_writer_state() != WriterState::Ready.as_u32() {
                thread::sleep(Duration::from_micros(1));
            }
            header.store_reader_state(RS::Ready.as_u32());
            FrameHeader::fence();
        });

        writer.initialise().expect("handshake should succeed");
        reader.join().unwrap();

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn initialise_reports_corrupted_reader_state_instead_of_waiting_out_the_timeout() {
        let path = unique_path("corrupt_reader_state");
        let region = SharedRegion::create_host(&path, 4096).expect("create");
        let mut timeouts = Timeouts::default();
        timeouts.handshake = Duration::from_secs(30);
        timeouts.poll_yield = Duration::from_micros(1);
        let mut writer = WriterSession::new(region, timeouts);

        // A reader_state value outside 0..=4 can only mean the region was
        // written by an incompatible build or is genuinely corrupt; no
        // amount of further waiting fixes it.
        writer.region.header().store_reader_state(99);
        FrameHeader::fence();

        let result = writer.initialise();
        assert!(
            matches!(result, Err(IvshmemError::InvalidStateValue { field: "reader_state", value: 99 })),
            "expected InvalidStateValue, got {result:?}"
        );

        drop(writer);
        std::fs::remove_file(&path).ok();
    }
}
