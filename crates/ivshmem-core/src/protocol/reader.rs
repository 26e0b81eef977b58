// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Reader side of the rendezvous protocol: the guest process that
//! waits for each published message, runs the five-phase measurement
//! harness over it, and reports the result back to the Writer.

use super::{poll_until, poll_until_valid, PollOutcome, Timeouts};
use crate::error::{IvshmemError, Result};
use crate::fsm::{ReaderState, WriterState};
use crate::measurement::{run_phases, NullPerfSampler, PerfSampler};
use crate::region::layout::FrameHeader;
use crate::region::SharedRegion;
use log::debug;
use std::sync::atomic::Ordering;

/// Error code stored in the header when the Reader's digest check fails.
/// Zero means success.
const ERROR_DIGEST_MISMATCH: u32 = 1;

/// Drives one region as the Reader: performs the handshake, then serves
/// iterations until the Writer signals `test_complete`.
pub struct ReaderSession {
    region: SharedRegion,
    timeouts: Timeouts,
    sampler: Box<dyn PerfSampler>,
}

impl ReaderSession {
    #[must_use]
    pub fn new(region: SharedRegion, timeouts: Timeouts) -> Self {
        Self {
            region,
            timeouts,
            sampler: Box::new(NullPerfSampler),
        }
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: Box<dyn PerfSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Wait for the Writer to advertise `magic` and reach `READY`, then
    /// declare ourselves `READY`.
    pub fn wait_for_writer(&mut self) -> Result<()> {
        let header = self.region.header();

        debug!("[reader] waiting for writer magic");
        let outcome = poll_until(self.timeouts.handshake, &self.timeouts, || {
            header.load_magic() == crate::region::layout::MAGIC_READY
        });
        if outcome == PollOutcome::TimedOut {
            return Err(IvshmemError::HandshakeTimeout {
                waited: self.timeouts.handshake,
            });
        }
        FrameHeader::fence();

        header.store_reader_state(ReaderState::WaitingForWriter.as_u32());
        FrameHeader::fence();

        let outcome = poll_until_valid(
            self.timeouts.handshake,
            &self.timeouts,
            "writer_state",
            || header.load_writer_state(),
            |v| WriterState::from_u32(v).is_some(),
            |v| v == WriterState::Ready.as_u32(),
        )?;
        if outcome == PollOutcome::TimedOut {
            return Err(IvshmemError::HandshakeTimeout {
                waited: self.timeouts.handshake,
            });
        }
        FrameHeader::fence();

        header.store_reader_state(ReaderState::Ready.as_u32());
        FrameHeader::fence();
        debug!("[reader] handshake complete, reader READY");
        Ok(())
    }

    /// Serve one iteration: wait for `SENDING`, run the measurement
    /// harness, and report back. Returns `Ok(true)` if a message was
    /// served, `Ok(false)` if the Writer signalled completion instead, and
    /// `Err` only on a handshake-class timeout waiting for the next
    /// message.
    pub fn serve_iteration(&mut self) -> Result<bool> {
        let header = self.region.header();

        let outcome = poll_until(self.timeouts.ready, &self.timeouts, || {
            header.load_writer_state() == WriterState::Sending.as_u32()
                || header.load_test_complete()
        });
        if outcome == PollOutcome::TimedOut {
            return Err(IvshmemError::HandshakeTimeout {
                waited: self.timeouts.ready,
            });
        }

        if header.load_test_complete() && header.load_writer_state() != WriterState::Sending.as_u32() {
            debug!("[reader] observed test_complete, stopping");
            return Ok(false);
        }

        // Observed SENDING; fence before reading the Writer-owned fields.
        FrameHeader::fence();

        header.store_reader_state(ReaderState::Processing.as_u32());
        FrameHeader::fence();

        let data_size = header.load_data_size() as usize;
        let digest = unsafe { header.read_digest() };

        self.sampler.start();
        // SAFETY: writer_state is SENDING for this sequence, so the Writer
        // will not touch the payload buffer until it observes ACKNOWLEDGED.
        let payload = unsafe { self.region.payload_slice(data_size) };
        let result = run_phases(payload, &digest);
        let perf_sample = self.sampler.stop();

        let timings = &header.timings;
        timings
            .hot_read_duration
            .store(result.hot_read_duration_ns, Ordering::Relaxed);
        timings
            .cold_read_duration
            .store(result.cold_read_duration_ns, Ordering::Relaxed);
        timings
            .read_write_duration
            .store(result.read_write_duration_ns, Ordering::Relaxed);
        timings
            .copy_duration
            .store(result.read_write_duration_ns, Ordering::Relaxed);
        timings
            .verify_duration
            .store(result.verify_duration_ns, Ordering::Relaxed);
        timings
            .cached_verify_duration
            .store(result.cached_verify_duration_ns, Ordering::Relaxed);
        timings
            .total_duration
            .store(result.total_duration_ns, Ordering::Relaxed);

        header.store_error_code(if result.verified { 0 } else { ERROR_DIGEST_MISMATCH });
        header.store_cache_flush_degraded(result.cache_flush_degraded);
        // SAFETY: we are the sole writer of perf_sample, and the Writer
        // will not read it until it observes ACKNOWLEDGED.
        unsafe {
            header.write_perf_sample(&perf_sample);
        }

        FrameHeader::fence();
        header.store_reader_state(ReaderState::Acknowledged.as_u32());
        FrameHeader::fence();

        // Wait for the Writer to return to READY before resetting our own
        // state, closing out the iteration.
        let outcome = poll_until(self.timeouts.ready, &self.timeouts, || {
            header.load_writer_state() == WriterState::Ready.as_u32()
        });
        if outcome == PollOutcome::TimedOut {
            debug!("[reader] writer did not return to READY promptly");
        }

        header.store_reader_state(ReaderState::Ready.as_u32());
        FrameHeader::fence();

        Ok(true)
    }

    /// Serve iterations until the Writer signals completion or `max`
    /// messages have been served, whichever comes first.
    pub fn serve(&mut self, max: Option<u32>) -> Result<u32> {
        let mut served = 0u32;
        loop {
            if let Some(max) = max {
                if served >= max {
                    break;
                }
            }
            if !self.serve_iteration()? {
                break;
            }
            served += 1;
        }
        Ok(served)
    }

    #[must_use]
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::compute_digest;
    use crate::protocol::WriterSession;
    use std::thread;
    use std::time::Duration;

    fn unique_path(label: &str) -> std::path::PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("ivshmem_bench_reader_{label}_{ts}"))
    }

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            handshake: Duration::from_secs(2),
            processing_appear: Duration::from_millis(500),
            processing_clear: Duration::from_millis(500),
            acknowledged: Duration::from_millis(500),
            ready: Duration::from_millis(500),
            poll_yield: Duration::from_micros(1),
        }
    }

    #[test]
    fn two_sided_rendezvous_round_trips_a_payload() {
        let path = unique_path("rendezvous");
        let writer_region = SharedRegion::create_host(&path, 1 << 20).expect("create");
        let mut writer = WriterSession::new(writer_region, fast_timeouts());

        let reader_path = path.clone();
        let reader_handle = thread::spawn(move || {
            let region = SharedRegion::open_host(&reader_path, 1 << 20).expect("open");
            let mut reader = ReaderSession::new(region, fast_timeouts());
            reader.wait_for_writer().expect("reader handshake");
            let served = reader.serve(Some(1)).expect("serve");
            assert_eq!(served, 1);
        });

        writer.initialise().expect("writer handshake");
        let payload = b"ivshmem round trip payload".to_vec();
        let record = writer.send_iteration(0, &payload).expect("send");
        assert!(record.success(), "iteration should succeed: {record:?}");

        reader_handle.join().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn digest_mismatch_is_reported_without_aborting() {
        let path = unique_path("mismatch");
        let region = SharedRegion::create_host(&path, 4096).expect("create");

        let mut reader = ReaderSession::new(region, fast_timeouts());
        reader.region.header().store_writer_state(WriterState::Sending.as_u32());
        reader.region.header().store_data_size(5);
        // SAFETY: single-threaded test, no concurrent writer.
        unsafe {
            reader
                .region
                .payload_slice_mut(5)
                .copy_from_slice(b"hello");
            reader.region.header().write_digest(&compute_digest(b"not hello"));
        }
        FrameHeader::fence();

        let served = reader.serve_iteration().expect("no fatal error");
        assert!(served);
        assert_eq!(reader.region.header().load_error_code(), ERROR_DIGEST_MISMATCH);

        std::fs::remove_file(&path).ok();
    }
}
