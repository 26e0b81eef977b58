// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Frame Slot binary layout: a fixed, 64-byte-aligned header at offset 0
//! of the backing object, followed by the payload buffer.
//!
//! # Memory Ordering Strategy
//!
//! Unlike a single-process ring buffer, nothing here crosses the host/guest
//! domain boundary with a language-level synchronisation primitive, so this
//! layout deliberately does *not* rely on Acquire/Release pairing between
//! atomics. Instead it uses single-word atomic loads/stores with `Relaxed`
//! ordering, plus an explicit full fence (`atomic::fence(SeqCst)`) issued by
//! the caller around each state transition:
//!
//! - Publishing side: store header/payload fields, fence, store the new
//!   state word, fence again.
//! - Observing side: load the state word; on a match, fence, then load the
//!   header/payload fields it guards.
//!
//! `FrameHeader` only provides the single-word accessors; sequencing the
//! fences around them is [`crate::protocol`]'s job, because the fence points
//! depend on *which* fields were just touched, not on the layout itself.
//!
//! # Field Ownership
//!
//! `magic`, `test_complete`, `writer_state`, `sequence`, `data_size`,
//! `digest`, and the payload are written only by the Writer.
//! `reader_state`, `error_code`, `timings`, and `perf_sample` are written
//! only by the Reader. `FrameHeader` does not enforce this in the type
//! system (both peers map the same bytes); it is a protocol discipline
//! documented here and upheld by [`crate::protocol`].

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

/// Ready token stored in `magic` once the Writer has completed first-time
/// setup. Distinguishes a genuinely initialised region from a zeroed or
/// stale one: the first-level gate a Reader checks before trusting any
/// other header field, since a leftover small integer from a prior run
/// could otherwise be mistaken for a valid state word.
pub const MAGIC_READY: u32 = 0x4956_5348; // ASCII "IVSH"

/// `magic` value of a region that has never been initialised by a Writer.
pub const MAGIC_UNINIT: u32 = 0;

/// Digest width in bytes (SHA-256).
pub const DIGEST_SIZE: usize = 32;

/// Opaque perf-sample capacity. Large enough for a handful of hardware
/// counter values without the layout caring what they mean.
pub const PERF_SAMPLE_SIZE: usize = 64;

/// Durations written by the Reader after processing one message (ns).
#[repr(C, align(8))]
pub struct Timings {
    /// Legacy aggregate, always equal to `read_write_duration`.
    pub copy_duration: AtomicU64,
    pub verify_duration: AtomicU64,
    pub total_duration: AtomicU64,
    pub hot_read_duration: AtomicU64,
    pub cold_read_duration: AtomicU64,
    pub read_write_duration: AtomicU64,
    pub cached_verify_duration: AtomicU64,
}

impl Timings {
    const fn zeroed() -> Self {
        Self {
            copy_duration: AtomicU64::new(0),
            verify_duration: AtomicU64::new(0),
            total_duration: AtomicU64::new(0),
            hot_read_duration: AtomicU64::new(0),
            cold_read_duration: AtomicU64::new(0),
            read_write_duration: AtomicU64::new(0),
            cached_verify_duration: AtomicU64::new(0),
        }
    }
}

/// The Frame Slot header. Exactly one per region, reused for every
/// iteration. `repr(C, align(64))` pins both the field order and the
/// alignment so two peers built from the same source agree on every offset
/// without relying on compiler-inferred padding.
#[repr(C, align(64))]
pub struct FrameHeader {
    pub magic: AtomicU32,
    pub test_complete: AtomicU32,
    pub writer_state: AtomicU32,
    pub reader_state: AtomicU32,
    pub sequence: AtomicU32,
    pub data_size: AtomicU32,
    pub error_code: AtomicU32,
    /// Reader-owned: set when the cold-read phase's cache flush degraded to
    /// a bare fence because the target architecture has no cache-eviction
    /// intrinsic.
    cache_flush_degraded: AtomicU32,
    digest: UnsafeCell<[u8; DIGEST_SIZE]>,
    pub timings: Timings,
    perf_sample: UnsafeCell<[u8; PERF_SAMPLE_SIZE]>,
    _pad1: [u8; 8],
}

// SAFETY: FrameHeader is mapped into shared memory and accessed concurrently
// by two OS processes. All cross-peer-visible fields are atomics; the two
// UnsafeCell byte arrays (digest, perf_sample) are each written by exactly
// one peer while the other peer holds no reference to them, with the
// happens-before relationship supplied by the full-fence protocol in
// `crate::protocol`, not by the Rust memory model's automatic `Send`/`Sync`.
unsafe impl Send for FrameHeader {}
unsafe impl Sync for FrameHeader {}

/// Total header size. The payload must start at the next 64-byte boundary.
pub const HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

impl FrameHeader {
    /// Zero the header in place. Only valid when the caller has exclusive
    /// access (region just created) or is the Writer re-running its
    /// `UNINITIALISED -> INITIALISING` step.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `HEADER_SIZE` bytes of valid,
    /// `align(64)`-aligned, writable memory.
    pub unsafe fn zero_in_place(ptr: *mut u8) {
        std::ptr::write_bytes(ptr, 0, HEADER_SIZE);
    }

    /// View an already-mapped, zero-initialised byte range as a `FrameHeader`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `HEADER_SIZE` bytes,
    /// aligned to 64 bytes, and outlive the returned reference.
    pub unsafe fn view<'a>(ptr: *mut u8) -> &'a FrameHeader {
        &*(ptr as *const FrameHeader)
    }

    /// Issue the one fence kind this protocol uses: a full barrier.
    #[inline]
    pub fn fence() {
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn load_magic(&self) -> u32 {
        self.magic.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_magic(&self, v: u32) {
        self.magic.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_writer_state(&self) -> u32 {
        self.writer_state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_writer_state(&self, v: u32) {
        self.writer_state.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_reader_state(&self) -> u32 {
        self.reader_state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_reader_state(&self, v: u32) {
        self.reader_state.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_test_complete(&self) -> bool {
        self.test_complete.load(Ordering::Relaxed) != 0
    }

    #[inline]
    pub fn store_test_complete(&self, done: bool) {
        self.test_complete
            .store(u32::from(done), Ordering::Relaxed);
    }

    #[inline]
    pub fn load_sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_sequence(&self, v: u32) {
        self.sequence.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_data_size(&self) -> u32 {
        self.data_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_data_size(&self, v: u32) {
        self.data_size.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_error_code(&self) -> u32 {
        self.error_code.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store_error_code(&self, v: u32) {
        self.error_code.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_cache_flush_degraded(&self) -> bool {
        self.cache_flush_degraded.load(Ordering::Relaxed) != 0
    }

    #[inline]
    pub fn store_cache_flush_degraded(&self, degraded: bool) {
        self.cache_flush_degraded
            .store(u32::from(degraded), Ordering::Relaxed);
    }

    /// Read the advertised digest. Only meaningful while `writer_state =
    /// SENDING` for the currently advertised `sequence`.
    ///
    /// # Safety
    ///
    /// Caller must have just observed the state word that makes this field
    /// stable (load-then-fence already performed) per the field's ownership
    /// rule.
    pub unsafe fn read_digest(&self) -> [u8; DIGEST_SIZE] {
        *self.digest.get()
    }

    /// Store a newly computed digest. Caller is the sole writer (the Writer
    /// peer) and must call [`FrameHeader::fence`] before publishing the
    /// state that makes it visible.
    ///
    /// # Safety
    ///
    /// Caller must be the Writer and must not call this while the Reader
    /// could be observing SENDING for a prior sequence.
    pub unsafe fn write_digest(&self, digest: &[u8; DIGEST_SIZE]) {
        *self.digest.get() = *digest;
    }

    /// Read the opaque perf-sample bytes written by the Reader.
    ///
    /// # Safety
    ///
    /// Caller must have observed `reader_state = ACKNOWLEDGED` for the
    /// relevant sequence first.
    pub unsafe fn read_perf_sample(&self) -> [u8; PERF_SAMPLE_SIZE] {
        *self.perf_sample.get()
    }

    /// Store opaque perf-sample bytes. Caller is the sole writer (the
    /// Reader peer).
    ///
    /// # Safety
    ///
    /// Caller must be the Reader, writing before it stores
    /// `reader_state = ACKNOWLEDGED`.
    pub unsafe fn write_perf_sample(&self, sample: &[u8; PERF_SAMPLE_SIZE]) {
        *self.perf_sample.get() = *sample;
    }
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            magic: AtomicU32::new(MAGIC_UNINIT),
            test_complete: AtomicU32::new(0),
            writer_state: AtomicU32::new(0),
            reader_state: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
            data_size: AtomicU32::new(0),
            error_code: AtomicU32::new(0),
            cache_flush_degraded: AtomicU32::new(0),
            digest: UnsafeCell::new([0u8; DIGEST_SIZE]),
            timings: Timings::zeroed(),
            perf_sample: UnsafeCell::new([0u8; PERF_SAMPLE_SIZE]),
            _pad1: [0u8; 8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_64_byte_aligned_and_sized() {
        assert_eq!(std::mem::align_of::<FrameHeader>(), 64);
        // Size must itself be a multiple of 64 so the payload that follows
        // it in the backing object also lands on a 64-byte boundary.
        assert_eq!(HEADER_SIZE % 64, 0);
    }

    #[test]
    fn default_header_is_uninitialised() {
        let h = FrameHeader::default();
        assert_eq!(h.load_magic(), MAGIC_UNINIT);
        assert_eq!(h.load_writer_state(), 0);
        assert_eq!(h.load_reader_state(), 0);
        assert!(!h.load_test_complete());
    }

    #[test]
    fn digest_and_perf_sample_round_trip() {
        let h = FrameHeader::default();
        let digest = [7u8; DIGEST_SIZE];
        let sample = [9u8; PERF_SAMPLE_SIZE];
        // SAFETY: exclusive access in this single-threaded test.
        unsafe {
            h.write_digest(&digest);
            h.write_perf_sample(&sample);
            assert_eq!(h.read_digest(), digest);
            assert_eq!(h.read_perf_sample(), sample);
        }
    }
}
