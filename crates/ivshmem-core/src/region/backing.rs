// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The backing object: a byte-addressable, shared, read-write mapping whose
//! length equals the configured region size.
//!
//! Two provider families:
//!
//! - **Host side**: a plain file on a shared-memory filesystem (e.g.
//!   `/dev/shm/ivshmem_bench`), created and `mmap`'d by the Writer.
//! - **Guest side**: a device resource node exposing a PCI BAR (e.g.
//!   `/sys/bus/pci/devices/0000:00:04.0/resource2`); on absence, the guest
//!   falls back to the same shared-memory file, which is how this crate
//!   supports host-side smoke testing without a VM.

use crate::error::{IvshmemError, Result};
use std::ffi::CString;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;

/// A mapped backing object. Unmaps on drop; never unlinks the underlying
/// file (that is the owner's responsibility — unmap and unlink are kept
/// as separate, independently fallible steps).
pub struct BackingMapping {
    ptr: *mut u8,
    len: usize,
    path: PathBuf,
}

// SAFETY: the mapped region is shared with another OS process by design;
// all cross-peer-visible access goes through `FrameHeader`'s atomics plus
// the explicit fence protocol in `crate::protocol`.
unsafe impl Send for BackingMapping {}
unsafe impl Sync for BackingMapping {}

impl BackingMapping {
    /// Create (or truncate and reuse) a host-visible file of exactly `size`
    /// bytes and map it read-write. Zeroes the mapping so a prior run's
    /// bytes (including an all-`0xFF` stale region) never leak into a fresh
    /// run.
    pub fn create_file(path: &Path, size: usize) -> Result<Self> {
        let c_path = path_to_cstring(path)?;

        // SAFETY: c_path is a valid NUL-terminated path; O_CREAT|O_RDWR
        // opens-or-creates a regular file with owner read/write permissions.
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(IvshmemError::BackingOpen(io::Error::last_os_error()));
        }

        // SAFETY: fd is valid from the successful open above; size cast to
        // off_t is bounded by the caller-supplied region size (default 64
        // MiB, always far below off_t's range).
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; we are on an error path and fd is
            // not reused afterwards.
            unsafe { libc::close(fd) };
            return Err(IvshmemError::BackingOpen(err));
        }

        let mapping = Self::map_fd(fd, size, path)?;

        // SAFETY: mapping.ptr is valid for `size` bytes from the successful
        // mmap above, with PROT_WRITE permission, and no other reference to
        // this memory exists yet (the file was just created/truncated).
        unsafe {
            ptr::write_bytes(mapping.ptr, 0, size);
        }

        Ok(mapping)
    }

    /// Open an existing host-visible file and map it read-write, verifying
    /// it is at least `size` bytes (a larger backing file than the
    /// configured region is acceptable, only excess capacity is unused).
    pub fn open_file(path: &Path, size: usize) -> Result<Self> {
        let c_path = path_to_cstring(path)?;

        // SAFETY: c_path is a valid NUL-terminated path; O_RDWR opens an
        // existing file for read/write without creating one.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(IvshmemError::BackingOpen(io::Error::last_os_error()));
        }

        let actual = fd_size(fd).map_err(|e| {
            // SAFETY: fd is valid; we are on an error path.
            unsafe { libc::close(fd) };
            IvshmemError::BackingOpen(e)
        })?;
        if actual < size as u64 {
            // SAFETY: fd is valid; we are on an error path.
            unsafe { libc::close(fd) };
            return Err(IvshmemError::SizeMismatch {
                expected: size,
                actual: actual as usize,
            });
        }

        Self::map_fd(fd, size, path)
    }

    /// Open a PCI BAR resource node (guest side) and map the whole thing.
    /// The mapped length is whatever the resource node reports, not a
    /// caller-supplied size — PCI BAR sizes are fixed by the device.
    pub fn open_pci_bar(path: &Path) -> Result<Self> {
        let c_path = path_to_cstring(path)?;

        // SAFETY: c_path is a valid NUL-terminated path; O_RDWR is the
        // correct mode for a `resourceN` sysfs node backing an ivshmem BAR.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(IvshmemError::BackingOpen(io::Error::last_os_error()));
        }

        let size = fd_size(fd).map_err(|e| {
            // SAFETY: fd is valid; we are on an error path.
            unsafe { libc::close(fd) };
            IvshmemError::BackingOpen(e)
        })? as usize;

        Self::map_fd(fd, size, path)
    }

    /// Guest-side entry point: prefer the PCI BAR resource node if present,
    /// otherwise fall back to the same shared-memory file the host uses,
    /// enabling host-side smoke testing without a VM.
    pub fn open_guest(pci_bar: Option<&Path>, fallback_file: &Path, size: usize) -> Result<Self> {
        if let Some(bar) = pci_bar {
            if bar.exists() {
                return Self::open_pci_bar(bar);
            }
        }
        Self::open_file(fallback_file, size)
    }

    fn map_fd(fd: libc::c_int, size: usize, path: &Path) -> Result<Self> {
        // SAFETY: a null first argument lets the kernel pick the address;
        // size is the caller-validated mapping length; PROT_READ|PROT_WRITE
        // and MAP_SHARED are the correct flags for a cross-process mapping;
        // fd is valid from the caller's successful open/ftruncate sequence;
        // offset 0 maps from the start of the object.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd is valid from the caller; mmap (success or failure)
        // does not invalidate it; the mapping (if successful) holds its own
        // reference, so closing fd here is safe either way.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(IvshmemError::Mmap(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            len: size,
            path: path.to_path_buf(),
        })
    }

    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BackingMapping {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.len come from a successful mmap in one of
        // the constructors above and have not been unmapped before (Drop
        // runs once).
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// Remove a stale backing file left behind by a crashed run, so a fresh
/// Writer start never inherits leftover bytes. Idempotent: a missing file
/// is not an error.
pub fn cleanup_stale_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        IvshmemError::BackingOpen(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains an interior NUL byte",
        ))
    })
}

fn fd_size(fd: libc::c_int) -> io::Result<u64> {
    // SAFETY: fd is a valid, open file descriptor; stat is a plain
    // zeroed-then-filled POD struct.
    unsafe {
        let mut stat: libc::stat = std::mem::zeroed();
        if libc::fstat(fd, &mut stat) < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(stat.st_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(label: &str) -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ivshmem_bench_test_{label}_{ts}"))
    }

    #[test]
    fn create_then_open_round_trips_bytes() {
        let path = unique_path("roundtrip");
        let size = 4096;

        let created = BackingMapping::create_file(&path, size).expect("create");
        assert_eq!(created.len(), size);

        // SAFETY: offsets 0 and 1 are within the 4096-byte mapping.
        unsafe {
            *created.as_ptr() = 0x11;
            *created.as_ptr().add(1) = 0x22;
        }

        let opened = BackingMapping::open_file(&path, size).expect("open");
        // SAFETY: same mapping, offsets verified in bounds above.
        unsafe {
            assert_eq!(*opened.as_ptr(), 0x11);
            assert_eq!(*opened.as_ptr().add(1), 0x22);
        }

        drop(created);
        drop(opened);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn create_zeroes_a_stale_all_ff_file() {
        let path = unique_path("stale");
        std::fs::write(&path, vec![0xFFu8; 4096]).expect("seed stale file");

        let created = BackingMapping::create_file(&path, 4096).expect("create");
        // SAFETY: offset 0 is within the 4096-byte mapping.
        unsafe {
            assert_eq!(*created.as_ptr(), 0);
        }

        drop(created);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_file_rejects_undersized_backing() {
        let path = unique_path("undersized");
        std::fs::write(&path, vec![0u8; 100]).expect("seed small file");

        let result = BackingMapping::open_file(&path, 4096);
        assert!(matches!(result, Err(IvshmemError::SizeMismatch { .. })));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_guest_falls_back_when_pci_bar_absent() {
        let fallback = unique_path("fallback");
        BackingMapping::create_file(&fallback, 4096)
            .expect("create fallback")
            .path()
            .to_path_buf();

        let missing_bar = PathBuf::from("/nonexistent/ivshmem/resource2");
        let mapping =
            BackingMapping::open_guest(Some(&missing_bar), &fallback, 4096).expect("fallback open");
        assert_eq!(mapping.len(), 4096);

        drop(mapping);
        std::fs::remove_file(&fallback).ok();
    }

    #[test]
    fn cleanup_stale_file_is_idempotent() {
        let path = unique_path("cleanup");
        std::fs::write(&path, b"x").unwrap();
        assert!(cleanup_stale_file(&path).is_ok());
        assert!(cleanup_stale_file(&path).is_ok());
    }
}
