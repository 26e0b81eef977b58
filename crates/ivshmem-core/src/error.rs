// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the ivshmem benchmark core.
//!
//! Mirrors the fatal/data split of the protocol's error handling design:
//! [`IvshmemError`] covers setup and handshake failures, which are fatal for
//! the affected peer, while per-iteration timeouts and integrity failures are
//! *not* modelled as errors here — they are recorded as data on
//! [`crate::record::IterationRecord`] and never abort the suite.

use std::fmt;
use std::io;
use std::time::Duration;

/// Errors that abort a peer (setup failure or handshake timeout).
#[derive(Debug)]
pub enum IvshmemError {
    /// The backing object could not be opened, created, or sized.
    BackingOpen(io::Error),

    /// `mmap` of the backing object failed.
    Mmap(io::Error),

    /// The backing object's size does not match the configured region size.
    SizeMismatch { expected: usize, actual: usize },

    /// A payload larger than the region's payload capacity was requested.
    PayloadTooLarge { size: usize, capacity: usize },

    /// The initial handshake (Reader waiting for `magic = ready`, or Writer
    /// waiting for a sane Reader state) did not complete within its bound.
    HandshakeTimeout { waited: Duration },

    /// A state word held a value outside its enum's valid range.
    InvalidStateValue { field: &'static str, value: u32 },
}

impl fmt::Display for IvshmemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackingOpen(e) => write!(f, "backing object open/create failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "backing object size mismatch: expected {expected} bytes, found {actual}"
            ),
            Self::PayloadTooLarge { size, capacity } => write!(
                f,
                "payload too large: {size} bytes exceeds region capacity {capacity}"
            ),
            Self::HandshakeTimeout { waited } => {
                write!(f, "handshake timed out after {waited:?}")
            }
            Self::InvalidStateValue { field, value } => {
                write!(f, "invalid value {value} observed for state field {field}")
            }
        }
    }
}

impl std::error::Error for IvshmemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BackingOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for fatal, setup-level operations.
pub type Result<T> = std::result::Result<T, IvshmemError>;
