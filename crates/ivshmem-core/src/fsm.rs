// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The dual finite-state machine: one enum per peer, each owned exclusively
//! by that peer. Neither peer ever stores into the other's state word — a
//! peer that observes an unexpected state logs and waits rather than
//! forcing the counterparty.
//!
//! Wire values are fixed (not an implementation detail) so both peers agree
//! on the numeric encoding regardless of which language maps them to a sum
//! type.

use std::fmt;

/// Writer-owned state, stored in the region's `writer_state` field.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Uninitialised = 0,
    Initialising = 1,
    Ready = 2,
    Sending = 3,
    Completed = 4,
}

/// Reader-owned state, stored in the region's `reader_state` field.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Uninitialised = 0,
    WaitingForWriter = 1,
    Ready = 2,
    Processing = 3,
    Acknowledged = 4,
}

impl WriterState {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uninitialised),
            1 => Some(Self::Initialising),
            2 => Some(Self::Ready),
            3 => Some(Self::Sending),
            4 => Some(Self::Completed),
            _ => None,
        }
    }
}

impl ReaderState {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uninitialised),
            1 => Some(Self::WaitingForWriter),
            2 => Some(Self::Ready),
            3 => Some(Self::Processing),
            4 => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialised => "UNINITIALISED",
            Self::Initialising => "INITIALISING",
            Self::Ready => "READY",
            Self::Sending => "SENDING",
            Self::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialised => "UNINITIALISED",
            Self::WaitingForWriter => "WAITING_FOR_WRITER",
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
            Self::Acknowledged => "ACKNOWLEDGED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_state_wire_values_are_fixed() {
        assert_eq!(WriterState::Uninitialised.as_u32(), 0);
        assert_eq!(WriterState::Initialising.as_u32(), 1);
        assert_eq!(WriterState::Ready.as_u32(), 2);
        assert_eq!(WriterState::Sending.as_u32(), 3);
        assert_eq!(WriterState::Completed.as_u32(), 4);
    }

    #[test]
    fn reader_state_wire_values_are_fixed() {
        assert_eq!(ReaderState::Uninitialised.as_u32(), 0);
        assert_eq!(ReaderState::WaitingForWriter.as_u32(), 1);
        assert_eq!(ReaderState::Ready.as_u32(), 2);
        assert_eq!(ReaderState::Processing.as_u32(), 3);
        assert_eq!(ReaderState::Acknowledged.as_u32(), 4);
    }

    #[test]
    fn round_trips_through_from_u32() {
        for v in 0..5u32 {
            assert_eq!(WriterState::from_u32(v).unwrap().as_u32(), v);
            assert_eq!(ReaderState::from_u32(v).unwrap().as_u32(), v);
        }
        assert!(WriterState::from_u32(5).is_none());
        assert!(ReaderState::from_u32(5).is_none());
    }
}
