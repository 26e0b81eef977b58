// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload integrity digest, computed during the Reader's verify phase.

use sha2::{Digest as _, Sha256};

/// Width of the digest written to `FrameHeader::digest`.
pub const DIGEST_SIZE: usize = 32;

/// Compute the SHA-256 digest of `bytes`.
#[must_use]
pub fn compute_digest(bytes: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&result);
    out
}

/// Compare a locally computed digest against one read from the region.
#[must_use]
pub fn digests_match(expected: &[u8; DIGEST_SIZE], actual: &[u8; DIGEST_SIZE]) -> bool {
    expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = compute_digest(b"ivshmem payload");
        let b = compute_digest(b"ivshmem payload");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_payload() {
        let a = compute_digest(b"payload A");
        let b = compute_digest(b"payload B");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_payload_has_known_digest() {
        // SHA-256 of the empty string.
        let expected = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(compute_digest(b""), expected);
    }
}
