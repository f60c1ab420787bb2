// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Program, file and data hashing plus the deterministic RNG
//!
//! All hashes are xxh64 with seed 0 so every node computes the same value for the
//! same bytes. 32-bit hashes are the low half of the 64-bit digest.

use xxhash_rust::xxh64::xxh64;

/// 64-bit content hash (file hashes, data segment checkpoints)
pub fn hash64(bytes: &[u8]) -> u64 {
    xxh64(bytes, 0)
}

/// 32-bit name hash (program names, sync groups, published variables)
pub fn hash32(name: &str) -> u32 {
    xxh64(name.as_bytes(), 0) as u32
}

/// RNG seed derived from the device MAC address.
///
/// `mac[5]` lands in both the lowest byte and bits 40..48; `mac[0]` never contributes.
/// Deployed devices derive their sequences this way, so it stays as is.
pub fn rng_seed_from_mac(mac: &[u8; 6]) -> u64 {
    ((mac[5] as u64) << 40)
        | ((mac[4] as u64) << 32)
        | ((mac[3] as u64) << 24)
        | ((mac[2] as u64) << 16)
        | ((mac[1] as u64) << 8)
        | (mac[5] as u64)
}

/// Replacement state when the seed is zero (xorshift never leaves zero)
const RNG_ZERO_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Advance the xorshift64 state and return the next non-negative value
pub fn next_random(state: &mut u64) -> i32 {
    let mut x = if *state == 0 { RNG_ZERO_SEED } else { *state };
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    (x >> 33) as i32
}
