//! Token fingerprints.
//!
//! Caches keyed by bearer tokens store a 64-bit xxHash of the token instead
//! of the token itself: lookups stay cheap, entries stay small and no secret
//! is kept in memory longer than the request that carried it.

use xxhash_rust::xxh64::xxh64;

const SEED: u64 = 0;

/// 64-bit fingerprint of `token`.
#[inline]
pub fn fingerprint(token: &str) -> u64 {
    xxh64(token.as_bytes(), SEED)
}

/// Lower-case hex form of [`fingerprint`], usable as a remote cache key.
pub fn fingerprint_hex(token: &str) -> String {
    format!("{:x}", fingerprint(token))
}
