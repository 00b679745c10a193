// src/hash.rs
//! Content hashing for cache identities.
//!
//! Two hash widths are used:
//! - a streaming 32-bit hash whose 8-digit hex digest goes *into* cache
//!   identity strings (constructed-content sources),
//! - a 64-bit hash over the full identity string used as the cache file name.
//!
//! Digests are stable across platforms and runs; identity strings built from
//! the same inputs always hash the same.

use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh32::Xxh32;

/// Streaming 32-bit content hasher.
///
/// Feed it bytes in a fixed, documented order; the digest is order-sensitive.
pub struct ContentHasher {
    state: Xxh32,
}

impl ContentHasher {
    #[inline]
    pub fn new() -> Self {
        Self { state: Xxh32::new(0) }
    }

    /// Absorb raw bytes.
    #[inline]
    pub fn update(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }

    /// Absorb a string as UTF-8 bytes.
    #[inline]
    pub fn update_str(&mut self, text: &str) {
        self.state.update(text.as_bytes());
    }

    /// Absorb a `u32` in little-endian byte order.
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.state.update(&value.to_le_bytes());
    }

    /// Final 32-bit digest.
    #[inline]
    pub fn finish(&self) -> u32 {
        self.state.digest()
    }

    /// Final digest as 8 lowercase hex digits.
    #[inline]
    pub fn finish_hex(&self) -> String {
        format!("{:08x}", self.finish())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot 8-hex-digit digest of a byte slice.
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.finish_hex()
}

/// Stable file-name key for a cache identity string (16 hex digits).
///
/// Identity strings contain path separators and are unbounded in length, so
/// they cannot be used as file names directly.
#[inline]
pub fn file_key(identity: &str) -> String {
    format!("{:016x}", xxh3_64(identity.as_bytes()))
}
