//! Defines the canonical, deterministic binary codec for consensus-critical
//! data.
//!
//! This module provides simple wrappers around `parity-scale-codec` (SCALE),
//! chosen for its compact and deterministic properties. Centralizing the
//! codec here ensures every component uses the exact same serialization for
//! data that crosses a trust boundary (state bundles, buffered signatures),
//! preventing divergence caused by differing binary representations of the
//! same value.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical SCALE byte representation.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from a canonical byte representation, failing fast on any
/// trailing or malformed bytes.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}
