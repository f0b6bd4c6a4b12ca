//! The digest newtype used to identify a signed state.

use crate::error::CryptoError;
use parity_scale_codec::{Decode, Encode};
use std::fmt;

/// Byte length of a state root digest (SHA-384).
pub const STATE_HASH_BYTES: usize = 48;

/// The root hash of the application state at a round boundary.
///
/// A `StateHash` is the identity of a signed state: nodes sign this digest,
/// and two states are interchangeable exactly when their hashes are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct StateHash([u8; STATE_HASH_BYTES]);

impl StateHash {
    /// Wraps a raw 48-byte digest.
    pub const fn new(bytes: [u8; STATE_HASH_BYTES]) -> Self {
        Self(bytes)
    }

    /// Builds a hash from a byte slice, rejecting any length other than 48.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; STATE_HASH_BYTES] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidHashLength {
                    expected: STATE_HASH_BYTES,
                    got: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; STATE_HASH_BYTES] {
        &self.0
    }

    /// An abbreviated hex rendering for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl AsRef<[u8]> for StateHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateHash({}…)", self.short())
    }
}
