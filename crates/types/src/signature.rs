//! The signature newtype carried in signature sets and system transactions.

use parity_scale_codec::{Decode, Encode};
use std::fmt;

/// A node's signature over a state root hash.
///
/// The byte layout is opaque to this subsystem; only the configured
/// verifier interprets it.
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct StateSignature(Vec<u8>);

impl StateSignature {
    /// Wraps raw signature bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the signature in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the signature is empty (never valid, but representable).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for StateSignature {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for StateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.0[..self.0.len().min(4)];
        write!(f, "StateSignature({} bytes, {}…)", self.0.len(), hex::encode(head))
    }
}
