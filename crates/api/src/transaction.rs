//! The system transaction seam and the bit-exact state-signature payload.
//!
//! The payload layout is part of the platform's wire contract and must not
//! drift: one type tag byte, the round as a big-endian `u64`, the 48-byte
//! root hash, then the raw signature bytes.

use bytes::Bytes;
use keel_types::hash::STATE_HASH_BYTES;
use keel_types::{StateHash, StateSignature};

/// Type tag for a state signature produced during a freeze.
pub const SYSTEM_TX_FREEZE_STATE: u8 = 0x01;
/// Type tag for an ordinary state signature.
pub const SYSTEM_TX_STATE_SIGNATURE: u8 = 0x02;

/// Submits system transactions into the transaction pipeline.
pub trait SystemTransactionSubmitter: Send + Sync {
    /// Hands a payload to the pipeline. Returns `false` when the pipeline
    /// rejected it (e.g. the node is shutting down); the caller logs and
    /// continues, since peers can still complete the state without this
    /// node's signature.
    fn submit(&self, payload: Bytes) -> bool;
}

/// A decoded state-signature payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSignaturePayload {
    /// Whether the signature was produced during a freeze.
    pub freeze: bool,
    /// The signed round.
    pub round: u64,
    /// The signed root hash.
    pub hash: StateHash,
    /// The signer's signature over the hash.
    pub signature: StateSignature,
}

/// Encodes a state-signature payload into its wire form.
pub fn encode_state_signature_payload(
    freeze: bool,
    round: u64,
    hash: &StateHash,
    signature: &StateSignature,
) -> Bytes {
    let mut buf = Vec::with_capacity(1 + 8 + STATE_HASH_BYTES + signature.len());
    buf.push(if freeze {
        SYSTEM_TX_FREEZE_STATE
    } else {
        SYSTEM_TX_STATE_SIGNATURE
    });
    buf.extend_from_slice(&round.to_be_bytes());
    buf.extend_from_slice(hash.as_bytes());
    buf.extend_from_slice(signature.as_bytes());
    Bytes::from(buf)
}

/// Decodes a state-signature payload, rejecting malformed framing.
pub fn decode_state_signature_payload(bytes: &[u8]) -> Result<StateSignaturePayload, String> {
    const HEADER: usize = 1 + 8 + STATE_HASH_BYTES;
    if bytes.len() < HEADER {
        return Err(format!(
            "state-signature payload too short: {} bytes",
            bytes.len()
        ));
    }
    let freeze = match bytes[0] {
        SYSTEM_TX_FREEZE_STATE => true,
        SYSTEM_TX_STATE_SIGNATURE => false,
        tag => return Err(format!("unknown system transaction tag 0x{:02x}", tag)),
    };
    let round = u64::from_be_bytes(
        bytes[1..9]
            .try_into()
            .map_err(|_| "round field truncated".to_string())?,
    );
    let hash = StateHash::from_slice(&bytes[9..HEADER]).map_err(|e| e.to_string())?;
    let signature = StateSignature::new(bytes[HEADER..].to_vec());
    Ok(StateSignaturePayload {
        freeze,
        round,
        hash,
        signature,
    })
}
