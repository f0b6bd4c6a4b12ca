//! Opaque consensus events associated with a signed state.

use crate::address_book::NodeId;
use parity_scale_codec::{Decode, Encode};

/// A consensus event retained alongside a signed state.
///
/// The payload is opaque to this subsystem. Events ride on the state only so
/// that diagnostics and recovery tooling can reconstruct what fed the round.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Event {
    /// The round the event reached consensus in.
    pub round: u64,
    /// The node that created the event.
    pub creator: NodeId,
    /// Opaque event payload.
    pub payload: Vec<u8>,
}

impl Event {
    /// Creates an event with an opaque payload.
    pub fn new(round: u64, creator: NodeId, payload: Vec<u8>) -> Self {
        Self {
            round,
            creator,
            payload,
        }
    }
}
