//! A canonical, self-contained encoding of a complete signed state.
//!
//! Bundles are what the reconnect teacher sends to a learner and what the
//! disk loader reads back at boot: round, root hash, events, and the raw
//! signature set. The application ledger travels separately; rehydration
//! pairs a bundle with a ledger handle and a roster. Signatures inside a
//! bundle are untrusted until the manager prunes them against its own
//! address book.

use crate::gc::GcHandle;
use crate::signed_state::{SignedState, SignedStateGuard, StateFlags};
use keel_api::LedgerState;
use keel_types::codec;
use keel_types::config::StakeFraction;
use keel_types::error::StateManagerError;
use keel_types::{AddressBook, Event, NodeId, StateHash, StateSignature};
use parity_scale_codec::{Decode, Encode};
use std::sync::Arc;

/// The wire form of a complete signed state.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SignedStateBundle {
    /// The snapshotted round.
    pub round: u64,
    /// The root hash the signatures cover.
    pub root_hash: StateHash,
    /// The round's consensus events.
    pub events: Vec<Event>,
    /// The gathered signatures in node-id order.
    pub signatures: Vec<(NodeId, StateSignature)>,
    /// Whether the state was produced during a freeze.
    pub freeze_state: bool,
    /// Whether the state was marked for persistence.
    pub state_to_save: bool,
}

impl SignedStateBundle {
    /// Captures a bundle from a hashed state.
    pub fn from_state(state: &SignedState) -> Result<Self, StateManagerError> {
        let root_hash = state
            .root_hash()
            .ok_or(StateManagerError::HashMissing(state.round()))?;
        let flags = state.flags();
        Ok(Self {
            round: state.round(),
            root_hash,
            events: state.events().to_vec(),
            signatures: state.signatures(),
            freeze_state: flags.freeze_state,
            state_to_save: flags.state_to_save,
        })
    }

    /// Canonical SCALE encoding.
    pub fn encode_canonical(&self) -> Vec<u8> {
        codec::to_bytes_canonical(self)
    }

    /// Decodes a canonical encoding, rejecting malformed bytes.
    pub fn decode_canonical(bytes: &[u8]) -> Result<Self, String> {
        codec::from_bytes_canonical(bytes)
    }

    /// Rehydrates the bundle into a live state.
    ///
    /// Signature stakes are looked up in `address_book`; signers missing
    /// from it are carried with zero stake so a later prune against the
    /// trusted roster decides their fate.
    pub fn into_signed_state(
        self,
        ledger: Arc<dyn LedgerState>,
        address_book: Arc<AddressBook>,
        completion_threshold: StakeFraction,
        gc: GcHandle,
    ) -> Result<SignedStateGuard, StateManagerError> {
        let flags = StateFlags {
            freeze_state: self.freeze_state,
            state_to_save: self.state_to_save,
        };
        let guard = SignedState::new(
            self.round,
            self.events,
            ledger,
            address_book.clone(),
            completion_threshold,
            flags,
            gc,
        );
        guard.set_root_hash(self.root_hash)?;
        for (node_id, signature) in self.signatures {
            let stake = address_book.stake(node_id).unwrap_or(0);
            guard.record_signature(node_id, signature, stake);
        }
        Ok(guard)
    }
}
