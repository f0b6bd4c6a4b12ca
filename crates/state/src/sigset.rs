//! The per-state signature set with its running signed-stake sum.

use keel_api::{SignatureVerifier, VerificationItem};
use keel_types::config::StakeFraction;
use keel_types::{AddressBook, NodeId, StateHash, StateSignature};
use std::collections::BTreeMap;

/// Result of inserting a signature into a [`SigSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigInsertOutcome {
    /// The signer already had a signature recorded; nothing changed.
    Duplicate,
    /// The signature was recorded.
    Added {
        /// True when this insertion carried the set across the completion
        /// threshold.
        newly_complete: bool,
    },
}

/// Sparse set of `(node id -> signature)` with a cached signed-stake sum.
///
/// Callers validate signatures before insertion; the set itself only
/// enforces per-signer uniqueness and the stake arithmetic. Completeness is
/// monotone under insertion and can only regress through
/// [`SigSet::prune_invalid`], which re-grounds the set in a trusted address
/// book after a roster swap.
#[derive(Debug)]
pub struct SigSet {
    entries: BTreeMap<NodeId, StateSignature>,
    signing_stake: u128,
    total_stake: u128,
    threshold: StakeFraction,
}

impl SigSet {
    /// An empty set measured against `total_stake` and `threshold`.
    pub fn new(total_stake: u128, threshold: StakeFraction) -> Self {
        Self {
            entries: BTreeMap::new(),
            signing_stake: 0,
            total_stake,
            threshold,
        }
    }

    /// Records a validated signature carrying `stake`. Idempotent per
    /// signer: a second signature from the same node is dropped, whatever
    /// its bytes.
    pub fn insert(&mut self, node_id: NodeId, signature: StateSignature, stake: u64) -> SigInsertOutcome {
        if self.entries.contains_key(&node_id) {
            return SigInsertOutcome::Duplicate;
        }
        let was_complete = self.is_complete();
        self.entries.insert(node_id, signature);
        self.signing_stake += u128::from(stake);
        SigInsertOutcome::Added {
            newly_complete: !was_complete && self.is_complete(),
        }
    }

    /// Whether the recorded stake strictly exceeds the completion
    /// threshold.
    pub fn is_complete(&self) -> bool {
        self.threshold
            .is_exceeded_by(self.signing_stake, self.total_stake)
    }

    /// The cached sum of the signers' stakes.
    pub fn signing_stake(&self) -> u128 {
        self.signing_stake
    }

    /// The roster-wide stake the threshold is measured against.
    pub fn total_stake(&self) -> u128 {
        self.total_stake
    }

    /// Number of recorded signatures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no signatures are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `node_id` has a signature recorded.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.entries.contains_key(&node_id)
    }

    /// Iterates `(signer, signature)` in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &StateSignature)> {
        self.entries.iter()
    }

    /// Re-validates every entry against a trusted address book, dropping
    /// unknown signers and cryptographically invalid signatures, and
    /// recomputing the stake sums from the trusted roster.
    ///
    /// Used when a state arrives from reconnect or disk: the signatures it
    /// carries were validated under someone else's roster, or not at all.
    /// Idempotent for a fixed trusted book.
    pub fn prune_invalid(
        &mut self,
        hash: &StateHash,
        trusted: &AddressBook,
        verifier: &dyn SignatureVerifier,
    ) {
        let candidates: Vec<(NodeId, StateSignature)> = self
            .entries
            .iter()
            .filter(|(node_id, _)| trusted.contains(**node_id))
            .map(|(node_id, sig)| (*node_id, sig.clone()))
            .collect();

        let items: Vec<VerificationItem<'_>> = candidates
            .iter()
            .filter_map(|(node_id, sig)| {
                trusted.public_key(*node_id).map(|pk| VerificationItem {
                    hash: hash.as_ref(),
                    signature: sig.as_bytes(),
                    public_key: pk,
                })
            })
            .collect();
        let verdicts = verifier.verify_parallel(&items);

        let mut entries = BTreeMap::new();
        let mut signing_stake: u128 = 0;
        for ((node_id, sig), valid) in candidates.into_iter().zip(verdicts) {
            if !valid {
                continue;
            }
            if let Some(stake) = trusted.stake(node_id) {
                signing_stake += u128::from(stake);
                entries.insert(node_id, sig);
            }
        }

        self.entries = entries;
        self.signing_stake = signing_stake;
        self.total_stake = trusted.total_stake();
    }
}
