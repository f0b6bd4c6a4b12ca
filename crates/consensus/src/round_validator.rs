//! Per-round combination of this node's own hash with the network's
//! reported hashes.

use crate::hash_finder::{ConsensusHashFinder, HashFinderStatus};
use keel_types::{NodeId, StateHash};

/// The verdict for a round's state hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashValidityStatus {
    /// Still waiting for evidence.
    Undecided,
    /// This node's hash matches the consensus hash.
    Valid,
    /// Consensus settled on a hash different from this node's.
    SelfIss,
    /// No hash can gather a strong minority of stake.
    CatastrophicIss,
    /// The round left the window before enough evidence arrived.
    LackOfData,
    /// The round left the window undecided even though a supermajority of
    /// stake reported: conflicting hashes prevented any verdict.
    CatastrophicLackOfData,
}

impl HashValidityStatus {
    /// Whether a verdict has been reached.
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Undecided)
    }

    /// Stable label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Valid => "valid",
            Self::SelfIss => "self-iss",
            Self::CatastrophicIss => "catastrophic-iss",
            Self::LackOfData => "lack-of-data",
            Self::CatastrophicLackOfData => "catastrophic-lack-of-data",
        }
    }
}

/// The one-shot outcome produced when a validator decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundDecision {
    /// The decided round.
    pub round: u64,
    /// The verdict.
    pub status: HashValidityStatus,
    /// This node's hash for the round, when it was reported in time.
    pub self_hash: Option<StateHash>,
    /// The network's consensus hash, when one was found.
    pub consensus_hash: Option<StateHash>,
}

/// Tracks one round until its hash validity is decided.
///
/// The status is monotone after the first decision: every reporting method
/// returns `Some(decision)` exactly once, on the call that crossed the
/// decision boundary.
#[derive(Debug)]
pub struct RoundHashValidator {
    round: u64,
    self_hash: Option<StateHash>,
    finder: ConsensusHashFinder,
    status: HashValidityStatus,
}

impl RoundHashValidator {
    /// A validator for `round` against `total_stake`.
    pub fn new(round: u64, total_stake: u128) -> Self {
        Self {
            round,
            self_hash: None,
            finder: ConsensusHashFinder::new(round, total_stake),
            status: HashValidityStatus::Undecided,
        }
    }

    /// The round under validation.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The current verdict.
    pub fn status(&self) -> HashValidityStatus {
        self.status
    }

    /// This node's hash, if reported.
    pub fn self_hash(&self) -> Option<StateHash> {
        self.self_hash
    }

    /// The underlying hash finder, for partition diagnostics.
    pub fn finder(&self) -> &ConsensusHashFinder {
        &self.finder
    }

    /// Records this node's own hash for the round. Reported once; a
    /// conflicting second report is ignored (the state is hashed exactly
    /// once upstream).
    pub fn report_self_hash(&mut self, hash: StateHash) -> Option<RoundDecision> {
        if let Some(existing) = self.self_hash {
            if existing != hash {
                tracing::warn!(
                    target: "iss",
                    round = self.round,
                    existing = %existing.short(),
                    ignored = %hash.short(),
                    "conflicting self hash reported for an already-hashed round"
                );
            }
            return None;
        }
        self.self_hash = Some(hash);
        self.evaluate()
    }

    /// Records a network node's hash backed by `stake`.
    pub fn report_network_hash(
        &mut self,
        node_id: NodeId,
        stake: u64,
        hash: StateHash,
    ) -> Option<RoundDecision> {
        self.finder.add_hash(node_id, stake, hash);
        self.evaluate()
    }

    /// Forces a verdict because the round is leaving the tracking window.
    pub fn out_of_time(&mut self) -> Option<RoundDecision> {
        if self.status.is_decided() {
            return None;
        }
        let status = match self.finder.status() {
            HashFinderStatus::CatastrophicIss => HashValidityStatus::CatastrophicIss,
            // The network agreed but our own hash never arrived.
            HashFinderStatus::Decided(_) => HashValidityStatus::LackOfData,
            HashFinderStatus::Undecided => {
                let reported = self.finder.reported_stake();
                if reported * 3 > self.finder.total_stake() * 2 {
                    HashValidityStatus::CatastrophicLackOfData
                } else {
                    HashValidityStatus::LackOfData
                }
            }
        };
        Some(self.decide(status))
    }

    fn evaluate(&mut self) -> Option<RoundDecision> {
        if self.status.is_decided() {
            return None;
        }
        match self.finder.status() {
            HashFinderStatus::CatastrophicIss => Some(self.decide(HashValidityStatus::CatastrophicIss)),
            HashFinderStatus::Decided(consensus) => match self.self_hash {
                Some(own) if own == consensus => Some(self.decide(HashValidityStatus::Valid)),
                Some(_) => Some(self.decide(HashValidityStatus::SelfIss)),
                // The network has decided; wait for our own hash until the
                // window closes.
                None => None,
            },
            HashFinderStatus::Undecided => None,
        }
    }

    fn decide(&mut self, status: HashValidityStatus) -> RoundDecision {
        self.status = status;
        RoundDecision {
            round: self.round,
            status,
            self_hash: self.self_hash,
            consensus_hash: self.finder.consensus_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> StateHash {
        StateHash::new([byte; 48])
    }

    fn node(id: u64) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn matching_hashes_are_valid() {
        let mut validator = RoundHashValidator::new(10, 100);
        assert!(validator.report_self_hash(hash(1)).is_none());
        assert!(validator.report_network_hash(node(1), 25, hash(1)).is_none());
        let decision = validator
            .report_network_hash(node(2), 25, hash(1))
            .expect("50 stake on one hash decides");
        assert_eq!(decision.status, HashValidityStatus::Valid);
        assert_eq!(decision.consensus_hash, Some(hash(1)));
        assert_eq!(decision.self_hash, Some(hash(1)));
    }

    #[test]
    fn self_iss_when_consensus_disagrees() {
        let mut validator = RoundHashValidator::new(10, 100);
        validator.report_self_hash(hash(9));
        validator.report_network_hash(node(1), 25, hash(1));
        validator.report_network_hash(node(2), 25, hash(1));
        let decision = validator
            .report_network_hash(node(3), 25, hash(1))
            .expect("75 stake against 25 decides");
        assert_eq!(decision.status, HashValidityStatus::SelfIss);
        assert_eq!(decision.self_hash, Some(hash(9)));
        assert_eq!(decision.consensus_hash, Some(hash(1)));
    }

    #[test]
    fn decision_waits_for_self_hash_then_times_out() {
        let mut validator = RoundHashValidator::new(10, 100);
        validator.report_network_hash(node(1), 30, hash(1));
        let decided_without_self = validator.report_network_hash(node(2), 30, hash(1));
        assert!(decided_without_self.is_none(), "waits for the self hash");

        let decision = validator.out_of_time().expect("window closing forces it");
        assert_eq!(decision.status, HashValidityStatus::LackOfData);
        assert_eq!(decision.consensus_hash, Some(hash(1)));
        assert_eq!(decision.self_hash, None);
    }

    #[test]
    fn catastrophic_split_decides_immediately() {
        let mut validator = RoundHashValidator::new(10, 100);
        for id in 1..=3u64 {
            assert!(validator
                .report_network_hash(node(id), 25, hash(id as u8))
                .is_none());
        }
        let decision = validator
            .report_network_hash(node(4), 25, hash(4))
            .expect("75 outside the leader exceeds two thirds");
        assert_eq!(decision.status, HashValidityStatus::CatastrophicIss);
        assert_eq!(decision.consensus_hash, None);
    }

    #[test]
    fn quiet_round_times_out_as_lack_of_data() {
        let mut validator = RoundHashValidator::new(10, 100);
        validator.report_self_hash(hash(1));
        let decision = validator.out_of_time().unwrap();
        assert_eq!(decision.status, HashValidityStatus::LackOfData);
        // A second forcing is a no-op.
        assert!(validator.out_of_time().is_none());
    }

    #[test]
    fn undecided_supermajority_times_out_catastrophically() {
        let mut validator = RoundHashValidator::new(10, 100);
        validator.report_network_hash(node(1), 30, hash(1));
        validator.report_network_hash(node(2), 30, hash(2));
        validator.report_network_hash(node(3), 10, hash(3));
        // 70 of 100 reported but no partition holds a strong minority and
        // the split is not yet provably unresolvable.
        let decision = validator.out_of_time().unwrap();
        assert_eq!(decision.status, HashValidityStatus::CatastrophicLackOfData);
    }
}
