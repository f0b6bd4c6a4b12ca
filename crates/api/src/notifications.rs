//! Observer traits for ISS detector outcomes.
//!
//! Dispatch is synchronous on the detecting thread: handlers must be quick
//! and must not call back into the detector. Lifecycle notifications that
//! carry a reserved state are defined next to the state type in
//! `keel-state`; the ISS notifications here are plain data.

use keel_types::StateHash;

/// Receives ISS classifications for completed rounds.
///
/// Every method has a no-op default so implementations subscribe only to
/// the outcomes they care about.
pub trait IssNotifier: Send + Sync {
    /// The round's hash comparison concluded: fired exactly once per round
    /// that reaches a VALID or SELF_ISS verdict.
    fn state_hash_validity(
        &self,
        _round: u64,
        _self_hash: &StateHash,
        _consensus_hash: &StateHash,
    ) {
    }

    /// This node's hash disagrees with the network consensus hash.
    fn self_iss(&self, _round: u64, _self_hash: &StateHash, _consensus_hash: &StateHash) {}

    /// No hash can reach a strong minority of stake for the round. The node
    /// keeps running; halting is external policy.
    fn catastrophic_iss(&self, _round: u64, _self_hash: Option<&StateHash>) {}
}

/// An `IssNotifier` that ignores every outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopIssNotifier;

impl IssNotifier for NopIssNotifier {}
