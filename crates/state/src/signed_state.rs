//! The signed-state value object and its reservation guard.

use crate::gc::GcHandle;
use crate::history::{LifecycleStamp, SignedStateHistory};
use crate::metrics::gc_metrics;
use crate::reservation::ReservationCounter;
use crate::sigset::{SigInsertOutcome, SigSet};
use keel_api::{LedgerState, SignatureVerifier};
use keel_types::config::StakeFraction;
use keel_types::error::{ReservationError, ReservationTier, StateManagerError};
use keel_types::{AddressBook, Event, NodeId, StateHash, StateSignature};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Policy flags fixed at state creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateFlags {
    /// The state was produced while the platform froze for an upgrade; its
    /// self-signature transaction uses the freeze type tag.
    pub freeze_state: bool,
    /// The state should be persisted once complete.
    pub state_to_save: bool,
}

/// A snapshot of the application state at a round boundary, together with
/// the signatures gathered over its root hash.
///
/// States are shared by reference and their lifetime is governed by the
/// dual reservation counter, not by `Arc` reference counts: dropping the
/// last `Arc` frees the struct, but the heavy application memory behind
/// `ledger` is released only through the archive and delete hooks, which
/// fire when the respective reservation tiers empty.
pub struct SignedState {
    round: u64,
    root_hash: OnceCell<StateHash>,
    events: Vec<Event>,
    ledger: Arc<dyn LedgerState>,
    address_book: Arc<AddressBook>,
    sigs: Mutex<SigSet>,
    flags: StateFlags,
    creation_time: Instant,
    history: Mutex<SignedStateHistory>,
    reservations: ReservationCounter,
    archived: AtomicBool,
    deleted: AtomicBool,
}

impl SignedState {
    /// Creates a state and hands the creator its strong reservation.
    ///
    /// The destruction callbacks are wired to `gc`: the archive intent is
    /// queued when the last strong reservation drops, the delete intent
    /// when the last weak reservation drops. If the collector rejects an
    /// intent (shutdown, full delete queue) the hook runs inline on the
    /// releasing thread.
    pub fn new(
        round: u64,
        events: Vec<Event>,
        ledger: Arc<dyn LedgerState>,
        address_book: Arc<AddressBook>,
        completion_threshold: StakeFraction,
        flags: StateFlags,
        gc: GcHandle,
    ) -> SignedStateGuard {
        let now = Instant::now();
        let total_stake = address_book.total_stake();
        let state = Arc::new_cyclic(|weak: &Weak<SignedState>| {
            let archive_hook = {
                let weak = weak.clone();
                let gc = gc.clone();
                move || {
                    if let Some(state) = weak.upgrade() {
                        if let Err(state) = gc.archive_background(state) {
                            state.try_archive();
                        }
                    }
                }
            };
            let delete_hook = {
                let weak = weak.clone();
                move || {
                    if let Some(state) = weak.upgrade() {
                        if let Err(state) = gc.delete_background(state) {
                            state.try_delete();
                        }
                    }
                }
            };
            let mut history = SignedStateHistory::new(now);
            history.record(LifecycleStamp::Created);
            SignedState {
                round,
                root_hash: OnceCell::new(),
                events,
                ledger,
                address_book,
                sigs: Mutex::new(SigSet::new(total_stake, completion_threshold)),
                flags,
                creation_time: now,
                history: Mutex::new(history),
                reservations: ReservationCounter::new(archive_hook, delete_hook),
                archived: AtomicBool::new(false),
                deleted: AtomicBool::new(false),
            }
        });
        SignedStateGuard {
            state,
            tier: ReservationTier::Strong,
        }
    }

    /// The consensus round this state snapshots.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The root hash, once assigned.
    pub fn root_hash(&self) -> Option<StateHash> {
        self.root_hash.get().copied()
    }

    /// Assigns the root hash. A hash is assigned exactly once; a second
    /// assignment is a lifecycle bug.
    pub fn set_root_hash(&self, hash: StateHash) -> Result<(), StateManagerError> {
        self.root_hash
            .set(hash)
            .map_err(|_| StateManagerError::HashAlreadySet(self.round))?;
        self.history.lock().record(LifecycleStamp::Hashed);
        Ok(())
    }

    /// The events that reached consensus in this round.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The roster this state's signatures are validated against.
    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.address_book
    }

    /// The application ledger handle.
    pub fn ledger(&self) -> &Arc<dyn LedgerState> {
        &self.ledger
    }

    /// Policy flags fixed at creation.
    pub fn flags(&self) -> StateFlags {
        self.flags
    }

    /// When the state object was constructed.
    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    /// Records a pre-validated signature carrying `stake`.
    pub fn record_signature(
        &self,
        node_id: NodeId,
        signature: StateSignature,
        stake: u64,
    ) -> SigInsertOutcome {
        let outcome = self.sigs.lock().insert(node_id, signature, stake);
        if matches!(outcome, SigInsertOutcome::Added { newly_complete: true }) {
            self.history.lock().record(LifecycleStamp::Complete);
        }
        outcome
    }

    /// Whether the gathered stake strictly exceeds the completion
    /// threshold.
    pub fn is_complete(&self) -> bool {
        self.sigs.lock().is_complete()
    }

    /// The stake sum of the recorded signers.
    pub fn signing_stake(&self) -> u128 {
        self.sigs.lock().signing_stake()
    }

    /// Whether `node_id` already signed this state.
    pub fn has_signature_from(&self, node_id: NodeId) -> bool {
        self.sigs.lock().contains(node_id)
    }

    /// Number of recorded signatures.
    pub fn signature_count(&self) -> usize {
        self.sigs.lock().len()
    }

    /// A snapshot of the recorded signatures in node-id order.
    pub fn signatures(&self) -> Vec<(NodeId, StateSignature)> {
        self.sigs
            .lock()
            .iter()
            .map(|(node_id, sig)| (*node_id, sig.clone()))
            .collect()
    }

    /// Re-validates the signature set against a trusted address book. Used
    /// on states received from reconnect or disk. Requires the root hash;
    /// an unhashed state has nothing to verify against.
    pub fn prune_invalid_signatures(
        &self,
        trusted: &AddressBook,
        verifier: &dyn SignatureVerifier,
    ) -> Result<(), StateManagerError> {
        let hash = self
            .root_hash()
            .ok_or(StateManagerError::HashMissing(self.round))?;
        self.sigs.lock().prune_invalid(&hash, trusted, verifier);
        Ok(())
    }

    /// Takes an additional reservation at `tier`, returning a guard that
    /// releases it on drop.
    pub fn try_reserve(self: &Arc<Self>, tier: ReservationTier) -> Result<SignedStateGuard, ReservationError> {
        match tier {
            ReservationTier::Strong => self.reservations.reserve_strong()?,
            ReservationTier::Weak => self.reservations.reserve_weak()?,
        }
        Ok(SignedStateGuard {
            state: self.clone(),
            tier,
        })
    }

    /// Whether the archive hook has run.
    pub fn is_archived(&self) -> bool {
        self.archived.load(Ordering::Acquire)
    }

    /// Whether the delete hook has run.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// A rendering of the lifecycle history for diagnostics.
    pub fn debug_history(&self) -> String {
        format!("{:?}", self.history.lock())
    }

    /// Records a lifecycle transition in the diagnostic history.
    pub fn stamp(&self, stamp: LifecycleStamp) {
        self.history.lock().record(stamp);
    }

    /// Runs the application's archive hook, once.
    pub(crate) fn try_archive(&self) {
        if self.archived.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stamp(LifecycleStamp::Archived);
        self.ledger.archive();
        gc_metrics().inc_states_archived();
        tracing::debug!(target: "gc", round = self.round, "state archived");
    }

    /// Runs the application's release hook, once, always after the archive
    /// hook.
    pub(crate) fn try_delete(&self) {
        self.try_archive();
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stamp(LifecycleStamp::Deleted);
        self.ledger.release();
        gc_metrics().inc_states_deleted();
        tracing::debug!(target: "gc", round = self.round, "state deleted");
    }
}

impl std::fmt::Debug for SignedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedState")
            .field("round", &self.round)
            .field("root_hash", &self.root_hash.get())
            .field("signing_stake", &self.signing_stake())
            .field("reservations", &self.reservations)
            .finish()
    }
}

/// A scoped reservation over a [`SignedState`].
///
/// Dropping the guard releases the reservation; whoever releases the last
/// reservation of a tier triggers that tier's destruction path.
pub struct SignedStateGuard {
    state: Arc<SignedState>,
    tier: ReservationTier,
}

impl SignedStateGuard {
    /// The tier this guard holds.
    pub fn tier(&self) -> ReservationTier {
        self.tier
    }

    /// Takes an additional reservation at the same tier.
    pub fn try_clone(&self) -> Result<SignedStateGuard, ReservationError> {
        self.state.try_reserve(self.tier)
    }

    /// Takes an additional reservation at `tier`, which may differ from
    /// this guard's tier (e.g. a weak wrapper derived from a strong one).
    pub fn try_reserve_as(&self, tier: ReservationTier) -> Result<SignedStateGuard, ReservationError> {
        self.state.try_reserve(tier)
    }

    /// The shared state handle.
    pub fn state(&self) -> &Arc<SignedState> {
        &self.state
    }
}

impl Deref for SignedStateGuard {
    type Target = SignedState;

    fn deref(&self) -> &SignedState {
        &self.state
    }
}

impl Drop for SignedStateGuard {
    fn drop(&mut self) {
        match self.tier {
            ReservationTier::Strong => self.state.reservations.release_strong(),
            ReservationTier::Weak => self.state.reservations.release_weak(),
        }
    }
}

impl std::fmt::Debug for SignedStateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedStateGuard")
            .field("round", &self.state.round())
            .field("tier", &self.tier)
            .finish()
    }
}
