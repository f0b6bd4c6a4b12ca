//! The central orchestrator of the signed-state lifecycle: intake,
//! signature fan-in, promotion, and window maintenance.

use crate::metrics::state_metrics;
use crate::sequence::SequenceSet;
use keel_api::transaction::encode_state_signature_payload;
use keel_api::{HashSigner, LedgerState, SignatureVerifier, SystemTransactionSubmitter, TreeHasher};
use keel_state::signed_state::SignedState;
use keel_state::{
    GcHandle, LifecycleStamp, SignedStateGuard, SignedStateMap, StateFlags,
    StateLifecycleNotifier,
};
use keel_types::config::{SignedStateConfig, StakeFraction};
use keel_types::error::{ErrorCode, ReservationTier, SignatureError, StateManagerError};
use keel_types::{AddressBook, Event, NodeId, StateHash, StateSignature};
use parity_scale_codec::{Decode, Encode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a complete state arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// Received from a reconnect teacher.
    Reconnect,
    /// Loaded from the saved-state store at boot.
    Disk,
}

impl fmt::Display for StateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnect => write!(f, "reconnect"),
            Self::Disk => write!(f, "disk"),
        }
    }
}

/// A signature that arrived before its round's state was tracked.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SavedSignature {
    /// The round the signature targets.
    pub round: u64,
    /// The signer.
    pub node_id: NodeId,
    /// The signature bytes, unvalidated until the round's state exists.
    pub signature: StateSignature,
}

/// Invoked for unrecoverable failures (hashing, self-signing). The
/// embedding node decides whether to halt.
pub type FatalErrorConsumer = Arc<dyn Fn(&str) + Send + Sync>;

struct ManagerInner {
    /// Incomplete states still gathering signatures. Holds strong
    /// reservations.
    fresh: SignedStateMap,
    /// Superseded states kept indexable for reconnect. Holds weak
    /// reservations, so their heavy memory can be archived.
    stale: SignedStateMap,
    /// The latest tracked state, complete or not.
    last_state: Option<SignedStateGuard>,
    /// The latest state that crossed the completion threshold.
    last_complete: Option<SignedStateGuard>,
    /// Signatures for rounds ahead of the latest tracked state.
    saved_signatures: SequenceSet<SavedSignature>,
}

impl ManagerInner {
    fn last_round(&self) -> Option<u64> {
        self.last_state.as_ref().map(|g| g.round())
    }
}

/// Tracks every in-flight signed state, validates and aggregates
/// signatures against the staked address book, promotes states to
/// complete, and maintains the round retention window.
///
/// Thread-safe: one mutex serializes state-graph mutations. Hashing and
/// signature verification always run outside that mutex.
pub struct SignedStateManager {
    config: SignedStateConfig,
    self_id: NodeId,
    address_book: Arc<AddressBook>,
    signer: Arc<dyn HashSigner>,
    verifier: Arc<dyn SignatureVerifier>,
    hasher: Arc<dyn TreeHasher>,
    submitter: Arc<dyn SystemTransactionSubmitter>,
    lifecycle: Arc<dyn StateLifecycleNotifier>,
    fatal: FatalErrorConsumer,
    inner: Mutex<ManagerInner>,
    stopped: AtomicBool,
}

impl SignedStateManager {
    /// Builds a manager over the node's collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut config: SignedStateConfig,
        self_id: NodeId,
        address_book: Arc<AddressBook>,
        signer: Arc<dyn HashSigner>,
        verifier: Arc<dyn SignatureVerifier>,
        hasher: Arc<dyn TreeHasher>,
        submitter: Arc<dyn SystemTransactionSubmitter>,
        lifecycle: Arc<dyn StateLifecycleNotifier>,
        fatal: FatalErrorConsumer,
    ) -> Self {
        if !config.completion_threshold.is_valid() {
            tracing::warn!(
                target: "state",
                "configured completion threshold has a zero denominator; using the strong-minority default"
            );
            config.completion_threshold = StakeFraction::STRONG_MINORITY;
        }
        let saved_signatures = SequenceSet::new(1, config.max_age_of_future_state_signatures);
        Self {
            config,
            self_id,
            address_book,
            signer,
            verifier,
            hasher,
            submitter,
            lifecycle,
            fatal,
            inner: Mutex::new(ManagerInner {
                fresh: SignedStateMap::strong(),
                stale: SignedStateMap::weak(),
                last_state: None,
                last_complete: None,
                saved_signatures,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    /// Builds a fresh unsigned state bound to this manager's roster,
    /// configured completion threshold, and collector handle, ready for
    /// [`SignedStateManager::add_unsigned_state`].
    pub fn new_unsigned_state(
        &self,
        round: u64,
        events: Vec<Event>,
        ledger: Arc<dyn LedgerState>,
        flags: StateFlags,
        gc: GcHandle,
    ) -> SignedStateGuard {
        SignedState::new(
            round,
            events,
            ledger,
            self.address_book.clone(),
            self.config.completion_threshold,
            flags,
            gc,
        )
    }

    /// Takes a fresh, unhashed state into tracking.
    ///
    /// Hashes the state (the subsystem's only suspension point), reports
    /// the hash, self-signs it, submits the state-signature system
    /// transaction, applies any buffered signatures for the round, and
    /// advances the retention and future-signature windows.
    pub async fn add_unsigned_state(
        &self,
        state: SignedStateGuard,
    ) -> Result<(), StateManagerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StateManagerError::Shutdown);
        }
        let round = state.round();
        {
            let inner = self.inner.lock();
            if let Some(last) = inner.last_round() {
                if round <= last {
                    tracing::warn!(
                        target: "state",
                        round,
                        last,
                        "out-of-order state rejected"
                    );
                    return Err(StateManagerError::OutOfOrderRound { last, got: round });
                }
            }
        }

        let hash = match self.hasher.digest_tree(state.ledger().as_ref()).await {
            Ok(hash) => hash,
            Err(e) => {
                (self.fatal)(&format!("failed to hash state for round {round}: {e}"));
                return Err(StateManagerError::HashingFailure {
                    round,
                    reason: e.to_string(),
                });
            }
        };
        state.set_root_hash(hash)?;

        // Hash observers (the ISS detector among them) must see the self
        // hash before this node's signature transaction exists.
        self.lifecycle.state_hashed(round, &hash);

        let self_signature = match self.signer.sign(&hash) {
            Ok(signature) => signature,
            Err(e) => {
                (self.fatal)(&format!("failed to self-sign state for round {round}: {e}"));
                return Err(StateManagerError::SigningFailure {
                    round,
                    reason: e.to_string(),
                });
            }
        };

        let arc = state.state().clone();
        let drained = {
            let mut inner = self.inner.lock();
            // The manager may have stopped while the hasher ran; the state
            // is abandoned and the caller's reservation cleans it up.
            if self.stopped.load(Ordering::Acquire) {
                return Err(StateManagerError::Shutdown);
            }
            self.lifecycle.new_signed_state_being_tracked(&state);
            state_metrics().inc_states_tracked();

            if let Err(e) = inner.fresh.put(&arc) {
                tracing::error!(target: "state", round, error = %e, "failed to track fresh state");
            }
            // The manager's slot consumes the creation reservation.
            inner.last_state = Some(state);

            let payload = encode_state_signature_payload(
                arc.flags().freeze_state,
                round,
                &hash,
                &self_signature,
            );
            if !self.submitter.submit(payload) {
                tracing::warn!(
                    target: "state",
                    round,
                    "state signature transaction rejected by the pipeline"
                );
            }

            if self.address_book.stake(self.self_id).is_some() {
                self.record_validated_signature(&mut inner, &arc, self.self_id, self_signature);
            } else {
                tracing::debug!(
                    target: "state",
                    node = %self.self_id,
                    "this node is not in the address book; self signature not recorded"
                );
            }
            arc.stamp(LifecycleStamp::SelfSigned);

            let drained = inner.saved_signatures.extract(round);
            inner.saved_signatures.shift_window(round + 1, |r, bucket| {
                tracing::debug!(
                    target: "state",
                    round = r,
                    dropped = bucket.len(),
                    "deferred signatures fell out of the buffering window"
                );
            });
            drained
        };

        // Buffered signatures verify outside the lock, like live ones.
        let valid: Vec<SavedSignature> = drained
            .into_iter()
            .filter(|saved| self.verify_signature(&arc, saved.node_id, &saved.signature))
            .collect();

        let mut inner = self.inner.lock();
        for saved in valid {
            self.record_validated_signature(&mut inner, &arc, saved.node_id, saved.signature);
        }
        self.purge_old_states(&mut inner);
        Ok(())
    }

    /// Adopts a state that is already hashed and signed, from reconnect or
    /// disk. Its signature set is pruned against this manager's trusted
    /// address book before anything else looks at it.
    pub fn add_complete_signed_state(
        &self,
        state: SignedStateGuard,
        source: StateSource,
    ) -> Result<(), StateManagerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StateManagerError::Shutdown);
        }
        let round = state.round();
        if state.root_hash().is_none() {
            tracing::error!(
                target: "state",
                round,
                %source,
                "complete state arrived without a root hash"
            );
            return Err(StateManagerError::HashMissing(round));
        }

        // Re-ground the carried signatures in our roster, outside the lock.
        state.prune_invalid_signatures(&self.address_book, self.verifier.as_ref())?;
        tracing::info!(
            target: "state",
            round,
            %source,
            signatures = state.signature_count(),
            stake = state.signing_stake() as u64,
            "adopting complete signed state"
        );

        let arc = state.state().clone();
        let arrived_complete = arc.is_complete();
        let drained = {
            let mut inner = self.inner.lock();
            self.lifecycle.new_signed_state_being_tracked(&state);
            state_metrics().inc_states_tracked();

            if let Err(e) = inner.fresh.put(&arc) {
                tracing::error!(target: "state", round, error = %e, "failed to track adopted state");
            }
            let drained = inner.saved_signatures.extract(round);
            let newer = inner.last_round().map_or(true, |last| round > last);
            if newer {
                inner.last_state = Some(state);
                inner.saved_signatures.shift_window(round + 1, |_, _| {});
            }
            if arrived_complete {
                self.state_newly_complete(&mut inner, &arc);
            }
            drained
        };

        let valid: Vec<SavedSignature> = drained
            .into_iter()
            .filter(|saved| self.verify_signature(&arc, saved.node_id, &saved.signature))
            .collect();

        let mut inner = self.inner.lock();
        for saved in valid {
            self.record_validated_signature(&mut inner, &arc, saved.node_id, saved.signature);
        }
        self.purge_old_states(&mut inner);
        Ok(())
    }

    /// Observes a signature gossiped before consensus. Applied immediately
    /// when its round is tracked and incomplete; buffered when the round is
    /// still ahead of the latest tracked state; otherwise dropped.
    pub fn pre_consensus_signature(
        &self,
        round: u64,
        signer: NodeId,
        signature: StateSignature,
    ) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let target: Option<SignedStateGuard> = {
            let mut inner = self.inner.lock();
            let tracked = inner
                .fresh
                .get(round, ReservationTier::Weak)
                .or_else(|| inner.stale.get(round, ReservationTier::Weak));
            match tracked {
                Some(guard) => {
                    if guard.is_complete() {
                        // Completion is terminal; extra signatures carry no
                        // information.
                        None
                    } else {
                        Some(guard)
                    }
                }
                None => {
                    if round > inner.last_round().unwrap_or(0) {
                        let horizon = inner.saved_signatures.highest_allowed();
                        let buffered = inner.saved_signatures.add(
                            round,
                            SavedSignature {
                                round,
                                node_id: signer,
                                signature: signature.clone(),
                            },
                        );
                        if buffered {
                            state_metrics().inc_signatures_buffered();
                        } else {
                            let err = SignatureError::FutureRoundDropped { round, horizon };
                            state_metrics().inc_signatures_rejected(err.code());
                            tracing::debug!(target: "state", %signer, error = %err, "signature dropped");
                        }
                    } else {
                        let keep = (self.config.rounds_to_keep_for_signing as u64).max(1);
                        let earliest_permitted = inner
                            .last_round()
                            .unwrap_or(0)
                            .saturating_sub(keep - 1);
                        let err = SignatureError::StaleRound {
                            round,
                            earliest_permitted,
                        };
                        state_metrics().inc_signatures_rejected(err.code());
                        tracing::debug!(target: "state", %signer, error = %err, "signature dropped");
                    }
                    None
                }
            }
        };

        let Some(guard) = target else { return };
        // Cryptography runs outside the manager mutex; the weak guard keeps
        // the state alive meanwhile.
        if !self.verify_signature(guard.state(), signer, &signature) {
            return;
        }
        let mut inner = self.inner.lock();
        let arc = guard.state().clone();
        self.record_validated_signature(&mut inner, &arc, signer, signature);
    }

    /// Exact-match lookup for the reconnect-as-teacher path. The returned
    /// wrapper holds a weak reservation: the state stays indexable and
    /// undeleted, but may be archived.
    pub fn find(&self, round: u64, hash: StateHash) -> Option<SignedStateGuard> {
        let inner = self.inner.lock();
        if let Some(guard) = inner.fresh.get(round, ReservationTier::Weak) {
            if guard.root_hash() == Some(hash) {
                return Some(guard);
            }
        }
        if let Some(guard) = inner.stale.get(round, ReservationTier::Weak) {
            if guard.root_hash() == Some(hash) {
                return Some(guard);
            }
        }
        for slot in [&inner.last_complete, &inner.last_state] {
            if let Some(held) = slot {
                if held.round() == round && held.root_hash() == Some(hash) {
                    return held.try_reserve_as(ReservationTier::Weak).ok();
                }
            }
        }
        None
    }

    /// The latest complete state, strongly reserved for the caller.
    pub fn latest_complete(&self) -> Option<SignedStateGuard> {
        let inner = self.inner.lock();
        inner
            .last_complete
            .as_ref()
            .and_then(|guard| guard.try_clone().ok())
    }

    /// The latest tracked state (hashed and self-signed, so immutable),
    /// strongly reserved for the caller.
    pub fn latest_immutable(&self) -> Option<SignedStateGuard> {
        let inner = self.inner.lock();
        inner
            .last_state
            .as_ref()
            .and_then(|guard| guard.try_clone().ok())
    }

    /// The round of the latest complete state.
    pub fn last_complete_round(&self) -> Option<u64> {
        self.inner.lock().last_complete.as_ref().map(|g| g.round())
    }

    /// The round of the latest tracked state.
    pub fn last_round(&self) -> Option<u64> {
        self.inner.lock().last_round()
    }

    /// The rounds currently held in the fresh and stale maps. Diagnostic.
    pub fn tracked_rounds(&self) -> (Vec<u64>, Vec<u64>) {
        let inner = self.inner.lock();
        (inner.fresh.rounds(), inner.stale.rounds())
    }

    /// Releases every tracked state and refuses further intake. States
    /// reserved by other holders survive until those holders release.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.inner.lock();
        inner.fresh.clear();
        inner.stale.clear();
        inner.last_state = None;
        inner.last_complete = None;
        tracing::info!(target: "state", "signed-state manager stopped");
    }

    /// Validates one signature against the state's address book. Never
    /// called under the manager mutex.
    fn verify_signature(
        &self,
        state: &SignedState,
        signer: NodeId,
        signature: &StateSignature,
    ) -> bool {
        let Some(hash) = state.root_hash() else {
            return false;
        };
        let book = state.address_book();
        let Some(public_key) = book.public_key(signer) else {
            let err = SignatureError::UnknownSigner(signer);
            state_metrics().inc_signatures_rejected(err.code());
            tracing::debug!(target: "state", round = state.round(), error = %err, "signature dropped");
            return false;
        };
        let valid = self
            .verifier
            .verify(hash.as_ref(), signature.as_bytes(), public_key);
        if !valid {
            let err = SignatureError::Invalid(signer);
            state_metrics().inc_signatures_rejected(err.code());
            tracing::debug!(target: "state", round = state.round(), error = %err, "signature dropped");
        }
        valid
    }

    /// Records an already-validated signature, promoting the state when it
    /// crosses the completion threshold. Runs under the manager mutex.
    fn record_validated_signature(
        &self,
        inner: &mut ManagerInner,
        state: &Arc<SignedState>,
        signer: NodeId,
        signature: StateSignature,
    ) {
        if state.is_complete() {
            return;
        }
        let Some(stake) = state.address_book().stake(signer) else {
            state_metrics().inc_signatures_rejected(SignatureError::UnknownSigner(signer).code());
            return;
        };
        match state.record_signature(signer, signature, stake) {
            keel_state::SigInsertOutcome::Duplicate => {}
            keel_state::SigInsertOutcome::Added {
                newly_complete: true,
            } => {
                self.state_newly_complete(inner, state);
            }
            keel_state::SigInsertOutcome::Added { .. } => {}
        }
    }

    /// Promotion: a state crossed the completion threshold (or arrived
    /// complete).
    fn state_newly_complete(&self, inner: &mut ManagerInner, state: &Arc<SignedState>) {
        state_metrics().inc_states_completed();
        match state.try_reserve(ReservationTier::Weak) {
            Ok(weak_guard) => self.lifecycle.state_has_enough_signatures(&weak_guard),
            Err(e) => {
                tracing::error!(
                    target: "state",
                    round = state.round(),
                    error = %e,
                    history = %state.debug_history(),
                    "completed state lost its reservations"
                );
            }
        }

        let newer = inner
            .last_complete
            .as_ref()
            .map_or(true, |held| state.round() > held.round());
        if newer {
            self.set_last_complete(inner, state);
        }
        // The promoted state leaves the maps; lookups reach it through the
        // latest-complete slot.
        inner.fresh.remove(state.round());
        inner.stale.remove(state.round());
    }

    fn set_last_complete(&self, inner: &mut ManagerInner, state: &Arc<SignedState>) {
        let round = state.round();
        let guard = match state.try_reserve(ReservationTier::Strong) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(
                    target: "state",
                    round,
                    error = %e,
                    history = %state.debug_history(),
                    "cannot promote a state whose strong tier is gone"
                );
                return;
            }
        };

        // Demote every older fresh state: the stale pool takes its weak
        // reservation before the fresh map's strong one is released, so the
        // state is never unprotected in between.
        {
            let fresh = &inner.fresh;
            let stale = &inner.stale;
            fresh.atomic_iteration(|iter| {
                while let Some(entry) = iter.next() {
                    if entry.round() < round {
                        if let Err(e) = stale.put(entry.state()) {
                            tracing::error!(
                                target: "state",
                                round = entry.round(),
                                error = %e,
                                "failed to move state to the stale pool"
                            );
                        }
                        entry.stamp(LifecycleStamp::MovedToStale);
                        iter.remove_current();
                    }
                }
            });
        }

        inner.last_complete = Some(guard);
        state_metrics().set_last_complete_round(round);
        tracing::info!(
            target: "state",
            round,
            stake = state.signing_stake() as u64,
            "new latest complete state"
        );
        if let Some(held) = &inner.last_complete {
            self.lifecycle.new_latest_complete_state(held);
        }
    }

    /// Evicts states older than the retention window. Retained regardless:
    /// the latest complete state, every non-ancient state, and anything an
    /// external holder still has reserved (eviction only releases the
    /// maps' reservations).
    fn purge_old_states(&self, inner: &mut ManagerInner) {
        let Some(last) = inner.last_round() else {
            return;
        };
        let keep = (self.config.rounds_to_keep_for_signing as u64).max(1);
        let earliest_permitted = last.saturating_sub(keep - 1);

        let mut purged = 0u64;
        for map in [&inner.fresh, &inner.stale] {
            map.atomic_iteration(|iter| {
                while let Some(entry) = iter.next() {
                    if entry.round() < earliest_permitted {
                        // Every state in the maps is incomplete, so this is
                        // its one terminal notification.
                        self.lifecycle.state_lacks_signatures(entry);
                        entry.stamp(LifecycleStamp::Evicted);
                        purged += 1;
                        iter.remove_current();
                    }
                }
            });
        }
        if purged > 0 {
            state_metrics().inc_states_purged(purged);
            tracing::debug!(
                target: "state",
                purged,
                earliest_permitted,
                "purged states beyond the retention window"
            );
        }

        let complete_is_ancient = inner
            .last_complete
            .as_ref()
            .map_or(false, |g| g.round() < earliest_permitted);
        if complete_is_ancient {
            inner.last_complete = None;
        }
    }
}
