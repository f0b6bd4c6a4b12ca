//! A thread-safe round-indexed map that holds reservations for its
//! contents.

use crate::signed_state::{SignedState, SignedStateGuard};
use keel_types::error::{ReservationError, ReservationTier};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Map of `round -> SignedState` that takes a reservation of a configured
/// tier on every entry it holds.
///
/// A strong-holding map keeps its states from being archived (the primary
/// tracker); a weak-holding map only keeps them indexable while allowing
/// archival (the stale pool). Guards handed out by `get`/`find` never
/// upgrade past the map's own tier.
///
/// One exclusive lock guards the map. Iteration is not reentrant: callbacks
/// running inside `atomic_iteration` must not touch the same map again.
pub struct SignedStateMap {
    tier: ReservationTier,
    inner: Mutex<BTreeMap<u64, SignedStateGuard>>,
}

impl SignedStateMap {
    /// A map taking strong reservations on its contents.
    pub fn strong() -> Self {
        Self::new(ReservationTier::Strong)
    }

    /// A map taking weak reservations on its contents.
    pub fn weak() -> Self {
        Self::new(ReservationTier::Weak)
    }

    fn new(tier: ReservationTier) -> Self {
        Self {
            tier,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// The reservation tier this map holds for its entries.
    pub fn tier(&self) -> ReservationTier {
        self.tier
    }

    /// Inserts `state`, taking the map's reservation. Any prior entry for
    /// the same round is displaced and its reservation released.
    pub fn put(&self, state: &Arc<SignedState>) -> Result<(), ReservationError> {
        let guard = state.try_reserve(self.tier)?;
        let displaced = self.inner.lock().insert(state.round(), guard);
        // Release outside the lock: the drop may run destruction hooks.
        drop(displaced);
        Ok(())
    }

    /// Looks up `round`, returning a guard carrying an additional
    /// reservation: `want`, clamped to the map's tier.
    pub fn get(&self, round: u64, want: ReservationTier) -> Option<SignedStateGuard> {
        let map = self.inner.lock();
        let entry = map.get(&round)?;
        self.reserve_clamped(entry, want)
    }

    /// Returns a reserved guard over the first state (in round order)
    /// matching `predicate`.
    pub fn find(
        &self,
        mut predicate: impl FnMut(&SignedState) -> bool,
        want: ReservationTier,
    ) -> Option<SignedStateGuard> {
        let map = self.inner.lock();
        map.values()
            .find(|entry| predicate(entry))
            .and_then(|entry| self.reserve_clamped(entry, want))
    }

    /// Removes `round`, releasing the map's reservation.
    pub fn remove(&self, round: u64) {
        let removed = self.inner.lock().remove(&round);
        drop(removed);
    }

    /// Removes every entry, releasing all reservations.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.inner.lock());
        drop(drained);
    }

    /// Runs `f` with a removing iterator under the map lock. Reservations
    /// of removed entries are released after the lock is dropped.
    pub fn atomic_iteration<F>(&self, f: F)
    where
        F: FnOnce(&mut SignedStateMapIter<'_>),
    {
        let mut removed = Vec::new();
        {
            let mut entries = self.inner.lock();
            let order: Vec<u64> = entries.keys().copied().collect();
            let mut iter = SignedStateMapIter {
                entries: &mut entries,
                order,
                pos: 0,
                current: None,
                removed: &mut removed,
            };
            f(&mut iter);
        }
        drop(removed);
    }

    /// Number of tracked states.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the map holds no states.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The tracked rounds in ascending order.
    pub fn rounds(&self) -> Vec<u64> {
        self.inner.lock().keys().copied().collect()
    }

    fn reserve_clamped(
        &self,
        entry: &SignedStateGuard,
        want: ReservationTier,
    ) -> Option<SignedStateGuard> {
        let granted = match (self.tier, want) {
            (ReservationTier::Weak, _) => ReservationTier::Weak,
            (ReservationTier::Strong, requested) => requested,
        };
        match entry.try_reserve_as(granted) {
            Ok(guard) => Some(guard),
            Err(ReservationError::AfterDestruction { tier }) => {
                // Unreachable while the map holds its own reservation at or
                // above `granted`; treat as a miss rather than poisoning the
                // caller.
                tracing::error!(
                    target: "state",
                    round = entry.round(),
                    %tier,
                    history = %entry.debug_history(),
                    "reservation failed on a map-held state"
                );
                None
            }
        }
    }
}

/// The removing iterator passed to [`SignedStateMap::atomic_iteration`].
pub struct SignedStateMapIter<'a> {
    entries: &'a mut BTreeMap<u64, SignedStateGuard>,
    order: Vec<u64>,
    pos: usize,
    current: Option<u64>,
    removed: &'a mut Vec<SignedStateGuard>,
}

impl SignedStateMapIter<'_> {
    /// Advances to the next tracked state in round order.
    pub fn next(&mut self) -> Option<&SignedStateGuard> {
        while let Some(round) = self.order.get(self.pos).copied() {
            self.pos += 1;
            if self.entries.contains_key(&round) {
                self.current = Some(round);
                return self.entries.get(&round);
            }
        }
        self.current = None;
        None
    }

    /// Removes the state returned by the last `next` call. Its reservation
    /// is released once the iteration finishes and the map lock drops.
    pub fn remove_current(&mut self) {
        if let Some(round) = self.current.take() {
            if let Some(guard) = self.entries.remove(&round) {
                self.removed.push(guard);
            }
        }
    }
}
