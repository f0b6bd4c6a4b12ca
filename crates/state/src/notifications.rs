//! Observer trait for signed-state lifecycle transitions.

use crate::signed_state::SignedStateGuard;
use keel_types::StateHash;

/// Receives lifecycle notifications from the signed-state manager.
///
/// Dispatch is synchronous on the manager's thread, under the manager lock
/// for the state-carrying variants. Handlers must return quickly and may
/// take their own reservation (via [`SignedStateGuard::try_clone`]) when
/// they need the state beyond the call; they must not call back into the
/// manager or the maps.
pub trait StateLifecycleNotifier: Send + Sync {
    /// A fresh state entered tracking, before any signatures accrued.
    fn new_signed_state_being_tracked(&self, _state: &SignedStateGuard) {}

    /// A state's root hash was computed. Dispatched before this node's
    /// signature transaction is submitted, so hash observers (the ISS
    /// detector) always see the self hash before any network signature for
    /// the round.
    fn state_hashed(&self, _round: u64, _hash: &StateHash) {}

    /// A state collected a completing stake of signatures. Terminal for the
    /// state: mutually exclusive with `state_lacks_signatures`.
    fn state_has_enough_signatures(&self, _state: &SignedStateGuard) {}

    /// A state fell out of the retention window before completing.
    /// Terminal for the state: mutually exclusive with
    /// `state_has_enough_signatures`.
    fn state_lacks_signatures(&self, _state: &SignedStateGuard) {}

    /// A state became the latest complete state. Rounds observed through
    /// this notification are strictly increasing.
    fn new_latest_complete_state(&self, _state: &SignedStateGuard) {}
}

/// A notifier that ignores every lifecycle transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopStateLifecycleNotifier;

impl StateLifecycleNotifier for NopStateLifecycleNotifier {}
