#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)
)]

//! # Keel Signed State
//!
//! The lifecycle primitives of the signed-state subsystem: the two-tier
//! reservation counter, the per-state signature set, the `SignedState`
//! value object itself, the reservation-holding round map, and the
//! background garbage collector that consumes archive and delete intents.

pub mod bundle;
pub mod gc;
pub mod history;
pub mod map;
pub mod metrics;
pub mod notifications;
pub mod reservation;
pub mod sigset;
pub mod signed_state;

pub use bundle::SignedStateBundle;
pub use gc::{GcHandle, SignedStateGarbageCollector};
pub use history::{LifecycleStamp, SignedStateHistory};
pub use map::SignedStateMap;
pub use notifications::{NopStateLifecycleNotifier, StateLifecycleNotifier};
pub use reservation::ReservationCounter;
pub use signed_state::{SignedState, SignedStateGuard, StateFlags};
pub use sigset::{SigInsertOutcome, SigSet};
