//! The dual-tier reservation counter governing a signed state's lifetime.
//!
//! A strong reservation declares "this state may not be archived"; a weak
//! reservation declares "this state may not be deleted". Every strong
//! reservation implies a weak one, carried collectively by the strong tier:
//! the counter takes a single weak reservation at construction and releases
//! it when the strong tier reaches zero.

use keel_types::error::{ReservationError, ReservationTier};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

type DestructionCallback = Box<dyn FnOnce() + Send>;

/// Atomic (strong, weak) reservation counts with one-shot destruction
/// callbacks per tier.
///
/// Construction counts as one strong reservation held by the creator. When
/// the strong count transitions to zero the strong callback fires exactly
/// once, then the construction-time weak reservation is released; when the
/// weak count transitions to zero the weak callback fires exactly once.
/// Releasing below zero is a programming error and aborts the process
/// rather than silently clamping.
pub struct ReservationCounter {
    strong: AtomicU32,
    weak: AtomicU32,
    on_strong_zero: Mutex<Option<DestructionCallback>>,
    on_weak_zero: Mutex<Option<DestructionCallback>>,
}

impl ReservationCounter {
    /// A counter holding one strong reservation (and its implicit weak).
    pub fn new(
        on_strong_zero: impl FnOnce() + Send + 'static,
        on_weak_zero: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            strong: AtomicU32::new(1),
            weak: AtomicU32::new(1),
            on_strong_zero: Mutex::new(Some(Box::new(on_strong_zero))),
            on_weak_zero: Mutex::new(Some(Box::new(on_weak_zero))),
        }
    }

    /// Takes a strong reservation. Fails once the strong tier has been
    /// destroyed; a destroyed tier can never be resurrected.
    pub fn reserve_strong(&self) -> Result<(), ReservationError> {
        Self::increment(&self.strong, ReservationTier::Strong)
    }

    /// Takes a weak reservation. Fails once the weak tier has been
    /// destroyed.
    pub fn reserve_weak(&self) -> Result<(), ReservationError> {
        Self::increment(&self.weak, ReservationTier::Weak)
    }

    /// Releases a strong reservation. On the 1 -> 0 transition the strong
    /// destruction callback runs on this thread, then the implicit weak
    /// reservation is released.
    pub fn release_strong(&self) {
        match self.strong.fetch_sub(1, Ordering::AcqRel) {
            0 => panic!("strong reservation count released below zero"),
            1 => {
                self.fire(&self.on_strong_zero);
                self.release_weak();
            }
            _ => {}
        }
    }

    /// Releases a weak reservation. On the 1 -> 0 transition the weak
    /// destruction callback runs on this thread.
    pub fn release_weak(&self) {
        match self.weak.fetch_sub(1, Ordering::AcqRel) {
            0 => panic!("weak reservation count released below zero"),
            1 => self.fire(&self.on_weak_zero),
            _ => {}
        }
    }

    /// Current strong count. Diagnostics only; stale the moment it returns.
    pub fn strong_count(&self) -> u32 {
        self.strong.load(Ordering::Acquire)
    }

    /// Current weak count. Diagnostics only.
    pub fn weak_count(&self) -> u32 {
        self.weak.load(Ordering::Acquire)
    }

    fn increment(counter: &AtomicU32, tier: ReservationTier) -> Result<(), ReservationError> {
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(ReservationError::AfterDestruction { tier });
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    // The slot is taken under a lock so exactly one thread ever runs the
    // callback, and any thread observing the zero count sees its effects.
    fn fire(&self, slot: &Mutex<Option<DestructionCallback>>) {
        let callback = slot.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl std::fmt::Debug for ReservationCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationCounter")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}
