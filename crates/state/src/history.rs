//! Bounded lifecycle history for reservation diagnostics.

use std::collections::VecDeque;
use std::time::Instant;

const HISTORY_CAPACITY: usize = 16;

/// A lifecycle transition worth stamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStamp {
    /// The state object was constructed.
    Created,
    /// The root hash was assigned.
    Hashed,
    /// This node's own signature was recorded.
    SelfSigned,
    /// The signature set crossed the completion threshold.
    Complete,
    /// The state left the fresh map for the stale pool.
    MovedToStale,
    /// The state was evicted from tracking.
    Evicted,
    /// The archive hook ran.
    Archived,
    /// The delete hook ran.
    Deleted,
}

impl LifecycleStamp {
    fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Hashed => "hashed",
            Self::SelfSigned => "self-signed",
            Self::Complete => "complete",
            Self::MovedToStale => "moved-to-stale",
            Self::Evicted => "evicted",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

/// A small ring of timestamped lifecycle transitions, rendered into logs
/// when a lifetime invariant trips. Sixteen entries cover every transition
/// a state can make with room for repeated map moves.
pub struct SignedStateHistory {
    origin: Instant,
    stamps: VecDeque<(Instant, LifecycleStamp)>,
}

impl SignedStateHistory {
    /// An empty history anchored at the state's creation instant.
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            stamps: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Records a transition, dropping the oldest entry when full.
    pub fn record(&mut self, stamp: LifecycleStamp) {
        if self.stamps.len() == HISTORY_CAPACITY {
            self.stamps.pop_front();
        }
        self.stamps.push_back((Instant::now(), stamp));
    }

    /// The recorded transitions in order.
    pub fn stamps(&self) -> impl Iterator<Item = LifecycleStamp> + '_ {
        self.stamps.iter().map(|(_, s)| *s)
    }
}

impl std::fmt::Debug for SignedStateHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for (at, stamp) in &self.stamps {
            list.entry(&format_args!(
                "{}@{:?}",
                stamp.label(),
                at.duration_since(self.origin)
            ));
        }
        list.finish()
    }
}
