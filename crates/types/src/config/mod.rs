//! Shared configuration structures for the signed-state subsystem.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A stake threshold expressed as a fraction of total stake.
///
/// A threshold is *exceeded* only by a strictly greater stake sum: with the
/// default 1/3 fraction and total stake 99, a part of 33 does not suffice
/// but 34 does. All comparisons run in `u128` so products of realistic stake
/// totals cannot overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeFraction {
    /// The numerator of the fraction.
    pub numerator: u64,
    /// The denominator of the fraction. Must be non-zero.
    pub denominator: u64,
}

impl StakeFraction {
    /// Strong minority: strictly more than one third of total stake.
    pub const STRONG_MINORITY: StakeFraction = StakeFraction {
        numerator: 1,
        denominator: 3,
    };

    /// Supermajority: strictly more than two thirds of total stake.
    pub const SUPERMAJORITY: StakeFraction = StakeFraction {
        numerator: 2,
        denominator: 3,
    };

    /// Whether `part` strictly exceeds this fraction of `total`.
    ///
    /// A zero denominator never qualifies anything; configuration loading
    /// rejects it before this is reachable.
    pub fn is_exceeded_by(&self, part: u128, total: u128) -> bool {
        if self.denominator == 0 {
            return false;
        }
        part * u128::from(self.denominator) > total * u128::from(self.numerator)
    }

    /// Whether the fraction is well-formed (non-zero denominator).
    pub fn is_valid(&self) -> bool {
        self.denominator != 0
    }
}

fn default_rounds_to_keep_for_signing() -> usize {
    26
}
fn default_rounds_non_ancient() -> usize {
    26
}
fn default_max_age_of_future_state_signatures() -> usize {
    1000
}
fn default_dump_state_on_iss() -> bool {
    false
}
fn default_iss_dump_directory() -> PathBuf {
    PathBuf::from("data/iss")
}
fn default_seconds_between_iss_dumps() -> u64 {
    3600
}
fn default_seconds_between_iss_logs() -> u64 {
    300
}
fn default_completion_threshold() -> StakeFraction {
    StakeFraction::STRONG_MINORITY
}
fn default_gc_queue_capacity() -> usize {
    100
}
fn default_gc_drain_limit() -> usize {
    20
}

/// Tuning knobs for the signed-state manager, garbage collector, and ISS
/// detector. Deserialized from the node's configuration file; every field
/// has a production default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedStateConfig {
    /// Width of the signing retention window: how many recent rounds stay
    /// tracked while their signatures accrue.
    #[serde(default = "default_rounds_to_keep_for_signing")]
    pub rounds_to_keep_for_signing: usize,
    /// Width of the ISS-detector window of non-ancient rounds.
    #[serde(default = "default_rounds_non_ancient")]
    pub rounds_non_ancient: usize,
    /// How many rounds beyond the latest tracked state a signature may
    /// target and still be buffered rather than dropped.
    #[serde(default = "default_max_age_of_future_state_signatures")]
    pub max_age_of_future_state_signatures: usize,
    /// If true, a self-ISS writes a diagnostic dump of the disputed state.
    #[serde(default = "default_dump_state_on_iss")]
    pub dump_state_on_iss: bool,
    /// Directory receiving ISS diagnostic dumps.
    #[serde(default = "default_iss_dump_directory")]
    pub iss_dump_directory: PathBuf,
    /// Minimum wall-clock seconds between consecutive ISS dumps.
    #[serde(default = "default_seconds_between_iss_dumps")]
    pub seconds_between_iss_dumps: u64,
    /// Rate-limiter period for ISS log categories.
    #[serde(default = "default_seconds_between_iss_logs")]
    pub seconds_between_iss_logs: u64,
    /// Stake fraction a state's signatures must strictly exceed to be
    /// considered complete.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: StakeFraction,
    /// Capacity of the bounded deletion queue; overflow falls back to
    /// inline deletion on the releasing thread.
    #[serde(default = "default_gc_queue_capacity")]
    pub gc_queue_capacity: usize,
    /// Maximum intents drained from each queue per collector pass.
    #[serde(default = "default_gc_drain_limit")]
    pub gc_drain_limit: usize,
}

impl Default for SignedStateConfig {
    fn default() -> Self {
        Self {
            rounds_to_keep_for_signing: default_rounds_to_keep_for_signing(),
            rounds_non_ancient: default_rounds_non_ancient(),
            max_age_of_future_state_signatures: default_max_age_of_future_state_signatures(),
            dump_state_on_iss: default_dump_state_on_iss(),
            iss_dump_directory: default_iss_dump_directory(),
            seconds_between_iss_dumps: default_seconds_between_iss_dumps(),
            seconds_between_iss_logs: default_seconds_between_iss_logs(),
            completion_threshold: default_completion_threshold(),
            gc_queue_capacity: default_gc_queue_capacity(),
            gc_drain_limit: default_gc_drain_limit(),
        }
    }
}
