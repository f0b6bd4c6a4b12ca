//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A sink for metrics emitted by the signed-state manager and ISS detector.
pub trait SignedStateMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of states that entered tracking.
    fn inc_states_tracked(&self);
    /// Increments the counter of states that reached completeness.
    fn inc_states_completed(&self);
    /// Increments the counter of states purged without enough signatures.
    fn inc_states_purged(&self, count: u64);
    /// Increments the counter of signatures buffered for future rounds.
    fn inc_signatures_buffered(&self);
    /// Increments a counter for rejected signatures, labeled by reason code.
    fn inc_signatures_rejected(&self, reason: &str);
    /// Sets the gauge for the round of the latest complete state.
    fn set_last_complete_round(&self, round: u64);
    /// Increments a counter for ISS verdicts, labeled by outcome class.
    fn inc_iss_outcome(&self, outcome: &str);
}

impl SignedStateMetricsSink for NopSink {
    fn inc_states_tracked(&self) {}
    fn inc_states_completed(&self) {}
    fn inc_states_purged(&self, _count: u64) {}
    fn inc_signatures_buffered(&self) {}
    fn inc_signatures_rejected(&self, _reason: &str) {}
    fn set_last_complete_round(&self, _round: u64) {}
    fn inc_iss_outcome(&self, _outcome: &str) {}
}

/// A sink for metrics emitted by the signed-state garbage collector.
pub trait GcMetricsSink: Send + Sync + std::fmt::Debug {
    /// Sets the gauge for the archive intake queue depth.
    fn set_archive_queue_depth(&self, depth: u64);
    /// Sets the gauge for the delete intake queue depth.
    fn set_delete_queue_depth(&self, depth: u64);
    /// Increments the counter of states archived by the worker.
    fn inc_states_archived(&self);
    /// Increments the counter of states deleted by the worker.
    fn inc_states_deleted(&self);
    /// Increments the counter of deletions that fell back to the caller's
    /// thread because the delete queue was full.
    fn inc_inline_deletions(&self);
}

impl GcMetricsSink for NopSink {
    fn set_archive_queue_depth(&self, _depth: u64) {}
    fn set_delete_queue_depth(&self, _depth: u64) {}
    fn inc_states_archived(&self) {}
    fn inc_states_deleted(&self) {}
    fn inc_inline_deletions(&self) {}
}
