//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::{GcMetricsSink, SignedStateMetricsSink};
use once_cell::sync::OnceCell;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, Gauge, IntCounter,
    IntCounterVec,
};

// --- Metric Statics ---
// OnceCell holds the collectors; they are initialized exactly once by
// `install`.

static STATES_TRACKED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static STATES_COMPLETED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static STATES_PURGED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SIGNATURES_BUFFERED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SIGNATURES_REJECTED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static LAST_COMPLETE_ROUND: OnceCell<Gauge> = OnceCell::new();
static ISS_OUTCOMES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static GC_ARCHIVE_QUEUE_DEPTH: OnceCell<Gauge> = OnceCell::new();
static GC_DELETE_QUEUE_DEPTH: OnceCell<Gauge> = OnceCell::new();
static GC_STATES_ARCHIVED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static GC_STATES_DELETED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static GC_INLINE_DELETIONS_TOTAL: OnceCell<IntCounter> = OnceCell::new();

/// The prometheus-backed sink. Install the collectors with [`install`]
/// before wiring it into the static accessors.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Helper macro to reduce boilerplate for getting a metric from OnceCell.
/// Falls back to a silent no-op when `install()` was never called, so an
/// embedding binary that skips telemetry setup still runs.
macro_rules! with_metric {
    ($metric:ident, $op:expr) => {
        if let Some(m) = $metric.get() {
            #[allow(clippy::redundant_closure_call)]
            $op(m)
        }
    };
}

impl SignedStateMetricsSink for PrometheusSink {
    fn inc_states_tracked(&self) {
        with_metric!(STATES_TRACKED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_states_completed(&self) {
        with_metric!(STATES_COMPLETED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_states_purged(&self, count: u64) {
        with_metric!(STATES_PURGED_TOTAL, |m: &IntCounter| m.inc_by(count));
    }
    fn inc_signatures_buffered(&self) {
        with_metric!(SIGNATURES_BUFFERED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_signatures_rejected(&self, reason: &str) {
        with_metric!(SIGNATURES_REJECTED_TOTAL, |m: &IntCounterVec| m
            .with_label_values(&[reason])
            .inc());
    }
    fn set_last_complete_round(&self, round: u64) {
        with_metric!(LAST_COMPLETE_ROUND, |m: &Gauge| m.set(round as f64));
    }
    fn inc_iss_outcome(&self, outcome: &str) {
        with_metric!(ISS_OUTCOMES_TOTAL, |m: &IntCounterVec| m
            .with_label_values(&[outcome])
            .inc());
    }
}

impl GcMetricsSink for PrometheusSink {
    fn set_archive_queue_depth(&self, depth: u64) {
        with_metric!(GC_ARCHIVE_QUEUE_DEPTH, |m: &Gauge| m.set(depth as f64));
    }
    fn set_delete_queue_depth(&self, depth: u64) {
        with_metric!(GC_DELETE_QUEUE_DEPTH, |m: &Gauge| m.set(depth as f64));
    }
    fn inc_states_archived(&self) {
        with_metric!(GC_STATES_ARCHIVED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_states_deleted(&self) {
        with_metric!(GC_STATES_DELETED_TOTAL, |m: &IntCounter| m.inc());
    }
    fn inc_inline_deletions(&self) {
        with_metric!(GC_INLINE_DELETIONS_TOTAL, |m: &IntCounter| m.inc());
    }
}

/// Registers every collector with the default prometheus registry.
///
/// Idempotent in effect: a second call fails registration but leaves the
/// already-installed collectors untouched.
pub fn install() -> Result<(), prometheus::Error> {
    STATES_TRACKED_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_signed_states_tracked_total",
            "Signed states that entered tracking"
        )
    })?;
    STATES_COMPLETED_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_signed_states_completed_total",
            "Signed states that collected a completing stake of signatures"
        )
    })?;
    STATES_PURGED_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_signed_states_purged_total",
            "Signed states evicted from the window without enough signatures"
        )
    })?;
    SIGNATURES_BUFFERED_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_state_signatures_buffered_total",
            "State signatures buffered for rounds not yet tracked"
        )
    })?;
    SIGNATURES_REJECTED_TOTAL.get_or_try_init(|| {
        register_int_counter_vec!(
            "keel_state_signatures_rejected_total",
            "State signatures dropped, by reason code",
            &["reason"]
        )
    })?;
    LAST_COMPLETE_ROUND.get_or_try_init(|| {
        register_gauge!(
            "keel_last_complete_round",
            "Round of the latest complete signed state"
        )
    })?;
    ISS_OUTCOMES_TOTAL.get_or_try_init(|| {
        register_int_counter_vec!(
            "keel_iss_outcomes_total",
            "Round hash validation verdicts, by outcome class",
            &["outcome"]
        )
    })?;
    GC_ARCHIVE_QUEUE_DEPTH.get_or_try_init(|| {
        register_gauge!(
            "keel_gc_archive_queue_depth",
            "Archive intents waiting for the garbage collector"
        )
    })?;
    GC_DELETE_QUEUE_DEPTH.get_or_try_init(|| {
        register_gauge!(
            "keel_gc_delete_queue_depth",
            "Delete intents waiting for the garbage collector"
        )
    })?;
    GC_STATES_ARCHIVED_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_gc_states_archived_total",
            "Signed states archived by the background collector"
        )
    })?;
    GC_STATES_DELETED_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_gc_states_deleted_total",
            "Signed states deleted by the background collector"
        )
    })?;
    GC_INLINE_DELETIONS_TOTAL.get_or_try_init(|| {
        register_int_counter!(
            "keel_gc_inline_deletions_total",
            "Deletions that ran inline because the delete queue was full"
        )
    })?;
    Ok(())
}
