//! Static accessor for the signed-state metrics sink.
//!
//! Mirrors the GC sink accessor in `keel-state`: a lazily-initialized
//! global that degrades to a no-op when telemetry was never installed.

use keel_telemetry::sinks::{NopSink, SignedStateMetricsSink};
use once_cell::sync::OnceCell;

static NOP_SINK: NopSink = NopSink;
/// A lazily-initialized static reference to the global signed-state metrics sink.
pub static STATE_SINK: OnceCell<&'static dyn SignedStateMetricsSink> = OnceCell::new();

/// Returns the configured signed-state metrics sink, or a no-op when none
/// was installed.
pub fn state_metrics() -> &'static dyn SignedStateMetricsSink {
    STATE_SINK.get().copied().unwrap_or(&NOP_SINK)
}
