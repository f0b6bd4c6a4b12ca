//! Static accessor for the garbage-collector metrics sink.
//!
//! A lazily-initialized global lets the collector and the inline fallback
//! paths record metrics without threading a sink through every state
//! constructor. Uninitialized (e.g. in tests) it degrades to a no-op.

use keel_telemetry::sinks::{GcMetricsSink, NopSink};
use once_cell::sync::OnceCell;

static NOP_SINK: NopSink = NopSink;
/// A lazily-initialized static reference to the global GC metrics sink.
pub static GC_SINK: OnceCell<&'static dyn GcMetricsSink> = OnceCell::new();

/// Returns the configured GC metrics sink, or a no-op when none was
/// installed.
pub fn gc_metrics() -> &'static dyn GcMetricsSink {
    GC_SINK.get().copied().unwrap_or(&NOP_SINK)
}
