#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Keel Telemetry
//!
//! Observability infrastructure for the signed-state subsystem: structured
//! logging initialization, a Prometheus metrics backend, abstract metric
//! sinks that decouple instrumentation from the backend, and the log rate
//! limiter used by sustained-failure paths.

/// The initialization routine for global structured logging.
pub mod init;
/// The concrete implementation of metrics sinks using the `prometheus` crate.
pub mod prometheus;
/// Abstract traits (`*MetricsSink`) that define the contract for metrics reporting.
pub mod sinks;
/// Wall-clock rate limiting for log categories that can fire every round.
pub mod time;

pub use time::LogRateLimiter;
