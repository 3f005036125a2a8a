//! Metric helpers for `pipeframe`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::recovery::Direction;

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "pipeframe_connections_active";
/// Name of the counter tracking frames crossing the framing stages.
pub const FRAMES_TOTAL: &str = "pipeframe_frames_total";
/// Name of the counter tracking pipeline faults.
pub const FAULTS_TOTAL: &str = "pipeframe_faults_total";
/// Name of the counter tracking failed broadcast deliveries.
pub const BROADCAST_FAILURES_TOTAL: &str = "pipeframe_broadcast_failures_total";

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a pipeline fault of the given kind.
pub fn inc_faults(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(FAULTS_TOTAL, "error_type" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a failed broadcast delivery.
pub fn inc_broadcast_failures() {
    #[cfg(feature = "metrics")]
    counter!(BROADCAST_FAILURES_TOTAL).increment(1);
}
