//! Observability metrics for the tracker.
//!
//! Exposed via the `metrics` crate facade; install an exporter (e.g.
//! Prometheus) in the binary to publish them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `vigil_sweeps_total` | Counter | - | Completed sweeper passes |
//! | `vigil_operations_lost_total` | Counter | - | Operations transitioned to LOST |
//! | `vigil_sweep_duration_seconds` | Histogram | - | Sweep pass duration |
//! | `vigil_watch_published_total` | Counter | - | Snapshots delivered to watchers |
//! | `vigil_watch_dropped_total` | Counter | `reason` | Snapshots dropped on the fan-out path |

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: completed sweeper passes.
    pub const SWEEPS_TOTAL: &str = "vigil_sweeps_total";
    /// Counter: operations transitioned to LOST.
    pub const OPERATIONS_LOST_TOTAL: &str = "vigil_operations_lost_total";
    /// Histogram: sweep pass duration in seconds.
    pub const SWEEP_DURATION_SECONDS: &str = "vigil_sweep_duration_seconds";
    /// Counter: snapshots delivered to watchers.
    pub const WATCH_PUBLISHED_TOTAL: &str = "vigil_watch_published_total";
    /// Counter: snapshots dropped on the fan-out path.
    pub const WATCH_DROPPED_TOTAL: &str = "vigil_watch_dropped_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Why a fan-out delivery was dropped (`timeout`, `closed`).
    pub const REASON: &str = "reason";
}
