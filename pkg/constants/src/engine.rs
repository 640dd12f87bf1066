//! Reconciliation engine constants.

use std::time::Duration;

/// Periodic resync interval. Every key of every kind is re-enqueued at this
/// cadence, so drift is repaired even if an event was lost.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Base delay for per-key exponential backoff after a failed reconcile.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling for per-key exponential backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// How long in-flight reconciles may keep running after shutdown is signalled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
