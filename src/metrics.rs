//! Metrics for mapper execution.
//!
//! This module provides `MapperMetrics`, a point-in-time snapshot of a
//! mapper's progress counters.

use serde::{Deserialize, Serialize};

/// A snapshot of a mapper's progress at the moment it was taken.
///
/// Obtained from [`BoundedMapper::metrics`](crate::BoundedMapper::metrics).
/// `processed` and `failed` are monotonic; `in_flight` fluctuates between
/// zero and the configured concurrency limit.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperMetrics {
    /// Worker invocations that completed successfully.
    pub processed: usize,
    /// Worker invocations that failed (returned an error or panicked).
    pub failed: usize,
    /// Worker invocations currently running.
    pub in_flight: usize,
}

impl MapperMetrics {
    /// Total invocations that have finished, successfully or not.
    pub fn settled(&self) -> usize {
        self.processed + self.failed
    }

    /// Check if any worker invocation has failed so far.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
