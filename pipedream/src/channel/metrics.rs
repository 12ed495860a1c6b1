//! Per-gate counters for backpressure monitoring.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters maintained by a [`FanInGate`](super::FanInGate).
#[derive(Debug, Default)]
pub struct GateMetrics {
    /// Items accepted by the gate.
    items_put: AtomicU64,
    /// Completion markers consumed by readers.
    markers_received: AtomicU64,
    /// Puts that found the gate full and had to wait.
    blocked_puts: AtomicU64,
    /// Total time spent waiting for capacity, in microseconds.
    blocked_micros: AtomicU64,
}

impl GateMetrics {
    /// Records an accepted item.
    pub fn record_put(&self) {
        self.items_put.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a consumed completion marker.
    pub fn record_marker(&self) {
        self.markers_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a put that waited `waited` for capacity.
    pub fn record_blocked(&self, waited: Duration) {
        self.blocked_puts.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.blocked_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Returns the number of accepted items.
    #[must_use]
    pub fn items_put(&self) -> u64 {
        self.items_put.load(Ordering::Relaxed)
    }

    /// Returns the number of puts that had to wait.
    #[must_use]
    pub fn blocked_puts(&self) -> u64 {
        self.blocked_puts.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> GateMetricsSnapshot {
        GateMetricsSnapshot {
            items_put: self.items_put(),
            markers_received: self.markers_received.load(Ordering::Relaxed),
            blocked_puts: self.blocked_puts(),
            blocked_ms: self.blocked_micros.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// A copy of a gate's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GateMetricsSnapshot {
    /// Items accepted by the gate.
    pub items_put: u64,
    /// Completion markers consumed by readers.
    pub markers_received: u64,
    /// Puts that found the gate full and had to wait.
    pub blocked_puts: u64,
    /// Total time spent waiting for capacity, in milliseconds.
    pub blocked_ms: f64,
}

impl GateMetricsSnapshot {
    /// Converts the snapshot to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "items_put": self.items_put,
            "markers_received": self.markers_received,
            "blocked_puts": self.blocked_puts,
            "blocked_ms": (self.blocked_ms * 100.0).round() / 100.0,
        })
    }
}
