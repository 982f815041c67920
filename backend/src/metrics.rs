//! Service counters reported on `/status`.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated metrics for the order/payment service.
///
/// Thread-safe via atomics; shared via `Arc<Metrics>`.
pub struct Metrics {
    /// Orders created.
    pub orders_created: AtomicU64,
    /// Admin status writes that hit an existing order.
    pub status_updates: AtomicU64,
    /// Orders moved to `paid` by reconciliation.
    pub orders_reconciled: AtomicU64,
    /// Hosted checkout sessions successfully created.
    pub sessions_created: AtomicU64,
    /// Session creations that failed at the processor or in transit.
    pub session_failures: AtomicU64,
    /// Session status lookups served.
    pub status_lookups: AtomicU64,
    /// Status lookups that ended in the `failed` case.
    pub status_lookup_failures: AtomicU64,
    /// Outbound HTTP calls made to the processor.
    pub outbound_calls: AtomicU64,
    /// Sum of outbound call latencies in milliseconds (for computing average).
    pub outbound_latency_sum_ms: AtomicU64,
}

impl Metrics {
    /// Create a new zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            orders_created: AtomicU64::new(0),
            status_updates: AtomicU64::new(0),
            orders_reconciled: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            session_failures: AtomicU64::new(0),
            status_lookups: AtomicU64::new(0),
            status_lookup_failures: AtomicU64::new(0),
            outbound_calls: AtomicU64::new(0),
            outbound_latency_sum_ms: AtomicU64::new(0),
        }
    }

    pub fn record_order(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_update(&self) {
        self.status_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciled(&self) {
        self.orders_reconciled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a session creation attempt.
    pub fn record_session(&self, ok: bool) {
        if ok {
            self.sessions_created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.session_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a status lookup and whether it ended as `failed`.
    pub fn record_status_lookup(&self, failed: bool) {
        self.status_lookups.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.status_lookup_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one outbound processor call with its latency.
    pub fn record_outbound_call(&self, latency_ms: u64) {
        self.outbound_calls.fetch_add(1, Ordering::Relaxed);
        self.outbound_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn snapshot_outbound_calls(&self) -> u64 {
        self.outbound_calls.load(Ordering::Relaxed)
    }

    /// Compute average outbound latency in milliseconds, or 0 if none.
    pub fn avg_outbound_latency_ms(&self) -> u64 {
        let count = self.outbound_calls.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.outbound_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    /// Serialize metrics as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "orders_created": self.orders_created.load(Ordering::Relaxed),
            "status_updates": self.status_updates.load(Ordering::Relaxed),
            "orders_reconciled": self.orders_reconciled.load(Ordering::Relaxed),
            "sessions_created": self.sessions_created.load(Ordering::Relaxed),
            "session_failures": self.session_failures.load(Ordering::Relaxed),
            "status_lookups": self.status_lookups.load(Ordering::Relaxed),
            "status_lookup_failures": self.status_lookup_failures.load(Ordering::Relaxed),
            "outbound_calls": self.outbound_calls.load(Ordering::Relaxed),
            "avg_outbound_latency_ms": self.avg_outbound_latency_ms(),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
