//! Counters for ticket cache activity.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Snapshot of ticket cache counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct TicketCacheMetricsSnapshot {
    /// Requests answered from memory.
    #[builder(default)]
    pub l1_hits: u64,
    /// Requests answered from the durable tier.
    #[builder(default)]
    pub l2_hits: u64,
    /// Tickets obtained from the authority.
    #[builder(default)]
    pub acquisitions: u64,
    /// Calls to the authority that did not produce a ticket.
    #[builder(default)]
    pub acquisition_failures: u64,
    /// Durable writes that failed after a successful acquisition.
    #[builder(default)]
    pub durable_write_failures: u64,
}

impl TicketCacheMetricsSnapshot {
    /// Fraction of requests served without contacting the authority.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.acquisitions + self.acquisition_failures;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

#[derive(Default)]
struct MetricsInner {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    acquisitions: AtomicU64,
    acquisition_failures: AtomicU64,
    durable_write_failures: AtomicU64,
}

/// Thread-safe counters shared by clones.
#[derive(Clone, Default)]
pub struct TicketCacheMetrics {
    inner: Arc<MetricsInner>,
}

impl TicketCacheMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_l1_hit(&self) {
        self.inner.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_l2_hit(&self) {
        self.inner.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquisition(&self) {
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquisition_failure(&self) {
        self.inner.acquisition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_durable_write_failure(&self) {
        self.inner.durable_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> TicketCacheMetricsSnapshot {
        TicketCacheMetricsSnapshot {
            l1_hits: self.inner.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.inner.l2_hits.load(Ordering::Relaxed),
            acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            acquisition_failures: self.inner.acquisition_failures.load(Ordering::Relaxed),
            durable_write_failures: self.inner.durable_write_failures.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.inner.l1_hits.store(0, Ordering::Relaxed);
        self.inner.l2_hits.store(0, Ordering::Relaxed);
        self.inner.acquisitions.store(0, Ordering::Relaxed);
        self.inner.acquisition_failures.store(0, Ordering::Relaxed);
        self.inner.durable_write_failures.store(0, Ordering::Relaxed);
    }

    /// Logs current counters at INFO level.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            l1_hits = snapshot.l1_hits,
            l2_hits = snapshot.l2_hits,
            acquisitions = snapshot.acquisitions,
            acquisition_failures = snapshot.acquisition_failures,
            durable_write_failures = snapshot.durable_write_failures,
            hit_rate = format!("{:.2}%", snapshot.hit_rate() * 100.0),
            "ticket_cache_metrics"
        );
    }
}

impl std::fmt::Debug for TicketCacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCacheMetrics").field("snapshot", &self.snapshot()).finish()
    }
}
