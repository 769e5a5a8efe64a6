//! Counters for certificate store activity.
//!
//! # Examples
//!
//! ```
//! use facturador_common_identity::CertificateStoreMetrics;
//!
//! let metrics = CertificateStoreMetrics::new();
//! metrics.record_disk_read();
//! metrics.record_cache_hit();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.disk_reads, 1);
//! assert!((snapshot.hit_rate() - 0.5).abs() < f64::EPSILON);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Snapshot of certificate store counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct CertificateStoreMetricsSnapshot {
    /// Lookups answered from the in-process cache.
    #[builder(default)]
    pub cache_hits: u64,
    /// Lookups that read the tenant directory.
    #[builder(default)]
    pub disk_reads: u64,
    /// Successful ingestions, all paths combined.
    #[builder(default)]
    pub ingests: u64,
    /// Ingestions rejected before anything was written.
    #[builder(default)]
    pub rejected_ingests: u64,
    /// Locally generated private keys.
    #[builder(default)]
    pub generated_keys: u64,
}

impl CertificateStoreMetricsSnapshot {
    /// Fraction of lookups served from the cache, `0.0` when there were none.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.disk_reads;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

struct MetricsInner {
    cache_hits: AtomicU64,
    disk_reads: AtomicU64,
    ingests: AtomicU64,
    rejected_ingests: AtomicU64,
    generated_keys: AtomicU64,
}

/// Thread-safe counters shared by clones.
#[derive(Clone)]
pub struct CertificateStoreMetrics {
    inner: Arc<MetricsInner>,
}

impl CertificateStoreMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                cache_hits: AtomicU64::new(0),
                disk_reads: AtomicU64::new(0),
                ingests: AtomicU64::new(0),
                rejected_ingests: AtomicU64::new(0),
                generated_keys: AtomicU64::new(0),
            }),
        }
    }

    /// Records a lookup served from the cache.
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lookup that read the tenant directory.
    pub fn record_disk_read(&self) {
        self.inner.disk_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed ingestion.
    pub fn record_ingest(&self) {
        self.inner.ingests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an ingestion that failed validation.
    pub fn record_rejected_ingest(&self) {
        self.inner.rejected_ingests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a locally generated private key.
    pub fn record_generated_key(&self) {
        self.inner.generated_keys.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> CertificateStoreMetricsSnapshot {
        CertificateStoreMetricsSnapshot {
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            disk_reads: self.inner.disk_reads.load(Ordering::Relaxed),
            ingests: self.inner.ingests.load(Ordering::Relaxed),
            rejected_ingests: self.inner.rejected_ingests.load(Ordering::Relaxed),
            generated_keys: self.inner.generated_keys.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        self.inner.cache_hits.store(0, Ordering::Relaxed);
        self.inner.disk_reads.store(0, Ordering::Relaxed);
        self.inner.ingests.store(0, Ordering::Relaxed);
        self.inner.rejected_ingests.store(0, Ordering::Relaxed);
        self.inner.generated_keys.store(0, Ordering::Relaxed);
    }

    /// Logs current counters at INFO level.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            cache_hits = snapshot.cache_hits,
            disk_reads = snapshot.disk_reads,
            ingests = snapshot.ingests,
            rejected_ingests = snapshot.rejected_ingests,
            generated_keys = snapshot.generated_keys,
            hit_rate = format!("{:.2}%", snapshot.hit_rate() * 100.0),
            "certificate_store_metrics"
        );
    }
}

impl Default for CertificateStoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CertificateStoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStoreMetrics").field("snapshot", &self.snapshot()).finish()
    }
}
