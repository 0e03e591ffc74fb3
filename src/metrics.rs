//! Metrics Collection for Webhook Observability
//!
//! Production metrics for the ingestion pipeline:
//! - Atomic counters for deliveries broken down by outcome
//! - Rejection counters broken down by failure category
//! - Memory-efficient histogram of end-to-end delivery durations
//! - Prometheus-compatible text format export, served at `/metrics`
//!
//! # Example
//!
//! ```rust,no_run
//! use stockkeep_billing::metrics::global_metrics;
//! use stockkeep_billing::webhook::engine::DeliveryOutcome;
//! use std::time::Duration;
//!
//! global_metrics().record_delivery(DeliveryOutcome::Applied, Duration::from_millis(12));
//! let output = global_metrics().to_prometheus_format();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use crate::webhook::engine::DeliveryOutcome;

/// Maximum number of duration samples kept for percentile calculation
const MAX_HISTOGRAM_SAMPLES: usize = 1000;

/// Metrics collector for the webhook engine.
///
/// Thread-safe via atomics and RwLocks; one delivery records exactly one
/// counter increment plus one histogram sample.
#[derive(Debug)]
pub struct Metrics {
    // === Counters ===
    /// Total deliveries that completed processing
    pub deliveries_total: AtomicU64,
    /// Deliveries that mutated a subscription
    pub applied_total: AtomicU64,
    /// Deliveries superseded by a later-ordered event
    pub stale_total: AtomicU64,
    /// Deliveries with no matching transition or an unknown type
    pub ignored_total: AtomicU64,
    /// Redeliveries of an already-admitted event
    pub duplicates_total: AtomicU64,
    /// Deliveries rejected before completing
    pub rejected_total: AtomicU64,

    // === Histograms ===
    /// Delivery durations for percentile calculation
    delivery_durations: RwLock<RingBuffer<Duration>>,

    // === Labeled counters ===
    /// Rejections broken down by failure category
    rejections_by_category: RwLock<HashMap<&'static str, u64>>,
}

/// Memory-efficient ring buffer for histogram samples
#[derive(Debug)]
struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    /// Position of next write (wraps around)
    write_pos: usize,
}

impl<T: Clone + Ord> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
        }
    }

    fn push(&mut self, value: T) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    /// Calculate percentile (0.0 to 1.0)
    fn percentile(&self, p: f64) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).cloned()
    }
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            deliveries_total: AtomicU64::new(0),
            applied_total: AtomicU64::new(0),
            stale_total: AtomicU64::new(0),
            ignored_total: AtomicU64::new(0),
            duplicates_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            delivery_durations: RwLock::new(RingBuffer::new(MAX_HISTOGRAM_SAMPLES)),
            rejections_by_category: RwLock::new(HashMap::new()),
        }
    }

    /// Record one completed delivery with its outcome and duration.
    pub fn record_delivery(&self, outcome: DeliveryOutcome, duration: Duration) {
        self.deliveries_total.fetch_add(1, Ordering::Relaxed);

        match outcome {
            DeliveryOutcome::Applied => &self.applied_total,
            DeliveryOutcome::Stale => &self.stale_total,
            DeliveryOutcome::Ignored => &self.ignored_total,
            DeliveryOutcome::Duplicate | DeliveryOutcome::InFlight => &self.duplicates_total,
        }
        .fetch_add(1, Ordering::Relaxed);

        if let Ok(mut durations) = self.delivery_durations.write() {
            durations.push(duration);
        }
    }

    /// Record one rejected delivery by failure category.
    pub fn record_rejection(&self, category: &'static str) {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut breakdown) = self.rejections_by_category.write() {
            *breakdown.entry(category).or_insert(0) += 1;
        }
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "stockkeep_billing_deliveries_total {}\n",
            self.deliveries_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "stockkeep_billing_applied_total {}\n",
            self.applied_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "stockkeep_billing_stale_total {}\n",
            self.stale_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "stockkeep_billing_ignored_total {}\n",
            self.ignored_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "stockkeep_billing_duplicates_total {}\n",
            self.duplicates_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "stockkeep_billing_rejected_total {}\n",
            self.rejected_total.load(Ordering::Relaxed)
        ));

        if let Ok(breakdown) = self.rejections_by_category.read() {
            let mut categories: Vec<_> = breakdown.iter().collect();
            categories.sort();
            for (category, count) in categories {
                output.push_str(&format!(
                    "stockkeep_billing_rejections_total{{category=\"{category}\"}} {count}\n"
                ));
            }
        }

        if let Ok(durations) = self.delivery_durations.read() {
            if durations.len() > 0 {
                for (label, p) in [("p50", 0.5), ("p95", 0.95), ("p99", 0.99)] {
                    if let Some(value) = durations.percentile(p) {
                        output.push_str(&format!(
                            "stockkeep_billing_delivery_duration_{label}_ms {}\n",
                            value.as_millis()
                        ));
                    }
                }
            }
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance for the engine
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get or initialize the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_recording() {
        let metrics = Metrics::new();

        metrics.record_delivery(DeliveryOutcome::Applied, Duration::from_millis(10));
        metrics.record_delivery(DeliveryOutcome::Stale, Duration::from_millis(5));
        metrics.record_delivery(DeliveryOutcome::Duplicate, Duration::from_millis(1));

        assert_eq!(metrics.deliveries_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.applied_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.stale_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.duplicates_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rejection_breakdown() {
        let metrics = Metrics::new();

        metrics.record_rejection("signature");
        metrics.record_rejection("signature");
        metrics.record_rejection("decode");

        assert_eq!(metrics.rejected_total.load(Ordering::Relaxed), 3);

        let output = metrics.to_prometheus_format();
        assert!(output.contains("stockkeep_billing_rejections_total{category=\"signature\"} 2"));
        assert!(output.contains("stockkeep_billing_rejections_total{category=\"decode\"} 1"));
    }

    #[test]
    fn test_prometheus_percentiles() {
        let metrics = Metrics::new();
        for ms in 1..=100u64 {
            metrics.record_delivery(DeliveryOutcome::Applied, Duration::from_millis(ms));
        }

        let output = metrics.to_prometheus_format();
        assert!(output.contains("stockkeep_billing_delivery_duration_p50_ms"));
        assert!(output.contains("stockkeep_billing_delivery_duration_p99_ms"));
    }

    #[test]
    fn test_ring_buffer_wraps() {
        let mut buffer = RingBuffer::new(4);
        for i in 0..10 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 4);
        // Oldest samples were overwritten
        assert_eq!(buffer.percentile(1.0), Some(9));
    }
}
