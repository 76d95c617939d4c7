//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics on the request path so handlers never contend on a mutex.
//! `report()` swaps the windowed counters for the periodic log line;
//! `snapshot()` reads the cumulative ones for Prometheus scrapes and never
//! resets anything.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not be used for coordination.

use crate::domain::types::{CrowdLabel, CLASS_COUNT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].swap(0, Ordering::Relaxed))
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector shared by the HTTP handlers
pub struct Metrics {
    /// Every HTTP request, any route (monotonic)
    requests_total: AtomicU64,
    /// `GET /health` requests (monotonic)
    health_checks_total: AtomicU64,
    /// Successful predictions per class (monotonic)
    predictions_by_class: [AtomicU64; CLASS_COUNT],
    /// Rejected `/predict` requests (monotonic)
    prediction_errors_total: AtomicU64,
    /// Requests for unknown routes (monotonic)
    not_found_total: AtomicU64,
    /// `/predict` latency histogram (monotonic, for Prometheus)
    latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Sum of `/predict` latencies (monotonic, for Prometheus)
    latency_sum_total_us: AtomicU64,
    /// `/predict` calls since last report (reset on report)
    predictions_since_report: AtomicU64,
    /// Sum of latencies since last report (reset on report)
    latency_sum_us: AtomicU64,
    /// Max latency since last report (reset on report)
    latency_max_us: AtomicU64,
    /// Latency histogram since last report (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            health_checks_total: AtomicU64::new(0),
            predictions_by_class: std::array::from_fn(|_| AtomicU64::new(0)),
            prediction_errors_total: AtomicU64::new(0),
            not_found_total: AtomicU64::new(0),
            latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_total_us: AtomicU64::new(0),
            predictions_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_health_check(&self) {
        self.health_checks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_not_found(&self) {
        self.not_found_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful prediction and its handling latency
    #[inline]
    pub fn record_prediction(&self, label: CrowdLabel, latency_us: u64) {
        self.predictions_by_class[label.index()].fetch_add(1, Ordering::Relaxed);
        self.record_predict_latency(latency_us);
    }

    /// Record a rejected `/predict` request and its handling latency
    #[inline]
    pub fn record_prediction_error(&self, latency_us: u64) {
        self.prediction_errors_total.fetch_add(1, Ordering::Relaxed);
        self.record_predict_latency(latency_us);
    }

    #[inline]
    fn record_predict_latency(&self, latency_us: u64) {
        let bucket = bucket_index(latency_us);
        self.latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);

        self.predictions_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn predictions_total(&self) -> u64 {
        self.predictions_by_class.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn prediction_errors_total(&self) -> u64 {
        self.prediction_errors_total.load(Ordering::Relaxed)
    }

    /// Cumulative counters for scraping; resets nothing
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency_buckets = load_buckets(&self.latency_buckets_total);
        MetricsSnapshot {
            requests_total: self.requests_total(),
            health_checks_total: self.health_checks_total.load(Ordering::Relaxed),
            predictions_by_class: std::array::from_fn(|i| {
                self.predictions_by_class[i].load(Ordering::Relaxed)
            }),
            prediction_errors_total: self.prediction_errors_total(),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            latency_count: latency_buckets.iter().sum(),
            latency_buckets,
            latency_sum_us: self.latency_sum_total_us.load(Ordering::Relaxed),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters.
    pub fn report(&self) -> MetricsSummary {
        let window_count = self.predictions_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let predict_per_sec = if elapsed.as_secs_f64() > 0.0 {
            window_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if window_count > 0 { latency_sum / window_count } else { 0 };

        MetricsSummary {
            requests_total: self.requests_total(),
            health_checks_total: self.health_checks_total.load(Ordering::Relaxed),
            predictions_by_class: std::array::from_fn(|i| {
                self.predictions_by_class[i].load(Ordering::Relaxed)
            }),
            prediction_errors_total: self.prediction_errors_total(),
            predict_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative view used by the `/metrics` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub health_checks_total: u64,
    /// Indexed by `CrowdLabel::index`
    pub predictions_by_class: [u64; CLASS_COUNT],
    pub prediction_errors_total: u64,
    pub not_found_total: u64,
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_sum_us: u64,
    pub latency_count: u64,
}

/// Windowed summary for the periodic log line
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub health_checks_total: u64,
    pub predictions_by_class: [u64; CLASS_COUNT],
    pub prediction_errors_total: u64,
    /// `/predict` calls per second over the window
    pub predict_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            requests_total = %self.requests_total,
            health_checks = %self.health_checks_total,
            predicted_low = %self.predictions_by_class[0],
            predicted_medium = %self.predictions_by_class[1],
            predicted_high = %self.predictions_by_class[2],
            predict_errors = %self.prediction_errors_total,
            predict_per_sec = format!("{:.1}", self.predict_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.requests_total(), 0);
        assert_eq!(metrics.predictions_total(), 0);
        assert_eq!(metrics.prediction_errors_total(), 0);
    }

    #[test]
    fn test_record_prediction() {
        let metrics = Metrics::new();

        metrics.record_prediction(CrowdLabel::High, 100);
        metrics.record_prediction(CrowdLabel::High, 200);
        metrics.record_prediction(CrowdLabel::Low, 300);
        metrics.record_prediction_error(50);

        assert_eq!(metrics.predictions_total(), 3);
        assert_eq!(metrics.prediction_errors_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 650);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.predictions_by_class, [1, 0, 2]);
        assert_eq!(snapshot.latency_count, 4);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_request();
        metrics.record_request();
        metrics.record_health_check();
        metrics.record_prediction(CrowdLabel::Medium, 100);
        metrics.record_prediction(CrowdLabel::Medium, 200);
        metrics.record_prediction(CrowdLabel::Low, 300);

        let summary = metrics.report();

        assert_eq!(summary.requests_total, 2);
        assert_eq!(summary.health_checks_total, 1);
        assert_eq!(summary.predictions_by_class, [1, 2, 0]);
        assert_eq!(summary.avg_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_latency_us, 300);

        // Periodic counters should be reset
        assert_eq!(metrics.predictions_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.requests_total, 0);
        assert_eq!(summary.avg_latency_us, 0);
        assert_eq!(summary.max_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_snapshot_survives_report() {
        let metrics = Metrics::new();
        metrics.record_prediction(CrowdLabel::Low, 150);
        metrics.record_prediction(CrowdLabel::Low, 60000);

        let _ = metrics.report();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.latency_count, 2);
        assert_eq!(snapshot.latency_sum_us, 60150);
        assert_eq!(snapshot.latency_buckets[1], 1);
        assert_eq!(snapshot.latency_buckets[10], 1);
        assert_eq!(snapshot, metrics.snapshot());
    }

    #[test]
    fn test_max_latency_tracking() {
        let metrics = Metrics::new();

        metrics.record_prediction(CrowdLabel::Low, 100);
        metrics.record_prediction(CrowdLabel::Low, 500);
        metrics.record_prediction_error(200);
        metrics.record_prediction(CrowdLabel::Low, 50);

        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        // 10 threads, 1000 requests each
        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_request();
                    m.record_prediction(CrowdLabel::ALL[i % CLASS_COUNT], i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.requests_total(), 10_000);
        assert_eq!(metrics.predictions_total(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(200), 1);
        assert_eq!(bucket_index(201), 2);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // 100 predictions at 150µs land in bucket 1 (≤200)
        for _ in 0..100 {
            metrics.record_prediction(CrowdLabel::Medium, 150);
        }

        let summary = metrics.report();

        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p95_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
