//! Request counters and latency statistics for the detection service.

use crate::error::DetectionError;
use crate::types::result::{BatchResult, InferenceResult, RiskLevel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector shared by all request handlers
pub struct DetectionMetrics {
    single_requests: AtomicU64,
    batch_requests: AtomicU64,
    rows_scored: AtomicU64,
    threats_detected: AtomicU64,
    validation_failures: AtomicU64,
    inference_failures: AtomicU64,
    coerced_cells: AtomicU64,
    /// Scored rows per risk tier
    risk_levels: RwLock<BTreeMap<RiskLevel, u64>>,
    /// Probability distribution buckets of width 0.1
    score_buckets: RwLock<[u64; 10]>,
    /// Request processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl DetectionMetrics {
    pub fn new() -> Self {
        Self {
            single_requests: AtomicU64::new(0),
            batch_requests: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            threats_detected: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            coerced_cells: AtomicU64::new(0),
            risk_levels: RwLock::new(BTreeMap::new()),
            score_buckets: RwLock::new([0; 10]),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a successful single-record request
    pub fn record_single(&self, result: &InferenceResult, elapsed: Duration) {
        self.single_requests.fetch_add(1, Ordering::Relaxed);
        self.record_row(result.is_threat, result.threat_probability, result.risk_level);
        self.record_latency(elapsed);
    }

    /// Record a successful batch request
    pub fn record_batch(&self, result: &BatchResult, elapsed: Duration) {
        self.batch_requests.fetch_add(1, Ordering::Relaxed);
        let coerced: usize = result.results.iter().map(|row| row.warnings.len()).sum();
        self.coerced_cells.fetch_add(coerced as u64, Ordering::Relaxed);
        for row in &result.results {
            self.record_row(row.is_threat, row.threat_probability, row.risk_level);
        }
        self.record_latency(elapsed);
    }

    /// Record a rejected or failed request
    pub fn record_failure(&self, error: &DetectionError) {
        if error.is_validation() {
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inference_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_row(&self, is_threat: u8, probability: f64, risk_level: RiskLevel) {
        self.rows_scored.fetch_add(1, Ordering::Relaxed);
        if is_threat == 1 {
            self.threats_detected.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut levels) = self.risk_levels.write() {
            *levels.entry(risk_level).or_insert(0) += 1;
        }

        let bucket = (probability * 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        if let Ok(mut times) = self.processing_times.write() {
            times.push(elapsed.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    /// Processing time percentiles over recent requests
    pub fn processing_stats(&self) -> ProcessingStats {
        let times = match self.processing_times.read() {
            Ok(times) => times.clone(),
            Err(_) => return ProcessingStats::default(),
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted = times;
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let risk_levels: BTreeMap<String, u64> = self
            .risk_levels
            .read()
            .map(|levels| {
                RiskLevel::ALL
                    .iter()
                    .map(|level| (level.to_string(), levels.get(level).copied().unwrap_or(0)))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            single_requests: self.single_requests.load(Ordering::Relaxed),
            batch_requests: self.batch_requests.load(Ordering::Relaxed),
            rows_scored: self.rows_scored.load(Ordering::Relaxed),
            threats_detected: self.threats_detected.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            coerced_cells: self.coerced_cells.load(Ordering::Relaxed),
            risk_levels,
            score_distribution: self.score_buckets.read().map(|b| *b).unwrap_or_default(),
            processing: self.processing_stats(),
        }
    }

    /// Log summary statistics
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        let threat_rate = if snapshot.rows_scored > 0 {
            (snapshot.threats_detected as f64 / snapshot.rows_scored as f64) * 100.0
        } else {
            0.0
        };

        info!(
            single_requests = snapshot.single_requests,
            batch_requests = snapshot.batch_requests,
            rows_scored = snapshot.rows_scored,
            threat_rate = format!("{:.1}%", threat_rate),
            validation_failures = snapshot.validation_failures,
            inference_failures = snapshot.inference_failures,
            coerced_cells = snapshot.coerced_cells,
            mean_us = snapshot.processing.mean_us,
            p99_us = snapshot.processing.p99_us,
            "Detection metrics summary"
        );

        for (level, count) in &snapshot.risk_levels {
            info!(risk_level = %level, rows = count, "Risk tier distribution");
        }
    }
}

impl Default for DetectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Serializable view of the collected metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub single_requests: u64,
    pub batch_requests: u64,
    pub rows_scored: u64,
    pub threats_detected: u64,
    pub validation_failures: u64,
    pub inference_failures: u64,
    pub coerced_cells: u64,
    pub risk_levels: BTreeMap<String, u64>,
    pub score_distribution: [u64; 10],
    pub processing: ProcessingStats,
}

/// Periodic metrics reporter
pub struct MetricsReporter {
    metrics: Arc<DetectionMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<DetectionMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.log_summary();
        }
    }
}
