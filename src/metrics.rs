//! Request metrics and periodic summaries for the serving endpoint.

use crate::types::RiskLevel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;

/// Metrics collector for the prediction endpoint
pub struct ServingMetrics {
    /// Predict requests received
    pub requests: AtomicU64,
    /// Predict requests answered with a decision
    pub predictions: AtomicU64,
    /// Decisions with a positive label
    pub positives: AtomicU64,
    /// Successful bundle reloads
    pub reloads: AtomicU64,
    /// Failures by error kind
    failures: RwLock<HashMap<&'static str, u64>>,
    /// Decisions by risk level
    by_level: RwLock<HashMap<&'static str, u64>>,
    /// Scoring times (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            positives: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            failures: RwLock::new(HashMap::new()),
            by_level: RwLock::new(HashMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful prediction
    pub fn record_prediction(
        &self,
        latency: Duration,
        probability: f64,
        label: bool,
        risk_level: RiskLevel,
    ) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        if label {
            self.positives.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.drain(0..LATENCY_WINDOW / 2);
            }
        }

        let bucket = ((probability * 10.0).max(0.0) as usize).min(9);
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }

        if let Ok(mut by_level) = self.by_level.write() {
            *by_level.entry(risk_level.as_str()).or_insert(0) += 1;
        }
    }

    /// Record a failed request by error kind
    pub fn record_failure(&self, kind: &'static str) {
        if let Ok(mut failures) = self.failures.write() {
            *failures.entry(kind).or_insert(0) += 1;
        }
    }

    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Scoring latency statistics
    pub fn latency_stats(&self) -> LatencyStats {
        let Ok(times) = self.latencies.read() else {
            return LatencyStats::default();
        };
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        drop(times);
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Predictions per second since start
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn failures(&self) -> HashMap<&'static str, u64> {
        self.failures.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn by_risk_level(&self) -> HashMap<&'static str, u64> {
        self.by_level.read().map(|l| l.clone()).unwrap_or_default()
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let requests = self.requests.load(Ordering::Relaxed);
        let predictions = self.predictions.load(Ordering::Relaxed);
        let positives = self.positives.load(Ordering::Relaxed);
        let positive_rate = if predictions > 0 {
            (positives as f64 / predictions as f64) * 100.0
        } else {
            0.0
        };

        let latency = self.latency_stats();
        let score_dist = self.score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║              PREDICTION SERVICE - METRICS SUMMARY            ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests: {:>8}  │  Predictions: {:>8}  │  {:>6.1}/s     ║",
            requests,
            predictions,
            self.throughput()
        );
        info!(
            "║ Positive labels: {:>8}  │  Positive rate: {:>6.1}%          ║",
            positives, positive_rate
        );
        info!(
            "║ Scoring time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        for (kind, count) in &self.failures() {
            info!("║   failed {:22}: {:>8}                         ║", kind, count);
        }
        for (level, count) in &self.by_risk_level() {
            info!("║   risk {:10}: {:>8}                                     ║", level, count);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Probability Distribution:                                    ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoring time statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodic metrics reporter
pub struct MetricsReporter {
    metrics: Arc<ServingMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServingMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServingMetrics::new();

        metrics.record_request();
        metrics.record_request();
        metrics.record_request();
        metrics.record_prediction(Duration::from_micros(100), 0.15, false, RiskLevel::Low);
        metrics.record_prediction(Duration::from_micros(300), 0.95, true, RiskLevel::Critical);
        metrics.record_failure("invalid_record");

        assert_eq!(metrics.requests.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.predictions.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.positives.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.failures()["invalid_record"], 1);
        assert_eq!(metrics.by_risk_level()["critical"], 1);

        let dist = metrics.score_distribution();
        assert_eq!(dist[1], 1);
        assert_eq!(dist[9], 1);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = ServingMetrics::new();
        assert_eq!(metrics.latency_stats(), LatencyStats::default());

        for us in 1..=100 {
            metrics.record_prediction(Duration::from_micros(us), 0.5, true, RiskLevel::Medium);
        }
        let stats = metrics.latency_stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.max_us, 100);
        assert_eq!(stats.p50_us, 51);
        assert_eq!(stats.p99_us, 100);
    }

    #[test]
    fn test_probability_one_lands_in_last_bucket() {
        let metrics = ServingMetrics::new();
        metrics.record_prediction(Duration::ZERO, 1.0, true, RiskLevel::Critical);
        assert_eq!(metrics.score_distribution()[9], 1);
    }
}
