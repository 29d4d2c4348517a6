//! Per-request samples, thread-safe sample collection and percentile
//! aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::decoder::RequestMetrics;

/// Outcome of one request attempt.
///
/// Field order is the column order of the sample CSV. Optional metrics are
/// `None` when unknown and serialize as empty cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub label: String,
    pub ok: bool,
    pub error: Option<String>,
    pub ttft_ms: Option<f64>,
    pub e2e_ms: Option<f64>,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub tps: Option<f64>,
    pub tpot_ms: Option<f64>,
    pub prefill_ms: Option<f64>,
    pub itl_mean_ms: Option<f64>,
    pub itl_p95_ms: Option<f64>,
    pub itl_count: u64,
    /// Worker lane that issued the request (not persisted)
    #[serde(skip)]
    pub worker_id: usize,
}

impl Sample {
    /// Sample for a request whose stream was consumed without transport errors
    pub fn succeeded(model: impl Into<String>, metrics: RequestMetrics) -> Self {
        Self {
            timestamp: Utc::now(),
            model: model.into(),
            label: String::new(),
            ok: true,
            error: None,
            ttft_ms: metrics.ttft_ms,
            e2e_ms: Some(metrics.e2e_ms),
            prompt_tokens: metrics.prompt_tokens,
            output_tokens: metrics.output_tokens,
            tps: metrics.tps,
            tpot_ms: metrics.tpot_ms,
            prefill_ms: metrics.prefill_ms,
            itl_mean_ms: metrics.itl_mean_ms,
            itl_p95_ms: metrics.itl_p95_ms,
            itl_count: metrics.itl_count,
            worker_id: 0,
        }
    }

    /// Sample for a failed attempt; carries no metrics
    pub fn failed(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            model: model.into(),
            label: String::new(),
            ok: false,
            error: Some(error.into()),
            ttft_ms: None,
            e2e_ms: None,
            prompt_tokens: 0,
            output_tokens: 0,
            tps: None,
            tpot_ms: None,
            prefill_ms: None,
            itl_mean_ms: None,
            itl_p95_ms: None,
            itl_count: 0,
            worker_id: 0,
        }
    }

    /// Tag the sample with the prompt label, worker lane and issue time
    pub fn with_origin(mut self, label: &str, worker_id: usize, timestamp: DateTime<Utc>) -> Self {
        self.label = label.to_string();
        self.worker_id = worker_id;
        self.timestamp = timestamp;
        self
    }
}

/// Distributional metrics reported in the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    TtftMs,
    E2eMs,
    Tps,
    TpotMs,
    PrefillMs,
    ItlMeanMs,
    ItlP95Ms,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::TtftMs,
        Metric::E2eMs,
        Metric::Tps,
        Metric::TpotMs,
        Metric::PrefillMs,
        Metric::ItlMeanMs,
        Metric::ItlP95Ms,
    ];

    /// Column / report name
    pub fn name(&self) -> &'static str {
        match self {
            Metric::TtftMs => "ttft_ms",
            Metric::E2eMs => "e2e_ms",
            Metric::Tps => "tps",
            Metric::TpotMs => "tpot_ms",
            Metric::PrefillMs => "prefill_ms",
            Metric::ItlMeanMs => "itl_mean_ms",
            Metric::ItlP95Ms => "itl_p95_ms",
        }
    }

    pub fn value(&self, sample: &Sample) -> Option<f64> {
        match self {
            Metric::TtftMs => sample.ttft_ms,
            Metric::E2eMs => sample.e2e_ms,
            Metric::Tps => sample.tps,
            Metric::TpotMs => sample.tpot_ms,
            Metric::PrefillMs => sample.prefill_ms,
            Metric::ItlMeanMs => sample.itl_mean_ms,
            Metric::ItlP95Ms => sample.itl_p95_ms,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Linear-interpolation percentile, `p` in `[0, 100]`.
///
/// Returns `None` for an empty input.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

/// [`percentile`] over an already ascending slice
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }

    let k = (n - 1) as f64 * p.clamp(0.0, 100.0) / 100.0;
    let f = k.floor() as usize;
    let c = (f + 1).min(n - 1);
    if f == c {
        return Some(sorted[f]);
    }
    Some(sorted[f] + (sorted[c] - sorted[f]) * (k - f as f64))
}

/// Arithmetic mean, `None` for an empty input
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean and percentiles of one metric over the samples that report it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: Option<f64>,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub count: usize,
}

impl MetricStats {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        // Sorting first also fixes the summation order of the mean, so the
        // result does not depend on sample arrival order.
        values.sort_by(f64::total_cmp);
        Self {
            mean: mean(&values),
            p50: percentile_sorted(&values, 50.0),
            p95: percentile_sorted(&values, 95.0),
            p99: percentile_sorted(&values, 99.0),
            count: values.len(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.count > 0
    }
}

/// Aggregate view of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub n_requests: usize,
    pub n_ok: usize,
    pub n_errors: usize,
    pub wall_secs: f64,
    pub rps: Option<f64>,
    pub system_tps: Option<f64>,
    pub ttft_ms: MetricStats,
    pub e2e_ms: MetricStats,
    pub tps: MetricStats,
    pub tpot_ms: MetricStats,
    pub prefill_ms: MetricStats,
    pub itl_mean_ms: MetricStats,
    pub itl_p95_ms: MetricStats,
}

impl BenchmarkSummary {
    /// Reduce a frozen sample set. Independent of sample order.
    pub fn from_samples(samples: &[Sample], wall_secs: f64) -> Self {
        let ok: Vec<&Sample> = samples.iter().filter(|s| s.ok).collect();
        let n_ok = ok.len();

        let stats = |metric: Metric| {
            MetricStats::from_values(ok.iter().filter_map(|s| metric.value(s)).collect())
        };

        let total_output_tokens: u64 = ok.iter().map(|s| s.output_tokens).sum();
        let (rps, system_tps) = if wall_secs > 0.0 {
            (
                Some(n_ok as f64 / wall_secs),
                Some(total_output_tokens as f64 / wall_secs),
            )
        } else {
            (None, None)
        };

        Self {
            n_requests: samples.len(),
            n_ok,
            n_errors: samples.len() - n_ok,
            wall_secs,
            rps,
            system_tps,
            ttft_ms: stats(Metric::TtftMs),
            e2e_ms: stats(Metric::E2eMs),
            tps: stats(Metric::Tps),
            tpot_ms: stats(Metric::TpotMs),
            prefill_ms: stats(Metric::PrefillMs),
            itl_mean_ms: stats(Metric::ItlMeanMs),
            itl_p95_ms: stats(Metric::ItlP95Ms),
        }
    }

    pub fn stats(&self, metric: Metric) -> &MetricStats {
        match metric {
            Metric::TtftMs => &self.ttft_ms,
            Metric::E2eMs => &self.e2e_ms,
            Metric::Tps => &self.tps,
            Metric::TpotMs => &self.tpot_ms,
            Metric::PrefillMs => &self.prefill_ms,
            Metric::ItlMeanMs => &self.itl_mean_ms,
            Metric::ItlP95Ms => &self.itl_p95_ms,
        }
    }
}

/// Thread-safe, append-only collection of samples for one run
pub struct SampleCollector {
    samples: Mutex<Vec<Sample>>,
    /// Total successful requests
    success_count: AtomicU64,
    /// Total failed requests
    error_count: AtomicU64,
    /// Output tokens reported by successful requests
    output_tokens: AtomicU64,
    /// Start time of the benchmark
    start_time: Mutex<Option<Instant>>,
    /// End time of the benchmark
    end_time: Mutex<Option<Instant>>,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            start_time: Mutex::new(None),
            end_time: Mutex::new(None),
        }
    }

    /// Mark the start of the benchmark
    pub fn start(&self) {
        *lock(&self.start_time) = Some(Instant::now());
        *lock(&self.end_time) = None;
    }

    /// Mark the end of the benchmark
    pub fn stop(&self) {
        *lock(&self.end_time) = Some(Instant::now());
    }

    /// Append one sample
    pub fn record(&self, sample: Sample) {
        if sample.ok {
            self.success_count.fetch_add(1, Ordering::Relaxed);
            self.output_tokens
                .fetch_add(sample.output_tokens, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        lock(&self.samples).push(sample);
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count() + self.error_count()
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }

    /// Elapsed time between `start` and `stop` (or now, while running)
    pub fn elapsed(&self) -> Duration {
        let start = *lock(&self.start_time);
        let end = *lock(&self.end_time);
        match (start, end) {
            (Some(s), Some(e)) => e.duration_since(s),
            (Some(s), None) => s.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Copy of the samples recorded so far
    pub fn snapshot(&self) -> Vec<Sample> {
        lock(&self.samples).clone()
    }

    /// Take ownership of all recorded samples
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SampleCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking worker cannot leave a half-pushed Vec behind, so the data
    // is still consistent after poisoning.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
