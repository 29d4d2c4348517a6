//! Report generation for benchmark results.
//!
//! Writes raw samples as CSV, renders the aggregate summary for humans or
//! as JSON, and builds cross-run comparison tables from sample files.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::metrics::{mean, BenchmarkSummary, Metric, MetricStats, Sample};
use crate::error::Result;

/// Placeholder for unknown values in rendered output
const UNKNOWN: &str = "–";

static CONCURRENCY_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_c(\d+)\.csv$").unwrap());

/// Metrics shown in comparison tables
pub const COMPARE_METRICS: [Metric; 6] = [
    Metric::TtftMs,
    Metric::E2eMs,
    Metric::Tps,
    Metric::TpotMs,
    Metric::ItlMeanMs,
    Metric::ItlP95Ms,
];

/// Write samples to a CSV file, creating parent directories.
///
/// Nothing is written when there are no samples. Returns whether a file
/// was written.
pub fn write_samples_csv(path: &Path, samples: &[Sample]) -> Result<bool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if samples.is_empty() {
        tracing::warn!("No samples recorded, skipping {}", path.display());
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)?;
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(true)
}

/// Read samples back from a CSV file written by [`write_samples_csv`]
pub fn read_samples_csv(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut samples = Vec::new();
    for row in reader.deserialize::<Sample>() {
        samples.push(row?);
    }
    Ok(samples)
}

/// Render one metric line body: `mean=.. p50=.. p95=.. p99=..`
pub fn format_stats(stats: &MetricStats) -> String {
    match (stats.mean, stats.p50, stats.p95, stats.p99) {
        (Some(mean), Some(p50), Some(p95), Some(p99)) => format!(
            "mean={:.1}  p50={:.1}  p95={:.1}  p99={:.1}",
            mean, p50, p95, p99
        ),
        _ => UNKNOWN.to_string(),
    }
}

/// Render the human-readable summary
pub fn render_summary(title: &str, summary: &BenchmarkSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "=== {} ===", title);
    let _ = writeln!(
        out,
        "Requests OK/Total: {}/{}  |  Errors: {}",
        summary.n_ok, summary.n_requests, summary.n_errors
    );
    // A run without a single successful request prints as unknown
    match (summary.rps.filter(|rps| *rps > 0.0), summary.system_tps) {
        (Some(rps), Some(system_tps)) => {
            let _ = writeln!(out, "RPS: {:.2}   System TPS: {:.2}", rps, system_tps);
        }
        _ => {
            let _ = writeln!(out, "RPS: {}   System TPS: {}", UNKNOWN, UNKNOWN);
        }
    }
    for metric in Metric::ALL {
        let _ = writeln!(out, "{}: {}", metric, format_stats(summary.stats(metric)));
    }
    out
}

/// Summary title used by the CLI
pub fn summary_title(model: &str, duration_secs: f64, concurrency: usize) -> String {
    format!("{}  (dur={}s, conc={})", model, duration_secs, concurrency)
}

/// Export the summary as pretty JSON
pub fn summary_to_json(summary: &BenchmarkSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// Concurrency level encoded in a sample file name (`..._c16.csv`), default 1
pub fn concurrency_from_path(path: &Path) -> usize {
    let name = path.to_string_lossy();
    CONCURRENCY_SUFFIX
        .captures(&name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1)
}

/// Mean of each metric over successful samples, grouped by
/// (model, concurrency)
#[derive(Debug, Clone, Default)]
pub struct Comparison {
    values: BTreeMap<(String, usize), Vec<Sample>>,
}

impl Comparison {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add successful samples from one run at the given concurrency
    pub fn add_run(&mut self, concurrency: usize, samples: Vec<Sample>) {
        for sample in samples.into_iter().filter(|s| s.ok) {
            self.values
                .entry((sample.model.clone(), concurrency))
                .or_default()
                .push(sample);
        }
    }

    /// Load sample files, inferring concurrency from each file name
    pub fn load(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut comparison = Self::new();
        for path in paths {
            let path = path.as_ref();
            let samples = read_samples_csv(path)?;
            tracing::debug!("Loaded {} samples from {}", samples.len(), path.display());
            comparison.add_run(concurrency_from_path(path), samples);
        }
        Ok(comparison)
    }

    pub fn models(&self) -> Vec<String> {
        let models: BTreeSet<&String> = self.values.keys().map(|(model, _)| model).collect();
        models.into_iter().cloned().collect()
    }

    pub fn concurrency_levels(&self) -> Vec<usize> {
        let levels: BTreeSet<usize> = self.values.keys().map(|(_, c)| *c).collect();
        levels.into_iter().collect()
    }

    /// Mean of `metric` for one model at one concurrency level
    pub fn mean(&self, metric: Metric, model: &str, concurrency: usize) -> Option<f64> {
        let samples = self.values.get(&(model.to_string(), concurrency))?;
        let mut values: Vec<f64> = samples.iter().filter_map(|s| metric.value(s)).collect();
        values.sort_by(f64::total_cmp);
        mean(&values)
    }

    /// Render one table per metric: rows are concurrency levels, columns models
    pub fn render(&self) -> String {
        let models = self.models();
        let levels = self.concurrency_levels();
        let mut out = String::new();

        for metric in COMPARE_METRICS {
            let _ = writeln!(out, "\n=== {} vs concurrency ===", metric);
            let _ = write!(out, "{:>8}", "conc");
            for model in &models {
                let _ = write!(out, " │ {:>14}", model);
            }
            let _ = writeln!(out);

            for &level in &levels {
                let _ = write!(out, "{:>8}", level);
                for model in &models {
                    let cell = self
                        .mean(metric, model, level)
                        .map(|v| format!("{:.1}", v))
                        .unwrap_or_else(|| UNKNOWN.to_string());
                    let _ = write!(out, " │ {:>14}", cell);
                }
                let _ = writeln!(out);
            }
        }
        out
    }
}
