//! Load benchmark for streaming text-generation endpoints.
//!
//! This module provides:
//! - Incremental NDJSON stream decoder with TTFT / inter-token timing
//! - Deadline-bounded runner with a fixed set of worker lanes
//! - Percentile aggregation over per-request samples
//! - CSV / text / JSON reporting and cross-run comparison
//! - Mock generation server for tests and standalone runs

pub mod config;
pub mod decoder;
pub mod metrics;
pub mod mock_server;
pub mod report;
pub mod runner;

pub use config::{BenchmarkConfig, GenerationOptions, MockServerConfig};
pub use decoder::{decode_stream, GenerateRecord, RequestMetrics, StreamDecoder};
pub use metrics::{percentile, BenchmarkSummary, Metric, MetricStats, Sample, SampleCollector};
pub use mock_server::MockGenerateServer;
pub use report::Comparison;
pub use runner::{BenchmarkRunner, RunOutcome};
