use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::bench::{BenchmarkConfig, MockServerConfig};

/// Streaming generation load benchmark
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Benchmark a running generation server
    Run(RunArgs),

    /// Start a mock generation server and benchmark it
    Standalone(StandaloneArgs),

    /// Compare mean latencies across sample CSV files (`*_c<N>.csv`)
    Compare(CompareArgs),
}

/// Load-shape options shared by `run` and `standalone`
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Model to request
    #[arg(short = 'm', long, env = "BENCH_MODEL", default_value = "gpt-oss:20b")]
    pub model: String,

    /// Test length in seconds
    #[arg(short = 'd', long, env = "BENCH_DURATION", default_value = "60")]
    pub duration: f64,

    /// Number of concurrent workers
    #[arg(short = 'c', long, env = "BENCH_CONCURRENCY", default_value = "8")]
    pub concurrency: usize,

    /// Admission slots for in-flight requests (defaults to --concurrency)
    #[arg(long, env = "BENCH_MAX_IN_FLIGHT")]
    pub max_in_flight: Option<usize>,

    /// Disable chain-of-thought/thinking on the server
    #[arg(long, env = "BENCH_NO_THINK")]
    pub no_think: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "BENCH_TIMEOUT", default_value = "600")]
    pub timeout: u64,

    /// Count non-2xx responses as failed requests
    #[arg(long, env = "BENCH_FAIL_ON_STATUS")]
    pub fail_on_status: bool,

    /// Unrecorded warmup requests before measuring
    #[arg(long, env = "BENCH_WARMUP", default_value = "0")]
    pub warmup: usize,

    /// Output path for per-request samples
    #[arg(short = 'o', long, env = "BENCH_OUT", default_value = "csv/combined.csv")]
    pub out: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Generation server base URL
    #[arg(
        short = 'H',
        long,
        env = "BENCH_HOST",
        default_value = "http://localhost:11434"
    )]
    pub host: String,

    /// JSONL prompt file (`{"prompt": ..., "label": ...}` per line)
    #[arg(short = 'p', long, env = "BENCH_PROMPTS", default_value = "prompts.jsonl")]
    pub prompts: PathBuf,

    #[command(flatten)]
    pub load: LoadArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StandaloneArgs {
    /// JSONL prompt file; a built-in corpus is used when omitted
    #[arg(short = 'p', long)]
    pub prompts: Option<PathBuf>,

    /// Mock server latency per streamed chunk in milliseconds
    #[arg(long, default_value = "5")]
    pub chunk_latency: u64,

    /// Mock server chunks per response
    #[arg(long, default_value = "20")]
    pub chunk_count: usize,

    /// Mock server error rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    pub error_rate: f64,

    /// Mock server omits the final summary record
    #[arg(long)]
    pub no_done: bool,

    #[command(flatten)]
    pub load: LoadArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Sample CSV files written by `run`
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

impl CliArgs {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Self {
        // Load .env file if it exists
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl LoadArgs {
    /// Benchmark configuration targeting `host`
    pub fn benchmark_config(&self, host: impl Into<String>) -> BenchmarkConfig {
        BenchmarkConfig {
            host: host.into(),
            model: self.model.clone(),
            duration_secs: self.duration,
            concurrency: self.concurrency,
            max_in_flight: self.max_in_flight,
            disable_reasoning: self.no_think,
            timeout_secs: self.timeout,
            fail_on_status: self.fail_on_status,
            ..Default::default()
        }
    }
}

impl StandaloneArgs {
    pub fn mock_config(&self) -> Result<MockServerConfig> {
        if !(0.0..=1.0).contains(&self.error_rate) {
            bail!("error rate must be within 0.0..=1.0 (got {})", self.error_rate);
        }
        Ok(MockServerConfig {
            port: 0,
            chunk_latency_ms: self.chunk_latency,
            chunk_count: self.chunk_count,
            error_rate: self.error_rate,
            send_done: !self.no_done,
            ..Default::default()
        })
    }
}
