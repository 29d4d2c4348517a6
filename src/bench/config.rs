//! Configuration structs for benchmarking.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::{BenchError, Result};

/// Prefix prepended to every prompt to keep reasoning models terse
pub const PROMPT_PREFIX: &str = "Reasoning: low\n\n";

/// Path of the streaming generation endpoint
pub const GENERATE_PATH: &str = "/api/generate";

/// Deterministic decoding parameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    /// Maximum number of output tokens
    pub num_predict: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.9,
            num_predict: 256,
        }
    }
}

/// Configuration for the mock generation server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockServerConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Simulated latency per chunk in milliseconds
    pub chunk_latency_ms: u64,
    /// Number of token-bearing chunks to generate
    pub chunk_count: usize,
    /// Error rate (0.0 to 1.0), answered with HTTP 500
    pub error_rate: f64,
    /// Whether to finish the stream with a `done` summary record
    pub send_done: bool,
    /// Interleave blank and non-JSON keepalive lines
    pub keepalive_noise: bool,
    /// Abort the connection after this many chunks
    pub abort_after_chunks: Option<usize>,
    /// Server-reported prompt token count
    pub prompt_tokens: u64,
    /// Server-reported prompt evaluation time in nanoseconds
    pub prompt_eval_duration_ns: u64,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            chunk_latency_ms: 10,
            chunk_count: 20,
            error_rate: 0.0,
            send_done: true,
            keepalive_noise: false,
            abort_after_chunks: None,
            prompt_tokens: 42,
            prompt_eval_duration_ns: 25_000_000,
        }
    }
}

/// Configuration for a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Base URL of the generation server
    pub host: String,
    /// Model to request
    pub model: String,
    /// Wall-clock duration of the run in seconds
    pub duration_secs: f64,
    /// Number of worker loops
    pub concurrency: usize,
    /// Admission slots for in-flight requests (defaults to `concurrency`)
    pub max_in_flight: Option<usize>,
    /// Ask the server not to produce chain-of-thought output
    pub disable_reasoning: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Count non-2xx responses as failed requests instead of decoding
    /// their bodies
    pub fail_on_status: bool,
    /// Decoding parameters
    pub options: GenerationOptions,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "gpt-oss:20b".to_string(),
            duration_secs: 60.0,
            concurrency: 8,
            max_in_flight: None,
            disable_reasoning: false,
            timeout_secs: 600,
            fail_on_status: false,
            options: GenerationOptions::default(),
        }
    }
}

impl BenchmarkConfig {
    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            return Err(BenchError::Config(format!(
                "duration must be greater than zero (got {})",
                self.duration_secs
            )));
        }
        if self.deadline_from(Instant::now()).is_err() {
            return Err(BenchError::Config(format!(
                "duration is too large (got {}s)",
                self.duration_secs
            )));
        }
        if self.concurrency == 0 {
            return Err(BenchError::Config(
                "concurrency must be greater than zero".to_string(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(BenchError::Config(
                "max_in_flight must be greater than zero".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(BenchError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(BenchError::Config("model must not be empty".to_string()));
        }
        self.endpoint_url()?;
        Ok(())
    }

    /// Full URL of the generation endpoint
    pub fn endpoint_url(&self) -> Result<Url> {
        let raw = format!("{}{}", self.host.trim_end_matches('/'), GENERATE_PATH);
        let url = Url::parse(&raw)
            .map_err(|e| BenchError::Config(format!("invalid host URL {}: {}", self.host, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BenchError::Config(format!(
                "host URL must use http or https: {}",
                self.host
            )));
        }
        Ok(url)
    }

    pub fn duration(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.duration_secs).map_err(|e| {
            BenchError::Config(format!("invalid duration {}s: {}", self.duration_secs, e))
        })
    }

    /// Instant at which a run started at `start` must stop issuing requests
    pub fn deadline_from(&self, start: Instant) -> Result<Instant> {
        let duration = self.duration()?;
        start.checked_add(duration).ok_or_else(|| {
            BenchError::Config(format!(
                "duration {}s overflows the clock",
                self.duration_secs
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Number of admission slots
    pub fn admission_slots(&self) -> usize {
        self.max_in_flight.unwrap_or(self.concurrency)
    }

    /// Build the generation request body for one prompt
    pub fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": format!("{}{}", PROMPT_PREFIX, prompt),
            "stream": true,
            "think": !self.disable_reasoning,
            "options": self.options,
        })
    }
}
