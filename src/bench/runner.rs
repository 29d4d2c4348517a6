//! Benchmark runner with concurrency control.
//!
//! A run launches `concurrency` worker lanes. Each lane loops until the
//! deadline: pick a prompt, take an admission slot, stream one request,
//! record the sample. The deadline is only checked between requests, so a
//! request started just before it runs to completion.

use chrono::Utc;
use reqwest::Url;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::config::BenchmarkConfig;
use super::decoder::{decode_stream, RequestMetrics};
use super::metrics::{BenchmarkSummary, Sample, SampleCollector};
use crate::error::{BenchError, Result};
use crate::prompts::PromptSet;

/// Interval between progress log lines
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Longest upstream error body kept in a sample when statuses fail requests
const ERROR_SNIPPET_CHARS: usize = 200;

/// Raw result of one run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub samples: Vec<Sample>,
    /// Measured from worker launch to the last worker exiting
    pub wall_time: Duration,
}

impl RunOutcome {
    pub fn summary(&self) -> BenchmarkSummary {
        BenchmarkSummary::from_samples(&self.samples, self.wall_time.as_secs_f64())
    }
}

/// Benchmark runner that drives a generation endpoint
pub struct BenchmarkRunner {
    config: Arc<BenchmarkConfig>,
    endpoint: Url,
    client: reqwest::Client,
}

/// State shared by all worker lanes of one run
struct WorkerContext {
    config: Arc<BenchmarkConfig>,
    endpoint: Url,
    client: reqwest::Client,
    prompts: PromptSet,
    semaphore: Arc<Semaphore>,
    collector: Arc<SampleCollector>,
    stop_at: Instant,
}

impl BenchmarkRunner {
    /// Create a runner, validating the configuration first
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.concurrency)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            endpoint,
            client,
        })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Issue unrecorded requests so the model is loaded before measuring
    pub async fn warmup(&self, prompts: &PromptSet, requests: usize) -> Result<()> {
        if requests == 0 {
            return Ok(());
        }
        tracing::info!("Running {} warmup requests...", requests);

        let mut failures = 0;
        for _ in 0..requests {
            let sample = execute_single_request(
                &self.client,
                &self.endpoint,
                &self.config,
                &prompts.choose().prompt,
            )
            .await;
            if !sample.ok {
                failures += 1;
            }
        }

        if failures == requests {
            return Err(BenchError::Config(format!(
                "all {} warmup requests to {} failed",
                requests, self.endpoint
            )));
        }
        Ok(())
    }

    /// Run the benchmark for the configured duration
    pub async fn run(&self, prompts: &PromptSet) -> Result<RunOutcome> {
        if prompts.is_empty() {
            return Err(BenchError::Corpus("prompt corpus is empty".to_string()));
        }

        let concurrency = self.config.concurrency;
        let collector = Arc::new(SampleCollector::new());
        let semaphore = Arc::new(Semaphore::new(self.config.admission_slots()));

        tracing::info!(
            model = %self.config.model,
            endpoint = %self.endpoint,
            concurrency,
            admission_slots = self.config.admission_slots(),
            duration_secs = self.config.duration_secs,
            "Starting benchmark"
        );

        let stop_at = self.config.deadline_from(Instant::now())?;
        collector.start();

        let context = Arc::new(WorkerContext {
            config: Arc::clone(&self.config),
            endpoint: self.endpoint.clone(),
            client: self.client.clone(),
            prompts: prompts.clone(),
            semaphore,
            collector: Arc::clone(&collector),
            stop_at,
        });

        let progress_handle = tokio::spawn(report_progress(Arc::clone(&collector), stop_at));

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(run_worker(worker_id, Arc::clone(&context)));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        collector.stop();
        let wall_time = collector.elapsed();
        drop(context);

        let _ = progress_handle.await;

        let samples = match Arc::try_unwrap(collector) {
            Ok(collector) => collector.into_samples(),
            Err(shared) => shared.snapshot(),
        };

        tracing::info!(
            "Benchmark finished: {} requests in {:.2}s",
            samples.len(),
            wall_time.as_secs_f64()
        );

        Ok(RunOutcome { samples, wall_time })
    }
}

/// One worker lane; terminates at the first deadline check past `stop_at`
async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) {
    while Instant::now() < ctx.stop_at {
        let record = ctx.prompts.choose().clone();
        let issued_at = Utc::now();

        let sample = {
            let Ok(_permit) = ctx.semaphore.acquire().await else {
                break;
            };
            execute_single_request(&ctx.client, &ctx.endpoint, &ctx.config, &record.prompt).await
        };

        ctx.collector
            .record(sample.with_origin(&record.label, worker_id, issued_at));
    }
    tracing::debug!("Worker {} stopped", worker_id);
}

/// Execute a single streaming request and turn the outcome into a sample.
///
/// Never fails: transport errors become `ok = false` samples.
pub async fn execute_single_request(
    client: &reqwest::Client,
    endpoint: &Url,
    config: &BenchmarkConfig,
    prompt: &str,
) -> Sample {
    let start = Instant::now();
    match stream_generate(client, endpoint, config, prompt, start).await {
        Ok(metrics) => {
            tracing::debug!(
                e2e_ms = metrics.e2e_ms,
                ttft_ms = ?metrics.ttft_ms,
                output_tokens = metrics.output_tokens,
                completed = metrics.completed,
                "Request finished"
            );
            Sample::succeeded(&config.model, metrics)
        }
        Err(err) => {
            let message = err.describe();
            tracing::warn!("Request failed: {}", message);
            Sample::failed(&config.model, message)
        }
    }
}

async fn stream_generate(
    client: &reqwest::Client,
    endpoint: &Url,
    config: &BenchmarkConfig,
    prompt: &str,
    start: Instant,
) -> Result<RequestMetrics> {
    let body = config.request_body(prompt);
    let response = client.post(endpoint.clone()).json(&body).send().await?;

    let status = response.status();
    if !status.is_success() {
        if config.fail_on_status {
            let text = response.text().await.unwrap_or_default();
            return Err(BenchError::UpstreamStatus {
                status: status.as_u16(),
                message: text.chars().take(ERROR_SNIPPET_CHARS).collect(),
            });
        }
        tracing::warn!(
            status = status.as_u16(),
            "Generation endpoint answered with a non-success status"
        );
    }

    let metrics = decode_stream(response.bytes_stream(), start).await?;
    Ok(metrics)
}

/// Periodic progress line until the deadline passes
async fn report_progress(collector: Arc<SampleCollector>, stop_at: Instant) {
    loop {
        let now = Instant::now();
        if now >= stop_at {
            break;
        }
        tokio::time::sleep(PROGRESS_INTERVAL.min(stop_at - now)).await;

        let elapsed = collector.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 {
            collector.output_tokens() as f64 / elapsed
        } else {
            0.0
        };
        tracing::info!(
            "Progress: {} requests ({} failed), {:.1} tok/s, {:.0}s elapsed",
            collector.total_requests(),
            collector.error_count(),
            throughput,
            elapsed
        );
    }
}
