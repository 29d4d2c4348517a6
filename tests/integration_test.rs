// Integration tests for the streaming load benchmark
//
// These tests drive the full runner against in-process generation servers
// (the bundled mock, mockito fixtures and ad-hoc axum handlers) and check
// the samples and summaries it produces.

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stream_loadbench::{
    bench::{
        report::{read_samples_csv, write_samples_csv},
        BenchmarkConfig, BenchmarkRunner, BenchmarkSummary, Metric, MockGenerateServer,
        MockServerConfig,
    },
    error::BenchError,
    prompts::{PromptRecord, PromptSet},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn test_prompts() -> PromptSet {
    PromptSet::new(vec![
        PromptRecord::new("What is 2+2?", "math"),
        PromptRecord::new("Name a color.", "trivia"),
        PromptRecord::new("Say hello.", "chat"),
    ])
    .expect("non-empty corpus")
}

fn test_config(host: String, concurrency: usize, duration_secs: f64) -> BenchmarkConfig {
    BenchmarkConfig {
        host,
        model: "test-model".to_string(),
        duration_secs,
        concurrency,
        timeout_secs: 10,
        ..Default::default()
    }
}

async fn start_mock(config: MockServerConfig) -> MockGenerateServer {
    let mut server = MockGenerateServer::new(config);
    server.start().await.expect("mock server should start");
    server
}

/// Serve an ad-hoc router on a random port and return its base URL
async fn spawn_app(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://127.0.0.1:{}", port)
}

/// Base URL of a port with nothing listening
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn ndjson(records: &[Value]) -> String {
    records.iter().map(|r| format!("{}\n", r)).collect()
}

fn done_record() -> Value {
    json!({
        "response": "",
        "done": true,
        "eval_count": 3,
        "eval_duration": 30_000_000u64,
        "prompt_eval_count": 9,
        "prompt_eval_duration": 4_000_000u64,
    })
}

// ==================================================================================================
// Driver Tests
// ==================================================================================================

#[tokio::test]
async fn test_every_lane_produces_samples_within_deadline() {
    let server = start_mock(MockServerConfig {
        chunk_latency_ms: 0,
        chunk_count: 3,
        ..Default::default()
    })
    .await;

    let runner = BenchmarkRunner::new(test_config(server.url(), 4, 2.0)).unwrap();
    let started = Instant::now();
    let outcome = runner.run(&test_prompts()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(3500), "took {:?}", elapsed);
    assert!(outcome.wall_time >= Duration::from_secs(2));

    let lanes: HashSet<usize> = outcome.samples.iter().map(|s| s.worker_id).collect();
    assert_eq!(lanes, (0..4).collect::<HashSet<_>>());
    assert!(outcome.samples.iter().all(|s| s.ok));
    assert!(outcome.samples.iter().all(|s| s.model == "test-model"));

    let labels: HashSet<&str> = ["math", "trivia", "chat"].into_iter().collect();
    assert!(outcome
        .samples
        .iter()
        .all(|s| labels.contains(s.label.as_str())));

    let summary = outcome.summary();
    assert_eq!(summary.n_requests, outcome.samples.len());
    assert_eq!(summary.n_errors, 0);
    assert_eq!(summary.ttft_ms.count, summary.n_ok);
    assert!(summary.rps.unwrap() > 0.0);
    // mock reports chunk_count output tokens per request
    let expected_tps = (3 * summary.n_ok) as f64 / outcome.wall_time.as_secs_f64();
    assert!((summary.system_tps.unwrap() - expected_tps).abs() < 1e-9);
}

#[tokio::test]
async fn test_connection_refused_yields_failed_samples() {
    let runner = BenchmarkRunner::new(test_config(closed_port_url(), 2, 0.3)).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    assert!(!outcome.samples.is_empty());
    for sample in &outcome.samples {
        assert!(!sample.ok);
        assert!(!sample.error.as_deref().unwrap_or_default().is_empty());
        assert_eq!(sample.e2e_ms, None);
        for metric in Metric::ALL {
            assert_eq!(metric.value(sample), None, "{} populated", metric);
        }
    }

    // The run still completes with a summary where everything is unknown
    let summary = outcome.summary();
    assert_eq!(summary.n_errors, summary.n_requests);
    assert_eq!(summary.n_ok, 0);
    for metric in Metric::ALL {
        assert_eq!(summary.stats(metric).count, 0);
        assert_eq!(summary.stats(metric).mean, None);
    }
}

#[tokio::test]
async fn test_stream_without_done_is_ok_with_unknown_metrics() {
    let mut server = mockito::Server::new_async().await;
    let body = ndjson(&[
        json!({"response": "Hel", "done": false}),
        json!({"response": "lo", "done": false}),
        json!({"response": "!", "done": false}),
    ]);
    let _mock = server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(body)
        .create_async()
        .await;

    let runner = BenchmarkRunner::new(test_config(server.url(), 1, 0.2)).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    assert!(!outcome.samples.is_empty());
    for sample in &outcome.samples {
        assert!(sample.ok);
        assert_eq!(sample.error, None);
        assert!(sample.e2e_ms.is_some());
        assert_eq!(sample.ttft_ms, None);
        assert_eq!(sample.tps, None);
        assert_eq!(sample.tpot_ms, None);
        assert_eq!(sample.prefill_ms, None);
        assert_eq!(sample.output_tokens, 0);
    }
}

#[tokio::test]
async fn test_keepalive_noise_is_ignored() {
    let mut server = mockito::Server::new_async().await;
    let mut body = String::from("\n: ping\n");
    body.push_str(&ndjson(&[json!({"response": "a", "done": false})]));
    body.push_str("not-json\n\n");
    body.push_str(&ndjson(&[json!({"response": "b", "done": false}), done_record()]));
    let _mock = server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let runner = BenchmarkRunner::new(test_config(server.url(), 1, 0.1)).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    let sample = &outcome.samples[0];
    assert!(sample.ok);
    assert_eq!(sample.itl_count, 2);
    assert_eq!(sample.output_tokens, 3);
    assert_eq!(sample.prompt_tokens, 9);
    assert!((sample.tps.unwrap() - 100.0).abs() < 1e-9);
    assert!((sample.tpot_ms.unwrap() - 10.0).abs() < 1e-9);
    assert!((sample.prefill_ms.unwrap() - 4.0).abs() < 1e-9);
    assert!(sample.ttft_ms.is_some());
}

#[tokio::test]
async fn test_upstream_error_status_is_decoded_as_stream() {
    let server = start_mock(MockServerConfig {
        error_rate: 1.0,
        ..Default::default()
    })
    .await;

    let runner = BenchmarkRunner::new(test_config(server.url(), 2, 0.2)).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    assert!(!outcome.samples.is_empty());
    for sample in &outcome.samples {
        // The connection worked; the error body is skipped as non-record lines
        assert!(sample.ok);
        assert!(sample.error.is_none());
        assert!(sample.e2e_ms.is_some());
        assert!(sample.ttft_ms.is_none());
        assert!(sample.tps.is_none());
        assert_eq!(sample.output_tokens, 0);
    }

    let summary = outcome.summary();
    assert_eq!(summary.n_ok, summary.n_requests);
    assert_eq!(summary.n_errors, 0);
    assert!(summary.e2e_ms.count > 0);
}

#[tokio::test]
async fn test_upstream_error_status_fails_when_opted_in() {
    let server = start_mock(MockServerConfig {
        error_rate: 1.0,
        ..Default::default()
    })
    .await;

    let config = BenchmarkConfig {
        fail_on_status: true,
        ..test_config(server.url(), 2, 0.2)
    };
    let runner = BenchmarkRunner::new(config).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    assert!(!outcome.samples.is_empty());
    for sample in &outcome.samples {
        assert!(!sample.ok);
        assert!(sample.error.as_deref().unwrap().contains("500"));
        assert!(sample.e2e_ms.is_none());
    }
}

#[tokio::test]
async fn test_mid_stream_abort_is_failed_sample() {
    let server = start_mock(MockServerConfig {
        chunk_latency_ms: 1,
        chunk_count: 5,
        abort_after_chunks: Some(2),
        ..Default::default()
    })
    .await;

    let runner = BenchmarkRunner::new(test_config(server.url(), 1, 0.2)).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    assert!(!outcome.samples.is_empty());
    for sample in &outcome.samples {
        assert!(!sample.ok, "aborted stream reported as ok");
        assert_eq!(sample.ttft_ms, None);
        assert_eq!(sample.itl_count, 0);
    }
}

#[tokio::test]
async fn test_request_timeout_is_transport_failure() {
    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "{}\n"
    }
    let url = spawn_app(Router::new().route("/api/generate", post(slow))).await;

    let config = BenchmarkConfig {
        timeout_secs: 1,
        ..test_config(url, 2, 0.2)
    };
    let runner = BenchmarkRunner::new(config).unwrap();
    let started = Instant::now();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    // One timed-out request per lane, then the deadline has passed
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.samples.len(), 2);
    for sample in &outcome.samples {
        assert!(!sample.ok);
        assert!(!sample.error.as_deref().unwrap_or_default().is_empty());
    }
}

#[derive(Default)]
struct Recorder {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

async fn recording_handler(State(recorder): State<Arc<Recorder>>, Json(body): Json<Value>) -> String {
    let now = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);
    recorder.bodies.lock().unwrap().push(body);

    tokio::time::sleep(Duration::from_millis(30)).await;

    recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
    ndjson(&[json!({"response": "ok", "done": false}), done_record()])
}

#[tokio::test]
async fn test_admission_slots_bound_in_flight_requests() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route("/api/generate", post(recording_handler))
        .with_state(Arc::clone(&recorder));
    let url = spawn_app(app).await;

    let config = BenchmarkConfig {
        max_in_flight: Some(1),
        ..test_config(url, 4, 0.5)
    };
    let runner = BenchmarkRunner::new(config).unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    let lanes: HashSet<usize> = outcome.samples.iter().map(|s| s.worker_id).collect();
    assert!(lanes.len() > 1, "only {:?} lanes ran", lanes);
}

#[tokio::test]
async fn test_request_body_shape() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route("/api/generate", post(recording_handler))
        .with_state(Arc::clone(&recorder));
    let url = spawn_app(app).await;

    let config = BenchmarkConfig {
        disable_reasoning: true,
        ..test_config(url, 1, 0.05)
    };
    let runner = BenchmarkRunner::new(config).unwrap();
    let prompts = PromptSet::new(vec![PromptRecord::new("Count to three.", "only")]).unwrap();
    let outcome = runner.run(&prompts).await.unwrap();
    assert_eq!(outcome.samples[0].label, "only");

    let bodies = recorder.bodies.lock().unwrap();
    let body = &bodies[0];
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["prompt"], "Reasoning: low\n\nCount to three.");
    assert_eq!(body["stream"], true);
    assert_eq!(body["think"], false);
    assert_eq!(body["options"]["temperature"], 0.0);
    assert_eq!(body["options"]["top_p"], 0.9);
    assert_eq!(body["options"]["num_predict"], 256);
}

// ==================================================================================================
// Configuration Errors
// ==================================================================================================

#[test]
fn test_invalid_configuration_is_rejected_before_run() {
    for config in [
        test_config("http://127.0.0.1:1".to_string(), 0, 1.0),
        test_config("http://127.0.0.1:1".to_string(), 1, 0.0),
        test_config("http://127.0.0.1:1".to_string(), 1, -1.0),
    ] {
        assert!(matches!(
            BenchmarkRunner::new(config),
            Err(BenchError::Config(_))
        ));
    }
}

#[test]
fn test_empty_corpus_is_rejected() {
    assert!(matches!(PromptSet::new(vec![]), Err(BenchError::Corpus(_))));
}

#[tokio::test]
async fn test_warmup_fails_when_server_unreachable() {
    let runner = BenchmarkRunner::new(test_config(closed_port_url(), 1, 1.0)).unwrap();
    assert!(runner.warmup(&test_prompts(), 2).await.is_err());
    assert!(runner.warmup(&test_prompts(), 0).await.is_ok());
}

// ==================================================================================================
// End To End
// ==================================================================================================

#[tokio::test]
async fn test_standalone_run_round_trips_through_csv() {
    let server = start_mock(MockServerConfig {
        chunk_latency_ms: 1,
        chunk_count: 4,
        keepalive_noise: true,
        ..Default::default()
    })
    .await;

    let runner = BenchmarkRunner::new(test_config(server.url(), 2, 0.3)).unwrap();
    runner.warmup(&test_prompts(), 1).await.unwrap();
    let outcome = runner.run(&test_prompts()).await.unwrap();

    let dir = std::env::temp_dir().join(format!("stream-loadbench-it-{}", std::process::id()));
    let path = dir.join("test-model_c2.csv");
    assert!(write_samples_csv(&path, &outcome.samples).unwrap());

    let restored = read_samples_csv(&path).unwrap();
    assert_eq!(restored.len(), outcome.samples.len());

    let wall = outcome.wall_time.as_secs_f64();
    let from_memory = BenchmarkSummary::from_samples(&outcome.samples, wall);
    let from_disk = BenchmarkSummary::from_samples(&restored, wall);
    assert_eq!(from_memory.n_ok, from_disk.n_ok);
    assert_eq!(from_memory.system_tps, from_disk.system_tps);
    assert_eq!(from_memory.itl_mean_ms.count, from_disk.itl_mean_ms.count);

    let _ = std::fs::remove_dir_all(dir);
}
