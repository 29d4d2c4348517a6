//! Mock generation server that answers with newline-delimited JSON streams.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::config::{MockServerConfig, GENERATE_PATH};

/// Simulated generation time per output token, in nanoseconds
const EVAL_NS_PER_TOKEN: u64 = 20_000_000;

/// Mock generation server for benchmarking and tests
pub struct MockGenerateServer {
    config: MockServerConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockGenerateServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let config = Arc::new(self.config.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = Router::new()
            .route(GENERATE_PATH, post(handle_generate))
            .with_state(config);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::debug!("Mock generation server listening on 127.0.0.1:{}", port);
        Ok(port)
    }

    /// Get the server's port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the server's base URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockGenerateServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle generation requests
async fn handle_generate(
    State(config): State<Arc<MockServerConfig>>,
    Json(request): Json<Value>,
) -> Response {
    if config.error_rate > 0.0 && rand::thread_rng().gen::<f64>() < config.error_rate {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response();
    }

    let model = request
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("mock")
        .to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(generate_stream(config, model)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Generate the NDJSON body: token records, optional noise, summary record
fn generate_stream(
    config: Arc<MockServerConfig>,
    model: String,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let chunk_latency = tokio::time::Duration::from_millis(config.chunk_latency_ms);

        for i in 0..config.chunk_count {
            if config.abort_after_chunks == Some(i) {
                yield Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "simulated mid-stream abort",
                ));
                return;
            }

            if !chunk_latency.is_zero() {
                tokio::time::sleep(chunk_latency).await;
            }

            if config.keepalive_noise && i % 2 == 0 {
                yield Ok(Bytes::from_static(b"\n: keepalive\n"));
            }

            let record = serde_json::json!({
                "model": model,
                "response": random_word(),
                "done": false,
            });
            yield Ok(ndjson_line(&record));
        }

        if config.send_done {
            let eval_count = config.chunk_count as u64;
            let summary = serde_json::json!({
                "model": model,
                "response": "",
                "done": true,
                "eval_count": eval_count,
                "eval_duration": eval_count * EVAL_NS_PER_TOKEN,
                "prompt_eval_count": config.prompt_tokens,
                "prompt_eval_duration": config.prompt_eval_duration_ns,
            });
            yield Ok(ndjson_line(&summary));
        }
    }
}

fn ndjson_line(record: &Value) -> Bytes {
    let mut line = record.to_string().into_bytes();
    line.push(b'\n');
    Bytes::from(line)
}

/// Pick a random word as a token fragment
fn random_word() -> String {
    const WORDS: &[&str] = &[
        "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "hello", "world", "rust",
        "stream", "token", "latency", "throughput",
    ];

    let word = WORDS[rand::thread_rng().gen_range(0..WORDS.len())];
    format!("{} ", word)
}
