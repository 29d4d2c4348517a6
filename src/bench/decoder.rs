//! Incremental decoder for newline-delimited JSON generation streams.
//!
//! The decoder is fed raw body chunks as they arrive, splits them into
//! lines, and timestamps every record it manages to parse. From those
//! timestamps it derives time-to-first-token and the inter-record gaps;
//! the terminal `done` record supplies the server-side counters.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Instant;

use super::metrics::{mean, percentile};

const NANOS_PER_SEC: f64 = 1e9;
const NANOS_PER_MILLI: f64 = 1e6;

/// Longest line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One record of the generation stream.
///
/// Intermediate records carry a `response` fragment; the terminal record
/// has `done: true` and the server-measured counters. Missing counters
/// read as zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateRecord {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: u64,
    /// Output generation time in nanoseconds
    #[serde(default)]
    pub eval_duration: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    /// Prompt evaluation time in nanoseconds
    #[serde(default)]
    pub prompt_eval_duration: u64,
}

impl GenerateRecord {
    /// Whether the record carries generated text
    pub fn carries_text(&self) -> bool {
        self.response.as_deref().is_some_and(|text| !text.is_empty())
    }
}

/// Metrics derived from one fully consumed stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMetrics {
    pub ttft_ms: Option<f64>,
    pub e2e_ms: f64,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub tps: Option<f64>,
    pub tpot_ms: Option<f64>,
    pub prefill_ms: Option<f64>,
    pub itl_mean_ms: Option<f64>,
    pub itl_p95_ms: Option<f64>,
    pub itl_count: u64,
    /// Whether the terminal record was received
    pub completed: bool,
}

/// Line-oriented stream decoder for a single request
#[derive(Debug)]
pub struct StreamDecoder {
    start: Instant,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline
    scanned: usize,
    /// Dropping the rest of an oversized line up to its newline
    skipping_line: bool,
    first_token_at: Option<Instant>,
    last_record_at: Option<Instant>,
    gaps_ms: Vec<f64>,
    final_record: Option<GenerateRecord>,
}

impl StreamDecoder {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            buffer: Vec::new(),
            scanned: 0,
            skipping_line: false,
            first_token_at: None,
            last_record_at: None,
            gaps_ms: Vec::new(),
            final_record: None,
        }
    }

    /// Whether the terminal record has been seen
    pub fn is_done(&self) -> bool {
        self.final_record.is_some()
    }

    /// Inter-record gaps observed so far, in milliseconds
    pub fn gaps_ms(&self) -> &[f64] {
        &self.gaps_ms
    }

    /// Feed a raw body chunk received at `now`.
    ///
    /// Returns `true` once the terminal record has been decoded; anything
    /// after it is discarded.
    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> bool {
        if self.is_done() {
            return true;
        }
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);

        let mut line_start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = buffer[search_from..].iter().position(|b| *b == b'\n') {
            let line_end = search_from + offset;
            search_from = line_end + 1;
            let line = &buffer[line_start..line_end];
            line_start = search_from;

            if self.skipping_line {
                self.skipping_line = false;
                continue;
            }
            if self.process_line(line, now) {
                self.scanned = 0;
                return true;
            }
        }

        buffer.drain(..line_start);
        if buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                "Dropping stream line longer than {} bytes",
                MAX_LINE_BYTES
            );
            buffer.clear();
            self.skipping_line = true;
        }
        self.scanned = buffer.len();
        self.buffer = buffer;
        false
    }

    /// Decode one line. Blank and unparsable lines are ignored.
    pub fn process_line(&mut self, line: &[u8], now: Instant) -> bool {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }

        let record: GenerateRecord = match serde_json::from_str(trimmed) {
            Ok(record) => record,
            Err(e) => {
                tracing::trace!("Skipping non-record line ({}): {}", e, truncate(trimmed, 80));
                return false;
            }
        };

        if self.first_token_at.is_none() && record.carries_text() {
            self.first_token_at = Some(now);
        }
        if let Some(prev) = self.last_record_at {
            self.gaps_ms.push(millis_between(prev, now));
        }
        self.last_record_at = Some(now);

        if record.done {
            self.final_record = Some(record);
            return true;
        }
        false
    }

    /// Close the stream at `end` and derive the request metrics.
    ///
    /// A trailing line without a newline is decoded first. Metrics that
    /// depend on the terminal record stay `None` when it never arrived.
    pub fn finish(mut self, end: Instant) -> RequestMetrics {
        if !self.is_done() && !self.skipping_line && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.process_line(&rest, end);
        }

        let e2e_ms = millis_between(self.start, end);
        let itl_mean_ms = mean(&self.gaps_ms);
        let itl_p95_ms = percentile(&self.gaps_ms, 95.0);
        let itl_count = self.gaps_ms.len() as u64;

        let Some(summary) = self.final_record else {
            return RequestMetrics {
                e2e_ms,
                itl_mean_ms,
                itl_p95_ms,
                itl_count,
                ..Default::default()
            };
        };

        let ttft_ms = self
            .first_token_at
            .map(|first| millis_between(self.start, first));
        let tps = (summary.eval_duration > 0)
            .then(|| summary.eval_count as f64 / (summary.eval_duration as f64 / NANOS_PER_SEC));
        let tpot_ms = tps.filter(|tps| *tps > 0.0).map(|tps| 1000.0 / tps);
        let prefill_ms = (summary.prompt_eval_duration > 0)
            .then(|| summary.prompt_eval_duration as f64 / NANOS_PER_MILLI);

        RequestMetrics {
            ttft_ms,
            e2e_ms,
            prompt_tokens: summary.prompt_eval_count,
            output_tokens: summary.eval_count,
            tps,
            tpot_ms,
            prefill_ms,
            itl_mean_ms,
            itl_p95_ms,
            itl_count,
            completed: true,
        }
    }
}

/// Consume a body stream to completion (or until the terminal record).
///
/// The first chunk error aborts decoding and is returned as-is; no partial
/// metrics survive a transport failure.
pub async fn decode_stream<S, B, E>(stream: S, start: Instant) -> Result<RequestMetrics, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut stream = Box::pin(stream);
    let mut decoder = StreamDecoder::new(start);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if decoder.feed(chunk.as_ref(), Instant::now()) {
            break;
        }
    }

    Ok(decoder.finish(Instant::now()))
}

fn millis_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() * 1000.0
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
