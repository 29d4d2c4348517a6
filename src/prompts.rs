// Prompt corpus loading
// Reads newline-delimited JSON prompt records shared read-only by all workers

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::error::{BenchError, Result};

/// One prompt from the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub prompt: String,
    #[serde(default)]
    pub label: String,
}

impl PromptRecord {
    pub fn new(prompt: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            label: label.into(),
        }
    }
}

/// Immutable, cheaply cloneable prompt corpus.
///
/// Guaranteed non-empty, so [`PromptSet::choose`] always yields a record.
#[derive(Debug, Clone)]
pub struct PromptSet {
    records: Arc<[PromptRecord]>,
}

impl PromptSet {
    /// Build a corpus from records, rejecting an empty set
    pub fn new(records: Vec<PromptRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(BenchError::Corpus(
                "prompt corpus must contain at least one record".to_string(),
            ));
        }
        Ok(Self {
            records: records.into(),
        })
    }

    /// Load a JSONL corpus from disk
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            BenchError::Corpus(format!("unable to open {}: {}", path.display(), e))
        })?;
        let records = parse_jsonl(file)?;
        if records.is_empty() {
            return Err(BenchError::Corpus(format!(
                "{} did not contain any prompt records",
                path.display()
            )));
        }
        tracing::info!("Loaded {} prompts from {}", records.len(), path.display());
        Self::new(records)
    }

    /// Small built-in corpus used when benchmarking the mock server
    pub fn builtin() -> Self {
        let records = vec![
            PromptRecord::new("Explain what a hash map is in two sentences.", "short"),
            PromptRecord::new(
                "Write a haiku about distributed systems and network partitions.",
                "creative",
            ),
            PromptRecord::new(
                "A train travels 120 km in 1.5 hours. What is its average speed?",
                "math",
            ),
            PromptRecord::new(
                "Summarize the trade-offs between threads and async tasks.",
                "long",
            ),
        ];
        Self {
            records: records.into(),
        }
    }

    /// Uniform random pick with replacement
    pub fn choose(&self) -> &PromptRecord {
        // Non-empty by construction; index 0 only guards the impossible case.
        self.records
            .choose(&mut rand::thread_rng())
            .unwrap_or(&self.records[0])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PromptRecord] {
        &self.records
    }
}

/// Parse newline-delimited prompt records. Blank lines are skipped; any
/// other malformed line is fatal and reported with its line number.
pub fn parse_jsonl<R: Read>(reader: R) -> Result<Vec<PromptRecord>> {
    let reader = BufReader::new(reader);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: PromptRecord = serde_json::from_str(trimmed).map_err(|e| {
            BenchError::Corpus(format!("line {} is not a valid prompt record: {}", idx + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}
