//! File-backed persistence: token usage counters, conversation transcripts,
//! and the processed-string ledger.
//!
//! All stores are plain JSON files under the configured data directory.
//! Usage updates are read-modify-write cycles around each model call;
//! attempts run sequentially so last-writer-wins is acceptable here.

use crate::openai::Message;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of transcript dumps retained; older ones are deleted on each write.
const TRANSCRIPTS_KEPT: usize = 9;

/// Per-model (input, output) price per 1000 tokens, used for the running
/// cost log line.
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-3.5-turbo", 0.0015, 0.002),
    ("gpt-3.5-turbo-0301", 0.0015, 0.002),
    ("gpt-3.5-turbo-16k", 0.003, 0.004),
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-0301", 0.03, 0.06),
];

/// Running totals of tokens spent, process-wide. Monotonically increasing;
/// updated even on attempts that ultimately fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total: u64,
    pub prompt: u64,
    pub completion: u64,
}

impl UsageCounters {
    /// Approximate dollar cost of the recorded usage, or `None` for models
    /// without a known price.
    pub fn cost(&self, model: &str) -> Option<f64> {
        let (_, input_price, output_price) = PRICES.iter().find(|(m, _, _)| *m == model)?;
        let input_cost = (self.prompt as f64 / 1000.0) * input_price;
        let output_cost = (self.completion as f64 / 1000.0) * output_price;
        Some(((input_cost + output_cost) * 1000.0).round() / 1000.0)
    }
}

/// File-backed usage counter storage.
pub struct UsageStore {
    path: PathBuf,
}

impl UsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the counters, defaulting to zero when the file does not exist.
    pub fn load(&self) -> Result<UsageCounters> {
        if !self.path.exists() {
            return Ok(UsageCounters::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read usage file {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse usage file {}", self.path.display()))
    }

    pub fn save(&self, counters: &UsageCounters) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(counters)?)
            .with_context(|| format!("Failed to write usage file {}", self.path.display()))
    }

    /// Read-modify-write one model call's usage into the stored totals.
    pub fn add(&self, prompt: u64, completion: u64, total: u64) -> Result<()> {
        let mut counters = self.load()?;
        counters.prompt += prompt;
        counters.completion += completion;
        counters.total += total;
        self.save(&counters)
    }
}

/// Bounded archive of conversation transcripts.
pub struct TranscriptStore {
    dir: PathBuf,
}

// Disambiguates dump file names written within the same millisecond.
static DUMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist a completed conversation, then evict everything but the
    /// most recent [`TRANSCRIPTS_KEPT`] dumps.
    pub fn append(&self, messages: &[Message]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create transcript dir {}", self.dir.display()))?;

        let seq = DUMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "dump_{:013}_{:06}.json",
            chrono::Utc::now().timestamp_millis(),
            seq
        );
        let path = self.dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(messages)?)
            .with_context(|| format!("Failed to write transcript {}", path.display()))?;

        self.evict()?;
        Ok(path)
    }

    fn evict(&self) -> Result<()> {
        let mut dumps: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("dump_") && n.ends_with(".json"))
            })
            .collect();
        // Zero-padded timestamps sort chronologically by name
        dumps.sort();

        for old in dumps.iter().rev().skip(TRANSCRIPTS_KEPT) {
            let _ = fs::remove_file(old);
        }
        Ok(())
    }
}

/// Ledger of (project, string, language) keys already handled.
pub struct ProcessedStore {
    path: PathBuf,
}

impl ProcessedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<HashSet<String>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read processed file {}", self.path.display()))?;
        let keys: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse processed file {}", self.path.display()))?;
        Ok(keys.into_iter().collect())
    }

    /// Record a key and persist the ledger immediately.
    pub fn insert(&self, keys: &mut HashSet<String>, key: String) -> Result<()> {
        keys.insert(key);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        fs::write(&self.path, serde_json::to_string(&sorted)?)
            .with_context(|| format!("Failed to write processed file {}", self.path.display()))
    }
}

/// Helper for composing store paths under one data directory.
pub fn usage_path(data_dir: &Path) -> PathBuf {
    data_dir.join("tokens.json")
}

pub fn transcripts_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("messages")
}

pub fn processed_path(data_dir: &Path) -> PathBuf {
    data_dir.join("processed.json")
}

pub fn processed_qa_path(data_dir: &Path) -> PathBuf {
    data_dir.join("processed_qa.json")
}
