//! Recall and latency evaluation against the exact matcher.
//!
//! Queries are rows sampled uniformly with replacement from the corpus
//! itself. For each query the exact top-k is the reference; recall is the
//! mean fraction of it recovered by the approximate matcher and latency is
//! the mean wall-clock time of the approximate queries alone.
//!
//! # Example
//!
//! ```ignore
//! let evaluator = IndexEvaluator::new(settings.evaluation.clone());
//! let record = evaluator.evaluate(&corpus, &matcher)?;
//! record.write_to("models/v3/evaluation")?;
//! ```

use crate::config::EvaluationConfig;
use crate::error::{PersistenceError, Result};
use crate::index::{ExactMatcher, Matcher};
use crate::store::Corpus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// File holding `{recall, latency}` as JSON.
pub const METRICS_FILE: &str = "metrics";

/// Marker written when the index passes both thresholds.
pub const BLESSED_FILE: &str = "BLESSED";

/// Marker written when the index fails a threshold.
pub const NOT_BLESSED_FILE: &str = "NOT_BLESSED";

/// Outcome of evaluating one index version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Mean fraction of exact neighbors recovered, in `[0, 1]`.
    ///
    /// Each query's denominator is [`num_neighbors`](Self::num_neighbors),
    /// the configured neighbor count capped at the corpus size, so a corpus
    /// smaller than that count can still reach 1.0.
    pub recall: f64,
    /// Mean approximate query time in seconds.
    pub latency: f64,
    /// Whether both thresholds were met.
    pub blessed: bool,
    /// Number of sampled queries.
    pub num_queries: usize,
    /// Neighbors compared per query: `min(config.num_neighbors, rows)`.
    pub num_neighbors: usize,
}

#[derive(Serialize)]
struct Metrics {
    recall: f64,
    latency: f64,
}

impl EvaluationRecord {
    /// Write the metrics file and the blessing marker into `dir`.
    ///
    /// A stale marker of the opposite verdict is removed.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> std::result::Result<(), PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let metrics = serde_json::to_vec_pretty(&Metrics {
            recall: self.recall,
            latency: self.latency,
        })
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        fs::write(dir.join(METRICS_FILE), metrics)?;

        let (marker, stale) = if self.blessed {
            (BLESSED_FILE, NOT_BLESSED_FILE)
        } else {
            (NOT_BLESSED_FILE, BLESSED_FILE)
        };
        fs::write(dir.join(marker), b"")?;
        let stale = dir.join(stale);
        if stale.exists() {
            fs::remove_file(stale)?;
        }
        Ok(())
    }
}

/// Evaluate `matcher` with default sampling and the given thresholds.
pub fn evaluate(
    corpus: &Corpus,
    matcher: &dyn Matcher,
    min_recall: f64,
    max_latency_secs: f64,
) -> Result<EvaluationRecord> {
    IndexEvaluator::new(EvaluationConfig {
        min_recall,
        max_latency_secs,
        ..Default::default()
    })
    .evaluate(corpus, matcher)
}

/// Samples queries, runs both matchers and decides the blessing.
#[derive(Debug, Clone, Default)]
pub struct IndexEvaluator {
    config: EvaluationConfig,
}

impl IndexEvaluator {
    /// Create an evaluator from the `evaluation` settings section.
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    /// Return the settings in use.
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Number of queries sampled from a corpus of `rows` rows.
    ///
    /// `min(floor(rows * sample_ratio), max_queries)`, but at least one for a
    /// non-empty corpus.
    pub fn num_queries(&self, rows: usize) -> usize {
        if rows == 0 {
            return 0;
        }
        let sampled = (rows as f64 * self.config.sample_ratio).floor() as usize;
        sampled.min(self.config.max_queries).max(1)
    }

    /// Evaluate `matcher` (the approximate side) against exact search over
    /// `corpus`.
    ///
    /// `matcher` must have been built from `corpus`; identifiers are compared
    /// by value. An empty corpus is never blessed.
    pub fn evaluate(
        &self,
        corpus: &Corpus,
        matcher: &dyn Matcher,
    ) -> Result<EvaluationRecord> {
        let rows = corpus.len();
        let num_queries = self.num_queries(rows);
        let k = self.config.num_neighbors.min(rows);
        if num_queries == 0 || k == 0 {
            return Ok(self.record(0.0, 0.0, num_queries, k));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let samples: Vec<usize> = (0..num_queries).map(|_| rng.gen_range(0..rows)).collect();
        info!(queries = num_queries, neighbors = k, "evaluating index");

        let exact = ExactMatcher::from_corpus(corpus)?;
        let truth: Vec<Vec<String>> = samples
            .par_iter()
            .map(|&row| exact.match_vector(corpus.matrix.row(row), k))
            .collect::<std::result::Result<_, _>>()?;

        let mut elapsed = Duration::ZERO;
        let mut recall_sum = 0.0;
        for (&row, expected) in samples.iter().zip(&truth) {
            let start = Instant::now();
            let found = matcher.match_vector(corpus.matrix.row(row), k)?;
            elapsed += start.elapsed();
            recall_sum += recall_at_k(&found, expected);
        }

        let recall = recall_sum / num_queries as f64;
        let latency = elapsed.as_secs_f64() / num_queries as f64;
        let record = self.record(recall, latency, num_queries, k);
        info!(
            recall = record.recall,
            latency_ms = record.latency * 1000.0,
            blessed = record.blessed,
            "evaluation finished"
        );
        Ok(record)
    }

    fn record(&self, recall: f64, latency: f64, num_queries: usize, k: usize) -> EvaluationRecord {
        let blessed = num_queries > 0
            && recall >= self.config.min_recall
            && latency <= self.config.max_latency_secs;
        EvaluationRecord {
            recall,
            latency,
            blessed,
            num_queries,
            num_neighbors: k,
        }
    }
}

/// Fraction of `ground_truth` present in `predicted`.
///
/// An empty ground truth has nothing to miss and yields 1.0.
pub fn recall_at_k(predicted: &[String], ground_truth: &[String]) -> f64 {
    if ground_truth.is_empty() {
        return 1.0;
    }
    let truth: HashSet<&str> = ground_truth.iter().map(String::as_str).collect();
    let hits = predicted
        .iter()
        .filter(|p| truth.contains(p.as_str()))
        .count();
    hits as f64 / ground_truth.len() as f64
}
