//! Layered settings for loading, building, evaluating and serving.
//!
//! Values are resolved in this order, later sources overriding earlier ones:
//! - built-in defaults
//! - a TOML file
//! - environment variables
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `ITEM_MATCHER_` and use double
//! underscores to separate nested levels:
//! - `ITEM_MATCHER_INDEX__NUM_LEAVES=500` sets `index.num_leaves`
//! - `ITEM_MATCHER_EVALUATION__MIN_RECALL=0.9` sets `evaluation.min_recall`
//! - `ITEM_MATCHER_LOADER__REDUCTION=reject` sets `loader.reduction`
//!
//! Every component takes its own section in its constructor; nothing reads
//! settings from the process environment on its own.

use crate::constants::{evaluation, index, kmeans, serving};
use crate::store::Reduction;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ITEM_MATCHER_";

/// Root settings object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Embedding loader settings.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Index build and search settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Evaluation and blessing thresholds.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Serving settings.
    #[serde(default)]
    pub serving: ServingConfig,
}

/// Settings for [`VectorStore`](crate::store::VectorStore).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// How duplicate identifiers are combined.
    #[serde(default)]
    pub reduction: Reduction,
}

/// Settings for [`IndexBuilder`](crate::index::IndexBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of leaves; 0 selects `round(sqrt(rows))`.
    #[serde(default)]
    pub num_leaves: usize,

    /// Leaves scanned per query.
    #[serde(default = "default_num_leaves_to_search")]
    pub num_leaves_to_search: usize,

    /// Dimensions per quantization block.
    #[serde(default = "default_dimensions_per_block")]
    pub dimensions_per_block: usize,

    /// Anisotropic threshold; 0 selects plain reconstruction loss.
    #[serde(default = "default_anisotropic_threshold")]
    pub anisotropic_quantization_threshold: f32,

    /// Candidates re-scored exactly per query.
    #[serde(default = "default_reorder_num_neighbors")]
    pub reorder_num_neighbors: usize,

    /// Rows used to train leaf centroids; 0 uses the whole corpus.
    #[serde(default)]
    pub training_sample_size: usize,

    /// Lloyd iterations for leaf centroids.
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Seed for every randomized build step.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            num_leaves: 0,
            num_leaves_to_search: default_num_leaves_to_search(),
            dimensions_per_block: default_dimensions_per_block(),
            anisotropic_quantization_threshold: default_anisotropic_threshold(),
            reorder_num_neighbors: default_reorder_num_neighbors(),
            training_sample_size: 0,
            kmeans_iterations: default_kmeans_iterations(),
            seed: default_seed(),
        }
    }
}

/// Settings for [`IndexEvaluator`](crate::evaluation::IndexEvaluator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Smallest recall that still blesses an index.
    #[serde(default = "default_min_recall")]
    pub min_recall: f64,

    /// Largest mean approximate latency, in seconds, that still blesses.
    #[serde(default = "default_max_latency_secs")]
    pub max_latency_secs: f64,

    /// Fraction of the corpus sampled as queries.
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,

    /// Upper bound on sampled queries.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Neighbors compared per query.
    #[serde(default = "default_num_neighbors")]
    pub num_neighbors: usize,

    /// Seed for query sampling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_recall: default_min_recall(),
            max_latency_secs: default_max_latency_secs(),
            sample_ratio: default_sample_ratio(),
            max_queries: default_max_queries(),
            num_neighbors: default_num_neighbors(),
            seed: default_seed(),
        }
    }
}

/// Settings for [`MatchService`](crate::serving::MatchService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Directory holding the persisted index artifacts.
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Matches returned when a request omits `k`.
    #[serde(default = "default_num_matches")]
    pub default_num_matches: usize,

    /// Largest `k` a request may ask for.
    #[serde(default = "default_max_num_matches")]
    pub max_num_matches: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            default_num_matches: default_num_matches(),
            max_num_matches: default_max_num_matches(),
        }
    }
}

fn default_num_leaves_to_search() -> usize {
    index::NUM_LEAVES_TO_SEARCH
}
fn default_dimensions_per_block() -> usize {
    index::DIMENSIONS_PER_BLOCK
}
fn default_anisotropic_threshold() -> f32 {
    index::ANISOTROPIC_QUANTIZATION_THRESHOLD
}
fn default_reorder_num_neighbors() -> usize {
    index::REORDER_NUM_NEIGHBORS
}
fn default_kmeans_iterations() -> usize {
    kmeans::DEFAULT_MAX_ITERATIONS
}
fn default_seed() -> u64 {
    index::DEFAULT_SEED
}
fn default_min_recall() -> f64 {
    evaluation::MIN_RECALL
}
fn default_max_latency_secs() -> f64 {
    evaluation::MAX_LATENCY_SECS
}
fn default_sample_ratio() -> f64 {
    evaluation::QUERIES_SAMPLE_RATIO
}
fn default_max_queries() -> usize {
    evaluation::MAX_NUM_QUERIES
}
fn default_num_neighbors() -> usize {
    evaluation::NUM_NEIGHBORS
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("index")
}
fn default_num_matches() -> usize {
    serving::DEFAULT_NUM_MATCHES
}
fn default_max_num_matches() -> usize {
    serving::MAX_NUM_MATCHES
}

impl Settings {
    /// Load settings from defaults, `path` (if it exists) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path.as_ref())).extract().map_err(Box::new)
    }

    /// Load settings from defaults, a TOML string and the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::string(toml)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
