//! item-matcher: approximate nearest-neighbor item matching in Rust.
//!
//! This crate turns sharded exports of learned item embeddings into a
//! persisted, queryable index and answers "which items are most similar to
//! this one" by inner product over unit-normalized embeddings.
//!
//! # Features
//!
//! - **Embedding loader**: CSV and JSON-lines shards, duplicate reduction,
//!   L2 normalization, an ordered identifier vocabulary
//! - **Tree-AH index**: k-means leaf partitioning, anisotropic 4-bit residual
//!   codes and exact re-scoring of a candidate shortlist
//! - **Exact matcher**: parallel brute-force scan used as ground truth
//! - **Persistence**: checksummed index and vocabulary artifacts
//! - **Evaluation**: sampled recall and latency with a blessing decision
//! - **Serving**: identifier or vector queries against a hot-swappable index
//!
//! # Example
//!
//! ```no_run
//! use item_matcher::{persistence, IndexBuilder, Matcher, VectorStore};
//!
//! let corpus = VectorStore::default().load("exports/embeddings-*.csv")?;
//! let index = IndexBuilder::new().build(&corpus.matrix)?;
//! persistence::save(&index, &corpus.vocabulary, "models/v1")?;
//!
//! let matcher = persistence::load_artifacts("models/v1")?.into_matcher()?;
//! let query = corpus.matrix.row(0);
//! let similar = matcher.match_vector(query, 10)?;
//! println!("{similar:?}");
//! # Ok::<(), item_matcher::Error>(())
//! ```

pub mod config;
pub mod constants;
pub mod distance;
pub mod error;
pub mod evaluation;
pub mod index;
pub mod kmeans;
pub mod metrics;
pub mod persistence;
pub mod quantization;
pub mod serving;
pub mod store;
pub mod types;
pub mod vector;
pub mod vocabulary;

// Re-export commonly used types at crate root
pub use config::Settings;
pub use error::{BuildError, Error, LoadError, PersistenceError, QueryError, Result};
pub use evaluation::{recall_at_k, EvaluationRecord, IndexEvaluator};
pub use index::{ApproximateMatcher, ExactMatcher, IndexBuilder, Matcher, Neighbor, TreeAhIndex};
pub use metrics::{IndexStatistics, SearchStatistics};
pub use serving::{MatchErrorResponse, MatchRequest, MatchResponse, MatchService, Query};
pub use store::{Corpus, EmbeddingRecord, Reduction, VectorStore};
pub use types::RowId;
pub use vector::EmbeddingMatrix;
pub use vocabulary::Vocabulary;
