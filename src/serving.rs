//! Request-level matching over a hot-swappable persisted index.
//!
//! [`MatchService`] is the serving boundary: it acquires an index only by
//! loading a persisted directory, answers [`MatchRequest`]s, and turns every
//! [`QueryError`] into a [`MatchErrorResponse`] that echoes the request, so
//! an invalid query is never confused with an empty result.
//!
//! Rolling to a new index version loads the new directory completely, then
//! swaps one `Arc`. Queries already running keep the snapshot they started
//! with until they finish.

use crate::config::ServingConfig;
use crate::error::{PersistenceError, QueryError};
use crate::index::{ApproximateMatcher, Matcher};
use crate::persistence;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// What to find neighbors for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    /// One or more whitespace-separated identifiers; their embeddings are
    /// averaged.
    Identifier(String),
    /// A raw query vector.
    Vector(Vec<f32>),
}

/// A single match request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    /// The query.
    pub query: Query,
    /// Number of matches; the service default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
}

impl MatchRequest {
    /// Request matches for one or more identifiers.
    pub fn identifier(identifier: impl Into<String>, k: Option<usize>) -> Self {
        Self {
            query: Query::Identifier(identifier.into()),
            k,
        }
    }

    /// Request matches for a vector.
    pub fn vector(vector: Vec<f32>, k: Option<usize>) -> Self {
        Self {
            query: Query::Vector(vector),
            k,
        }
    }
}

/// Successful answer: identifiers best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResponse {
    /// The query as received.
    pub query: Query,
    /// Number of matches that was requested.
    pub k: usize,
    /// Matching identifiers, at most `k`.
    pub matches: Vec<String>,
}

/// Rejected query, echoing what was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchErrorResponse {
    /// The query as received.
    pub query: Query,
    /// `k` as received.
    pub k: Option<usize>,
    /// Why the query was rejected.
    pub error: String,
}

/// Identity of a loaded index build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexVersion {
    /// Directory the index was loaded from.
    pub dir: PathBuf,
    /// Checksum of the index artifact.
    pub checksum: u32,
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:08x}", self.dir.display(), self.checksum)
    }
}

/// An index with its vocabulary and the version it came from.
#[derive(Debug)]
pub struct Snapshot {
    matcher: ApproximateMatcher,
    version: IndexVersion,
}

impl Snapshot {
    fn load(dir: &Path) -> Result<Self, PersistenceError> {
        let artifacts = persistence::load_artifacts(dir)?;
        let version = IndexVersion {
            dir: dir.to_path_buf(),
            checksum: artifacts.checksum,
        };
        Ok(Self {
            matcher: artifacts.into_matcher()?,
            version,
        })
    }

    /// Return the matcher of this snapshot.
    pub fn matcher(&self) -> &ApproximateMatcher {
        &self.matcher
    }

    /// Return the version of this snapshot.
    pub fn version(&self) -> &IndexVersion {
        &self.version
    }

    /// Mean embedding of whitespace-separated identifiers.
    pub fn lookup(&self, identifiers: &str) -> Result<Vec<f32>, QueryError> {
        let index = self.matcher.index();
        let mut sum = vec![0.0f32; index.dimension()];
        let mut count = 0usize;

        for token in identifiers.split_whitespace() {
            let row = self
                .matcher
                .vocabulary()
                .row_of(token)
                .ok_or_else(|| QueryError::UnknownIdentifier(token.to_string()))?;
            let embedding = index
                .row(row)
                .ok_or_else(|| QueryError::UnknownIdentifier(token.to_string()))?;
            for (acc, x) in sum.iter_mut().zip(embedding) {
                *acc += x;
            }
            count += 1;
        }

        if count == 0 {
            return Err(QueryError::EmptyQuery);
        }
        let scale = 1.0 / count as f32;
        sum.iter_mut().for_each(|x| *x *= scale);
        Ok(sum)
    }
}

/// Serves match requests from the current index snapshot.
pub struct MatchService {
    current: ArcSwap<Snapshot>,
    config: ServingConfig,
}

impl MatchService {
    /// Load the index in `config.index_dir` and start serving it.
    pub fn open(config: ServingConfig) -> Result<Self, PersistenceError> {
        let snapshot = Snapshot::load(&config.index_dir)?;
        info!(version = %snapshot.version, "serving index");
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            config,
        })
    }

    /// Load the index in `dir` and atomically switch new requests to it.
    ///
    /// On error the current index stays in place.
    pub fn reload(&self, dir: impl AsRef<Path>) -> Result<IndexVersion, PersistenceError> {
        let snapshot = Snapshot::load(dir.as_ref())?;
        let version = snapshot.version.clone();
        let previous = self.current.swap(Arc::new(snapshot));
        info!(from = %previous.version, to = %version, "swapped index");
        Ok(version)
    }

    /// Return the version currently serving new requests.
    pub fn version(&self) -> IndexVersion {
        self.current.load().version.clone()
    }

    /// Return the current snapshot; it stays valid after a reload.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Return the serving settings.
    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    /// Answer a request, or explain why it was rejected.
    pub fn handle(&self, request: &MatchRequest) -> Result<MatchResponse, MatchErrorResponse> {
        match self.find_matches(request) {
            Ok((k, matches)) => Ok(MatchResponse {
                query: request.query.clone(),
                k,
                matches,
            }),
            Err(err) => {
                debug!(error = %err, "rejected match request");
                Err(MatchErrorResponse {
                    query: request.query.clone(),
                    k: request.k,
                    error: err.to_string(),
                })
            }
        }
    }

    /// Resolve `k` and run the query against the current snapshot.
    pub fn find_matches(&self, request: &MatchRequest) -> Result<(usize, Vec<String>), QueryError> {
        let k = self.resolve_k(request.k)?;
        let snapshot = self.current.load();
        let matches = match &request.query {
            Query::Identifier(ids) => {
                let vector = snapshot.lookup(ids)?;
                snapshot.matcher.match_vector(&vector, k)?
            }
            Query::Vector(vector) => snapshot.matcher.match_vector(vector, k)?,
        };
        Ok((k, matches))
    }

    fn resolve_k(&self, k: Option<usize>) -> Result<usize, QueryError> {
        let k = k.unwrap_or(self.config.default_num_matches);
        if k == 0 {
            return Err(QueryError::ZeroNumMatches);
        }
        if k > self.config.max_num_matches {
            return Err(QueryError::InvalidNumMatches {
                requested: k,
                max: self.config.max_num_matches,
            });
        }
        Ok(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use crate::store::{EmbeddingRecord, VectorStore};
    use tempfile::TempDir;

    fn save_corpus(dir: &Path, records: Vec<EmbeddingRecord>) {
        let corpus = VectorStore::default().from_records(records).unwrap();
        let index = IndexBuilder::new().num_leaves(1).build(&corpus.matrix).unwrap();
        persistence::save(&index, &corpus.vocabulary, dir).unwrap();
    }

    fn axis_records() -> Vec<EmbeddingRecord> {
        vec![
            EmbeddingRecord::new("x", vec![1.0, 0.0, 0.0]),
            EmbeddingRecord::new("y", vec![0.0, 1.0, 0.0]),
            EmbeddingRecord::new("z", vec![0.0, 0.0, 1.0]),
            EmbeddingRecord::new("xy", vec![1.0, 1.0, 0.0]),
        ]
    }

    fn service(dir: &Path) -> MatchService {
        MatchService::open(ServingConfig {
            index_dir: dir.to_path_buf(),
            default_num_matches: 2,
            max_num_matches: 3,
        })
        .unwrap()
    }

    #[test]
    fn test_vector_request() {
        let dir = TempDir::new().unwrap();
        save_corpus(dir.path(), axis_records());
        let service = service(dir.path());

        let response = service
            .handle(&MatchRequest::vector(vec![2.0, 0.1, 0.0], None))
            .unwrap();
        assert_eq!(response.k, 2);
        assert_eq!(response.matches, vec!["x", "xy"]);
    }

    #[test]
    fn test_identifier_request_averages() {
        let dir = TempDir::new().unwrap();
        save_corpus(dir.path(), axis_records());
        let service = service(dir.path());

        let response = service
            .handle(&MatchRequest::identifier("x  y", Some(1)))
            .unwrap();
        assert_eq!(response.matches, vec!["xy"]);
    }

    #[test]
    fn test_error_payload_echoes_request() {
        let dir = TempDir::new().unwrap();
        save_corpus(dir.path(), axis_records());
        let service = service(dir.path());

        let request = MatchRequest::identifier("x nope", Some(2));
        let err = service.handle(&request).unwrap_err();
        assert_eq!(err.query, request.query);
        assert_eq!(err.k, Some(2));
        assert!(err.error.contains("nope"));

        let err = service
            .handle(&MatchRequest::vector(vec![1.0, 0.0, 0.0], Some(4)))
            .unwrap_err();
        assert!(err.error.contains("4"));

        let err = service.handle(&MatchRequest::identifier("  ", None)).unwrap_err();
        assert_eq!(err.error, QueryError::EmptyQuery.to_string());

        let err = service
            .handle(&MatchRequest::vector(vec![1.0, 0.0], None))
            .unwrap_err();
        assert_eq!(err.error, QueryError::dimension_mismatch(3, 2).to_string());

        let err = service
            .handle(&MatchRequest::vector(vec![1.0, 0.0, 0.0], Some(0)))
            .unwrap_err();
        assert_eq!(err.error, QueryError::ZeroNumMatches.to_string());
    }

    #[test]
    fn test_reload_swaps_version() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        save_corpus(first.path(), axis_records());
        save_corpus(
            second.path(),
            vec![
                EmbeddingRecord::new("p", vec![1.0, 0.0, 0.0]),
                EmbeddingRecord::new("q", vec![0.0, 1.0, 0.0]),
            ],
        );

        let service = service(first.path());
        let before = service.snapshot();
        let version = service.reload(second.path()).unwrap();

        assert_eq!(service.version(), version);
        assert_eq!(version.dir, second.path());
        assert_ne!(before.version(), &version);

        // The old snapshot still answers from the old corpus
        assert_eq!(
            before.matcher().match_vector(&[1.0, 0.0, 0.0], 1).unwrap(),
            vec!["x"]
        );
        let response = service
            .handle(&MatchRequest::vector(vec![1.0, 0.0, 0.0], Some(1)))
            .unwrap();
        assert_eq!(response.matches, vec!["p"]);
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let dir = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        save_corpus(dir.path(), axis_records());
        let service = service(dir.path());
        let version = service.version();

        assert!(service.reload(empty.path()).is_err());
        assert_eq!(service.version(), version);
    }

    #[test]
    fn test_request_json_shapes() {
        let request: MatchRequest = serde_json::from_str(r#"{"query": "a b", "k": 5}"#).unwrap();
        assert_eq!(request, MatchRequest::identifier("a b", Some(5)));

        let request: MatchRequest = serde_json::from_str(r#"{"query": [0.5, 1.0]}"#).unwrap();
        assert_eq!(request, MatchRequest::vector(vec![0.5, 1.0], None));

        let payload = serde_json::to_value(MatchErrorResponse {
            query: Query::Identifier("a".into()),
            k: None,
            error: "unknown identifier 'a'".into(),
        })
        .unwrap();
        assert_eq!(payload["query"], "a");
        assert!(payload["k"].is_null());
    }
}
