//! Common matching interface and result ordering.
//!
//! The approximate and exact matchers implement the same [`Matcher`]
//! capability so the evaluator and the serving layer can take either one.
//! Both rank candidates with [`rank_order`], which is what makes an
//! exhaustive approximate search return exactly the exact matcher's list.

use crate::error::QueryError;
use crate::types::RowId;
use std::cmp::Ordering;

/// A scored candidate: a row label and its inner product with the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row label of the candidate.
    pub row: RowId,
    /// Inner product with the normalized query (higher is closer).
    pub score: f32,
}

impl Neighbor {
    /// Create a new Neighbor.
    #[inline]
    pub fn new(row: impl Into<RowId>, score: f32) -> Self {
        Self {
            row: row.into(),
            score,
        }
    }
}

/// Ranking order shared by every matcher: descending score, then ascending
/// row label.
#[inline]
pub fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.score.total_cmp(&a.score).then(a.row.cmp(&b.row))
}

/// Sort candidates best-first and keep at most `k`.
pub(crate) fn finalize(mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k, rank_order);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(rank_order);
    candidates
}

/// Top-k maximum inner product matching over a fixed vocabulary.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single matcher serves any
/// number of concurrent queries.
pub trait Matcher: Send + Sync {
    /// Return the row labels and scores of the `k` best rows for `query`.
    ///
    /// The query is normalized first, so its scale never matters. Fewer than
    /// `k` results come back only when the corpus is smaller than `k`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, QueryError>;

    /// Map a row label back to its identifier.
    fn identifier(&self, row: RowId) -> Option<&str>;

    /// Return the number of rows that can be matched.
    fn len(&self) -> usize;

    /// Return true if there is nothing to match against.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the dimension queries must have.
    fn dimension(&self) -> usize;

    /// Return the identifiers of the `k` best rows, best first.
    fn match_vector(&self, query: &[f32], k: usize) -> Result<Vec<String>, QueryError> {
        Ok(self
            .search(query, k)?
            .into_iter()
            .filter_map(|n| self.identifier(n.row).map(str::to_owned))
            .collect())
    }
}

/// Reject a query that cannot be answered before any work is done.
pub(crate) fn validate_query(query: &[f32], k: usize, dimension: usize) -> Result<(), QueryError> {
    if k == 0 {
        return Err(QueryError::ZeroNumMatches);
    }
    if query.len() != dimension {
        return Err(QueryError::dimension_mismatch(dimension, query.len()));
    }
    Ok(())
}
