//! Approximate matching through a [`TreeAhIndex`].

use super::traits::{validate_query, Matcher, Neighbor};
use super::tree_ah::TreeAhIndex;
use crate::error::{PersistenceError, QueryError};
use crate::types::RowId;
use crate::vector::normalize_query;
use crate::vocabulary::Vocabulary;
use std::sync::Arc;

/// Matcher answering queries from a tree-AH index and its vocabulary.
///
/// Cloning is cheap; clones share the same immutable index.
#[derive(Debug, Clone)]
pub struct ApproximateMatcher {
    index: Arc<TreeAhIndex>,
    vocabulary: Arc<Vocabulary>,
}

impl ApproximateMatcher {
    /// Pair an index with the vocabulary it was built from.
    ///
    /// # Errors
    /// Returns [`PersistenceError::VocabularyMismatch`] if the vocabulary
    /// does not have one entry per indexed row.
    pub fn new(
        index: impl Into<Arc<TreeAhIndex>>,
        vocabulary: impl Into<Arc<Vocabulary>>,
    ) -> Result<Self, PersistenceError> {
        let index = index.into();
        let vocabulary = vocabulary.into();
        if index.len() != vocabulary.len() {
            return Err(PersistenceError::vocabulary_mismatch(format!(
                "index has {} rows, vocabulary has {} identifiers",
                index.len(),
                vocabulary.len()
            )));
        }
        Ok(Self { index, vocabulary })
    }

    /// Return the underlying index.
    pub fn index(&self) -> &TreeAhIndex {
        &self.index
    }

    /// Return the vocabulary.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}

impl Matcher for ApproximateMatcher {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, QueryError> {
        validate_query(query, k, self.index.dimension())?;
        let query = normalize_query(query)?;
        Ok(self.index.search(&query, k))
    }

    fn identifier(&self, row: RowId) -> Option<&str> {
        self.vocabulary.get(row)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn dimension(&self) -> usize {
        self.index.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ExactMatcher, IndexBuilder};
    use crate::store::{EmbeddingRecord, VectorStore};

    fn corpus() -> crate::store::Corpus {
        let records = (0..60).map(|i| {
            let angle = i as f32 * 0.1;
            EmbeddingRecord::new(format!("item-{i}"), vec![angle.cos(), angle.sin(), 0.1])
        });
        VectorStore::default().from_records(records).unwrap()
    }

    #[test]
    fn test_rejects_misaligned_vocabulary() {
        let corpus = corpus();
        let index = IndexBuilder::new().num_leaves(4).build(&corpus.matrix).unwrap();
        let short = Vocabulary::from_identifiers(["a", "b"]).unwrap();
        assert!(matches!(
            ApproximateMatcher::new(index, short),
            Err(PersistenceError::VocabularyMismatch(_))
        ));
    }

    #[test]
    fn test_single_leaf_matches_exact() {
        let corpus = corpus();
        let index = IndexBuilder::new().num_leaves(1).build(&corpus.matrix).unwrap();
        let approx = ApproximateMatcher::new(index, corpus.vocabulary.clone()).unwrap();
        let exact = ExactMatcher::from_corpus(&corpus).unwrap();

        for q in [[1.0, 0.0, 0.0], [0.3, -0.7, 0.2], [-1.0, 1.0, 1.0]] {
            assert_eq!(
                approx.match_vector(&q, 7).unwrap(),
                exact.match_vector(&q, 7).unwrap()
            );
        }
    }

    #[test]
    fn test_query_errors() {
        let corpus = corpus();
        let index = IndexBuilder::new().num_leaves(4).build(&corpus.matrix).unwrap();
        let approx = ApproximateMatcher::new(index, corpus.vocabulary).unwrap();

        assert_eq!(
            approx.match_vector(&[1.0, 0.0], 3),
            Err(QueryError::dimension_mismatch(3, 2))
        );
        assert_eq!(approx.match_vector(&[0.0; 3], 3), Err(QueryError::ZeroVector));
        assert_eq!(
            approx.match_vector(&[f32::INFINITY, 0.0, 0.0], 3),
            Err(QueryError::NonFinite)
        );
        assert_eq!(approx.match_vector(&[1.0; 3], 0), Err(QueryError::ZeroNumMatches));
    }
}
