//! Exact maximum inner product matching.
//!
//! Scores the normalized query against every row of the full-precision
//! matrix. This is the ground truth the approximate index is evaluated
//! against; it costs O(rows) per query and is not meant for serving volume.

use super::traits::{finalize, validate_query, Matcher, Neighbor};
use crate::constants::parallel::EXACT_SCAN_CHUNK_SIZE;
use crate::distance::dot_product;
use crate::error::{PersistenceError, QueryError};
use crate::store::Corpus;
use crate::types::RowId;
use crate::vector::{normalize_query, EmbeddingMatrix};
use crate::vocabulary::Vocabulary;
use rayon::prelude::*;

/// Brute-force matcher over a borrowed matrix and vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct ExactMatcher<'a> {
    matrix: &'a EmbeddingMatrix,
    vocabulary: &'a Vocabulary,
}

impl<'a> ExactMatcher<'a> {
    /// Create a matcher over rows of `matrix` named by `vocabulary`.
    ///
    /// Row `i` of the matrix belongs to entry `i` of the vocabulary; a row
    /// count that differs from the vocabulary size is rejected.
    pub fn new(
        matrix: &'a EmbeddingMatrix,
        vocabulary: &'a Vocabulary,
    ) -> Result<Self, PersistenceError> {
        if matrix.len() != vocabulary.len() {
            return Err(PersistenceError::vocabulary_mismatch(format!(
                "matrix has {} rows, vocabulary has {} identifiers",
                matrix.len(),
                vocabulary.len()
            )));
        }
        Ok(Self { matrix, vocabulary })
    }

    /// Create a matcher over a loaded corpus.
    pub fn from_corpus(corpus: &'a Corpus) -> Result<Self, PersistenceError> {
        Self::new(&corpus.matrix, &corpus.vocabulary)
    }

    /// Score an already normalized query against every row.
    ///
    /// Splits the matrix into chunks, keeps the best `k` of each chunk in
    /// parallel, then merges the survivors.
    pub(crate) fn search_normalized(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let dim = self.matrix.dimension().max(1);
        let survivors: Vec<Neighbor> = self
            .matrix
            .as_slice()
            .par_chunks(EXACT_SCAN_CHUNK_SIZE * dim)
            .enumerate()
            .flat_map_iter(|(chunk_idx, chunk)| {
                let base = chunk_idx * EXACT_SCAN_CHUNK_SIZE;
                let scored = chunk
                    .chunks_exact(dim)
                    .enumerate()
                    .map(|(offset, row)| {
                        Neighbor::new(RowId::new((base + offset) as u32), dot_product(query, row))
                    })
                    .collect();
                finalize(scored, k)
            })
            .collect();

        finalize(survivors, k)
    }
}

impl Matcher for ExactMatcher<'_> {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, QueryError> {
        validate_query(query, k, self.matrix.dimension())?;
        let query = normalize_query(query)?;
        Ok(self.search_normalized(&query, k))
    }

    fn identifier(&self, row: RowId) -> Option<&str> {
        self.vocabulary.get(row)
    }

    fn len(&self) -> usize {
        self.matrix.len()
    }

    fn dimension(&self) -> usize {
        self.matrix.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::traits::rank_order;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn corpus(rows: usize, dim: usize, seed: u64) -> (EmbeddingMatrix, Vocabulary) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut matrix = EmbeddingMatrix::with_capacity(dim, rows);
        for _ in 0..rows {
            let row: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            matrix.push_row(&crate::vector::normalized(&row).unwrap());
        }
        let vocab = Vocabulary::from_identifiers((0..rows).map(|i| format!("item-{i}"))).unwrap();
        (matrix, vocab)
    }

    #[test]
    fn test_results_sorted_descending() {
        let (matrix, vocab) = corpus(500, 16, 1);
        let matcher = ExactMatcher::new(&matrix, &vocab).unwrap();
        let results = matcher.search(matrix.row(7), 10).unwrap();

        assert_eq!(results.len(), 10);
        assert_eq!(results[0].row, RowId::new(7));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_chunked_scan_matches_full_sort() {
        let (matrix, vocab) = corpus(EXACT_SCAN_CHUNK_SIZE * 2 + 37, 8, 2);
        let matcher = ExactMatcher::new(&matrix, &vocab).unwrap();
        let raw = matrix.row(3);
        let query = normalize_query(raw).unwrap();

        let mut all: Vec<Neighbor> = matrix
            .rows()
            .enumerate()
            .map(|(i, row)| Neighbor::new(i as u32, dot_product(&query, row)))
            .collect();
        all.sort_by(rank_order);
        all.truncate(25);

        assert_eq!(matcher.search(raw, 25).unwrap(), all);
    }

    #[test]
    fn test_ties_keep_row_order() {
        let matrix =
            EmbeddingMatrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]]).unwrap();
        let vocab = Vocabulary::from_identifiers(["c", "a", "b"]).unwrap();
        let matcher = ExactMatcher::new(&matrix, &vocab).unwrap();

        assert_eq!(matcher.match_vector(&[1.0, 0.0], 2).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_k_larger_than_corpus() {
        let (matrix, vocab) = corpus(5, 4, 3);
        let matcher = ExactMatcher::new(&matrix, &vocab).unwrap();
        assert_eq!(matcher.match_vector(&[1.0, 0.0, 0.0, 0.0], 50).unwrap().len(), 5);
    }

    #[test]
    fn test_misaligned_vocabulary_rejected() {
        let (matrix, _) = corpus(5, 4, 5);
        let short = Vocabulary::from_identifiers(["a", "b", "c"]).unwrap();
        assert!(matches!(
            ExactMatcher::new(&matrix, &short),
            Err(PersistenceError::VocabularyMismatch(_))
        ));

        let corpus = Corpus {
            vocabulary: short,
            matrix,
        };
        assert!(ExactMatcher::from_corpus(&corpus).is_err());
    }

    #[test]
    fn test_invalid_queries() {
        let (matrix, vocab) = corpus(5, 4, 4);
        let matcher = ExactMatcher::new(&matrix, &vocab).unwrap();
        assert_eq!(
            matcher.search(&[1.0, 0.0], 1),
            Err(QueryError::dimension_mismatch(4, 2))
        );
        assert_eq!(matcher.search(&[0.0; 4], 1), Err(QueryError::ZeroVector));
        assert_eq!(matcher.search(&[1.0; 4], 0), Err(QueryError::ZeroNumMatches));
    }
}
