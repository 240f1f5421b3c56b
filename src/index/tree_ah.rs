//! Tree-AH index: leaf partitioning with asymmetric hashing.
//!
//! Combines a one-level tree of leaves (coarse quantization) with anisotropic
//! per-block codes of each row's residual (fine quantization), and re-scores
//! a shortlist of candidates against the full-precision rows.
//!
//! Search process:
//! 1. Score the normalized query against every leaf centroid and rank the
//!    leaves
//! 2. Build one lookup table for the query
//! 3. Scan the codes of the `num_leaves_to_search` best leaves, and of further
//!    leaves while fewer than `k` rows have been seen; the approximate score
//!    of a row is `<q, centroid> + <q, decoded residual>`
//! 4. Keep the best `max(reorder_num_neighbors, k)` candidates, re-score them
//!    with the exact inner product and return the top `k`

use super::traits::{finalize, rank_order, Neighbor};
use crate::distance::dot_product;
use crate::metrics::{IndexStatistics, SearchStatistics};
use crate::quantization::AnisotropicQuantizer;
use crate::types::RowId;
use crate::vector::EmbeddingMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Rows of one leaf and their packed codes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Leaf {
    /// Row labels in this leaf.
    pub(crate) rows: Vec<RowId>,
    /// Packed codes, `code_bytes` per row in `rows` order.
    pub(crate) codes: Vec<u8>,
}

/// Heap entry ordered so that the worst candidate sits on top.
#[derive(PartialEq)]
struct Ranked(Neighbor);

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // rank_order puts better candidates first, so the max-heap top is the
        // worst one kept
        rank_order(&self.0, &other.0)
    }
}

/// Immutable tree-AH index over L2-normalized rows.
///
/// Built by [`IndexBuilder`](super::IndexBuilder) and acquired by servers
/// only through [`persistence::load`](crate::persistence::load).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeAhIndex {
    /// Leaf centroids, one row per leaf.
    pub(crate) centroids: EmbeddingMatrix,
    /// Leaf membership and codes.
    pub(crate) leaves: Vec<Leaf>,
    /// Residual quantizer shared by all leaves.
    pub(crate) quantizer: AnisotropicQuantizer,
    /// Full-precision rows for re-scoring.
    pub(crate) vectors: EmbeddingMatrix,
    /// Leaves scanned per query.
    pub(crate) num_leaves_to_search: usize,
    /// Candidates re-scored exactly per query; 0 disables re-scoring.
    pub(crate) reorder_num_neighbors: usize,
}

impl TreeAhIndex {
    /// Return the number of indexed rows.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Return true if the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Return the vector dimension.
    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    /// Return the number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Return the number of leaves scanned per query.
    pub fn num_leaves_to_search(&self) -> usize {
        self.num_leaves_to_search
    }

    /// Set the number of leaves scanned per query.
    ///
    /// Values above the leaf count scan every leaf.
    pub fn set_num_leaves_to_search(&mut self, n: usize) {
        self.num_leaves_to_search = n.max(1);
    }

    /// Return the re-score depth.
    pub fn reorder_num_neighbors(&self) -> usize {
        self.reorder_num_neighbors
    }

    /// Set the re-score depth; 0 returns approximate scores directly.
    pub fn set_reorder_num_neighbors(&mut self, n: usize) {
        self.reorder_num_neighbors = n;
    }

    /// Return the full-precision row `row`.
    pub fn row(&self, row: RowId) -> Option<&[f32]> {
        (row.as_usize() < self.vectors.len()).then(|| self.vectors.row(row.as_usize()))
    }

    /// Return the residual quantizer.
    pub fn quantizer(&self) -> &AnisotropicQuantizer {
        &self.quantizer
    }

    /// Search for the `k` best rows of a normalized query.
    ///
    /// The caller validates the query dimension and normalizes it.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        self.search_inner(query, k, None)
    }

    /// Search and report what the query touched.
    pub fn search_with_stats(&self, query: &[f32], k: usize) -> (Vec<Neighbor>, SearchStatistics) {
        let start = Instant::now();
        let mut stats = SearchStatistics::default();
        let results = self.search_inner(query, k, Some(&mut stats));
        stats.query_time = start.elapsed();
        (results, stats)
    }

    fn search_inner(
        &self,
        query: &[f32],
        k: usize,
        mut stats: Option<&mut SearchStatistics>,
    ) -> Vec<Neighbor> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let leaves = self.rank_leaves(query);
        let table = self.quantizer.build_lookup_table(query);
        let code_bytes = self.quantizer.code_bytes();
        let fetch_k = self.reorder_num_neighbors.max(k);
        let min_leaves = self.num_leaves_to_search.max(1);

        let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(fetch_k + 1);
        let mut scanned = 0;
        let mut probed = 0;

        // Past the configured probe count, keep widening only until k rows
        // have been seen.
        for leaf_id in &leaves {
            if probed >= min_leaves && heap.len() >= k {
                break;
            }
            probed += 1;
            let leaf = &self.leaves[leaf_id.row.as_usize()];
            let base = leaf_id.score;
            scanned += leaf.rows.len();

            for (&row, codes) in leaf.rows.iter().zip(leaf.codes.chunks_exact(code_bytes.max(1))) {
                let candidate = Neighbor::new(row, base + self.quantizer.score(&table, codes));
                if heap.len() < fetch_k {
                    heap.push(Ranked(candidate));
                } else if heap
                    .peek()
                    .is_some_and(|worst| rank_order(&candidate, &worst.0) == Ordering::Less)
                {
                    heap.pop();
                    heap.push(Ranked(candidate));
                }
            }
        }

        let mut candidates: Vec<Neighbor> = heap.into_iter().map(|r| r.0).collect();
        let reordered = if self.reorder_num_neighbors > 0 {
            for candidate in &mut candidates {
                candidate.score = dot_product(query, self.vectors.row(candidate.row.as_usize()));
            }
            candidates.len()
        } else {
            0
        };

        if let Some(stats) = stats.as_deref_mut() {
            stats.leaves_probed = probed;
            stats.rows_scanned = scanned;
            stats.candidates_reordered = reordered;
        }

        finalize(candidates, k)
    }

    /// All leaves best first, with `<q, centroid>` as the score.
    fn rank_leaves(&self, query: &[f32]) -> Vec<Neighbor> {
        let scored: Vec<Neighbor> = self
            .centroids
            .rows()
            .enumerate()
            .map(|(idx, c)| Neighbor::new(RowId::new(idx as u32), dot_product(query, c)))
            .collect();
        let n = scored.len();
        finalize(scored, n)
    }

    /// Summarize leaf balance and code size.
    pub fn statistics(&self) -> IndexStatistics {
        let sizes: Vec<usize> = self.leaves.iter().map(|l| l.rows.len()).collect();
        let code_bytes_per_row = self.quantizer.code_bytes();
        let code_bytes: usize = self.leaves.iter().map(|l| l.codes.len()).sum();
        let raw_bytes = self.len() * self.dimension() * std::mem::size_of::<f32>();

        IndexStatistics {
            num_rows: self.len(),
            dimension: self.dimension(),
            num_blocks: self.quantizer.num_blocks(),
            num_codewords: self.quantizer.num_codewords(),
            code_bytes_per_row,
            code_bytes,
            compression_ratio: if code_bytes == 0 {
                0.0
            } else {
                raw_bytes as f32 / code_bytes as f32
            },
            num_leaves_to_search: self.num_leaves_to_search,
            reorder_num_neighbors: self.reorder_num_neighbors,
            ..Default::default()
        }
        .with_leaf_sizes(&sizes)
    }

    /// Check internal consistency of a deserialized index.
    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        let dim = self.dimension();
        if self.centroids.len() != self.leaves.len() {
            return Err(format!(
                "{} centroids for {} leaves",
                self.centroids.len(),
                self.leaves.len()
            ));
        }
        if self.centroids.dimension() != dim || self.quantizer.dimension() != dim {
            return Err("component dimensions disagree".to_string());
        }
        if self.leaves.is_empty() {
            return Err("index has no leaves".to_string());
        }

        let code_bytes = self.quantizer.code_bytes();
        let mut seen = vec![false; self.len()];
        for (i, leaf) in self.leaves.iter().enumerate() {
            if leaf.codes.len() != leaf.rows.len() * code_bytes {
                return Err(format!("leaf {i} has truncated codes"));
            }
            for row in &leaf.rows {
                match seen.get_mut(row.as_usize()) {
                    Some(slot) if !*slot => *slot = true,
                    Some(_) => return Err(format!("{row} appears in two leaves")),
                    None => return Err(format!("{row} is out of range")),
                }
            }
        }
        if seen.iter().any(|s| !s) {
            return Err("some rows belong to no leaf".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use crate::vector::normalized;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(rows: usize, dim: usize, seed: u64) -> EmbeddingMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut matrix = EmbeddingMatrix::with_capacity(dim, rows);
        for _ in 0..rows {
            let row: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            matrix.push_row(&normalized(&row).unwrap());
        }
        matrix
    }

    #[test]
    fn test_search_returns_k_sorted() {
        let matrix = random_matrix(400, 16, 11);
        let index = IndexBuilder::new().num_leaves(20).build(&matrix).unwrap();

        let results = index.search(matrix.row(5), 10);
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].row, RowId::new(5));
        for pair in results.windows(2) {
            assert_ne!(rank_order(&pair[0], &pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn test_k_above_corpus_returns_everything() {
        let matrix = random_matrix(30, 8, 12);
        let index = IndexBuilder::new().num_leaves(4).build(&matrix).unwrap();
        assert_eq!(index.search(matrix.row(0), 100).len(), 30);
    }

    #[test]
    fn test_sparse_leaves_widen_to_k() {
        let matrix = random_matrix(60, 8, 17);
        let mut index = IndexBuilder::new().num_leaves(12).build(&matrix).unwrap();
        index.set_num_leaves_to_search(1);
        index.set_reorder_num_neighbors(0);

        let (results, stats) = index.search_with_stats(matrix.row(3), 40);
        assert_eq!(results.len(), 40);
        assert!(stats.leaves_probed > 1);
    }

    #[test]
    fn test_search_with_stats() {
        let matrix = random_matrix(300, 8, 13);
        let mut index = IndexBuilder::new().num_leaves(10).build(&matrix).unwrap();
        index.set_num_leaves_to_search(3);
        index.set_reorder_num_neighbors(25);

        let (results, stats) = index.search_with_stats(matrix.row(1), 5);
        assert_eq!(results.len(), 5);
        assert_eq!(stats.leaves_probed, 3);
        assert!(stats.rows_scanned > 0 && stats.rows_scanned < 300);
        assert_eq!(stats.candidates_reordered, 25.min(stats.rows_scanned));
    }

    #[test]
    fn test_without_reorder_scores_are_approximate() {
        let matrix = random_matrix(200, 8, 14);
        let mut index = IndexBuilder::new().num_leaves(5).build(&matrix).unwrap();
        index.set_reorder_num_neighbors(0);

        let (results, stats) = index.search_with_stats(matrix.row(2), 10);
        assert_eq!(results.len(), 10);
        assert_eq!(stats.candidates_reordered, 0);
    }

    #[test]
    fn test_statistics() {
        let matrix = random_matrix(256, 16, 15);
        let index = IndexBuilder::new().num_leaves(16).build(&matrix).unwrap();
        let stats = index.statistics();

        assert_eq!(stats.num_rows, 256);
        assert_eq!(stats.dimension, 16);
        assert_eq!(stats.num_leaves, 16);
        assert_eq!(stats.num_blocks, 8);
        assert_eq!(stats.code_bytes_per_row, 4);
        assert_eq!(stats.code_bytes, 256 * 4);
        assert!((stats.compression_ratio - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_consistency_check() {
        let matrix = random_matrix(50, 4, 16);
        let mut index = IndexBuilder::new().num_leaves(5).build(&matrix).unwrap();
        assert!(index.check_consistency().is_ok());

        let leaf = index
            .leaves
            .iter_mut()
            .find(|l| !l.rows.is_empty())
            .unwrap();
        leaf.rows.pop();
        assert!(index.check_consistency().is_err());
    }
}
