//! Metrics and statistics for index monitoring.
//!
//! Provides statistics about index state and search operations for
//! performance monitoring, capacity planning, and debugging.
//!
//! # Index Statistics
//!
//! Use [`IndexStatistics`] to understand the shape of a built index:
//!
//! ```ignore
//! let index = IndexBuilder::new().build(&corpus.matrix)?;
//! println!("{}", index.statistics().summary());
//! // IndexStatistics:
//! //   Rows: 10000, Dimension: 50
//! //   Leaves: 100 (empty=0, min=71, max=134, mean=100.0, std=12.9)
//! //   Blocks: 25 (16 codewords, 13 bytes/row)
//! //   Codes: 0.12 MB (compression ratio: 15.4x)
//! ```
//!
//! # Search Statistics
//!
//! Use [`SearchStatistics`] to profile a single query:
//!
//! ```ignore
//! let (results, stats) = index.search_with_stats(&query, 10)?;
//! println!("{}", stats.summary());
//! ```

use std::time::Duration;

/// Statistics about the current state of a tree-AH index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexStatistics {
    /// Number of indexed rows.
    pub num_rows: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Number of leaves.
    pub num_leaves: usize,
    /// Leaves that received no rows.
    pub empty_leaves: usize,
    /// Minimum leaf size.
    pub leaf_size_min: usize,
    /// Maximum leaf size.
    pub leaf_size_max: usize,
    /// Mean leaf size.
    pub leaf_size_mean: f32,
    /// Standard deviation of leaf sizes.
    pub leaf_size_std: f32,
    /// Quantization blocks per row.
    pub num_blocks: usize,
    /// Codewords per block.
    pub num_codewords: usize,
    /// Packed code bytes per row.
    pub code_bytes_per_row: usize,
    /// Total bytes of packed codes.
    pub code_bytes: usize,
    /// Compression ratio of codes against raw f32 rows.
    pub compression_ratio: f32,
    /// Leaves scanned per query.
    pub num_leaves_to_search: usize,
    /// Candidates re-scored exactly per query.
    pub reorder_num_neighbors: usize,
}

impl IndexStatistics {
    /// Compute leaf-size figures from per-leaf row counts.
    pub(crate) fn with_leaf_sizes(mut self, sizes: &[usize]) -> Self {
        self.num_leaves = sizes.len();
        self.empty_leaves = sizes.iter().filter(|&&s| s == 0).count();
        self.leaf_size_min = sizes.iter().copied().min().unwrap_or(0);
        self.leaf_size_max = sizes.iter().copied().max().unwrap_or(0);
        if !sizes.is_empty() {
            let n = sizes.len() as f32;
            let mean = sizes.iter().sum::<usize>() as f32 / n;
            let var = sizes
                .iter()
                .map(|&s| {
                    let d = s as f32 - mean;
                    d * d
                })
                .sum::<f32>()
                / n;
            self.leaf_size_mean = mean;
            self.leaf_size_std = var.sqrt();
        }
        self
    }

    /// Create a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "IndexStatistics:\n  \
             Rows: {}, Dimension: {}\n  \
             Leaves: {} (empty={}, min={}, max={}, mean={:.1}, std={:.1})\n  \
             Blocks: {} ({} codewords, {} bytes/row)\n  \
             Codes: {:.2} MB (compression ratio: {:.1}x)\n  \
             Search: {} leaves, reorder {}",
            self.num_rows,
            self.dimension,
            self.num_leaves,
            self.empty_leaves,
            self.leaf_size_min,
            self.leaf_size_max,
            self.leaf_size_mean,
            self.leaf_size_std,
            self.num_blocks,
            self.num_codewords,
            self.code_bytes_per_row,
            self.code_bytes as f64 / (1024.0 * 1024.0),
            self.compression_ratio,
            self.num_leaves_to_search,
            self.reorder_num_neighbors,
        )
    }
}

/// Statistics about a single search operation.
#[derive(Clone, Debug, Default)]
pub struct SearchStatistics {
    /// Total query execution time.
    pub query_time: Duration,
    /// Number of leaves probed.
    pub leaves_probed: usize,
    /// Number of rows scored with the lookup table.
    pub rows_scanned: usize,
    /// Number of candidates re-scored exactly.
    pub candidates_reordered: usize,
}

impl SearchStatistics {
    /// Get query time in milliseconds.
    pub fn query_time_ms(&self) -> f32 {
        self.query_time.as_secs_f32() * 1000.0
    }

    /// Create a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "SearchStatistics:\n  \
             Time: {:.3}ms\n  \
             Leaves probed: {}\n  \
             Rows scanned: {}\n  \
             Candidates reordered: {}",
            self.query_time_ms(),
            self.leaves_probed,
            self.rows_scanned,
            self.candidates_reordered,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_size_figures() {
        let stats = IndexStatistics::default().with_leaf_sizes(&[2, 4, 0, 6]);
        assert_eq!(stats.num_leaves, 4);
        assert_eq!(stats.empty_leaves, 1);
        assert_eq!(stats.leaf_size_min, 0);
        assert_eq!(stats.leaf_size_max, 6);
        assert!((stats.leaf_size_mean - 3.0).abs() < 1e-6);
        assert!((stats.leaf_size_std - 5.0f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_index_statistics_summary() {
        let stats = IndexStatistics {
            num_rows: 1000,
            dimension: 50,
            num_blocks: 25,
            num_codewords: 16,
            code_bytes_per_row: 13,
            compression_ratio: 15.4,
            num_leaves_to_search: 200,
            reorder_num_neighbors: 200,
            ..Default::default()
        }
        .with_leaf_sizes(&[500, 500]);

        let summary = stats.summary();
        assert!(summary.contains("Rows: 1000"));
        assert!(summary.contains("Leaves: 2"));
        assert!(summary.contains("15.4x"));
    }

    #[test]
    fn test_search_statistics_summary() {
        let stats = SearchStatistics {
            query_time: Duration::from_micros(1500),
            leaves_probed: 4,
            rows_scanned: 1000,
            candidates_reordered: 200,
        };

        let summary = stats.summary();
        assert!(summary.contains("1.5"));
        assert!(summary.contains("Rows scanned: 1000"));
        assert!(summary.contains("Candidates reordered: 200"));
    }
}
