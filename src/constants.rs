//! Named constants for configuration values.
//!
//! This module centralizes magic numbers and default values used throughout
//! the codebase, making them easier to find, document, and tune.

/// Defaults for the tree + asymmetric-hashing index.
pub mod index {
    /// Dimensions covered by one quantization block.
    pub const DIMENSIONS_PER_BLOCK: usize = 2;

    /// Anisotropic quantization threshold (cosine between query and datapoint
    /// above which inner-product error matters).
    pub const ANISOTROPIC_QUANTIZATION_THRESHOLD: f32 = 0.2;

    /// Leaves scanned per query.
    pub const NUM_LEAVES_TO_SEARCH: usize = 200;

    /// Approximate candidates that are exactly re-scored per query.
    pub const REORDER_NUM_NEIGHBORS: usize = 200;

    /// Default seed for the coarse quantizer and codebook training.
    pub const DEFAULT_SEED: u64 = 0x5ca1_ab1e;
}

/// Constants for per-block asymmetric hashing.
pub mod quantization {
    /// Codewords per block (4-bit codes).
    pub const CODEWORDS_PER_BLOCK: usize = 16;

    /// k-means iterations for codebook training.
    pub const KMEANS_ITERATIONS: usize = 25;

    /// Coordinate-descent sweeps over blocks when assigning anisotropic codes.
    pub const ASSIGNMENT_SWEEPS: usize = 3;
}

/// Constants for k-means clustering.
pub mod kmeans {
    /// Threshold for switching from k-means++ to random initialization.
    /// k-means++ has O(k²n) complexity, which becomes expensive for large k.
    pub const KMEANSPP_THRESHOLD: usize = 64;

    /// Convergence threshold for early stopping.
    /// Training stops when mean centroid movement falls below this value.
    pub const CONVERGENCE_THRESHOLD: f32 = 1e-4;

    /// Default number of iterations for leaf centroid training.
    pub const DEFAULT_MAX_ITERATIONS: usize = 25;
}

/// Constants for index evaluation.
pub mod evaluation {
    /// Fraction of the corpus sampled as evaluation queries.
    pub const QUERIES_SAMPLE_RATIO: f64 = 0.01;

    /// Upper bound on sampled evaluation queries.
    pub const MAX_NUM_QUERIES: usize = 10_000;

    /// Neighbors compared per evaluation query.
    pub const NUM_NEIGHBORS: usize = 20;

    /// Smallest recall that blesses an index.
    pub const MIN_RECALL: f64 = 0.8;

    /// Largest mean approximate query latency, in seconds, that blesses an index.
    pub const MAX_LATENCY_SECS: f64 = 0.01;
}

/// Constants for the serving facade.
pub mod serving {
    /// Matches returned when a request does not specify `k`.
    pub const DEFAULT_NUM_MATCHES: usize = 10;

    /// Largest `k` a single request may ask for.
    pub const MAX_NUM_MATCHES: usize = 1_000;
}

/// Constants for parallel processing.
pub mod parallel {
    /// Rows per rayon task when scanning the full matrix.
    pub const EXACT_SCAN_CHUNK_SIZE: usize = 1_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_fit_in_nibble() {
        assert!(quantization::CODEWORDS_PER_BLOCK <= 16);
    }

    #[test]
    fn test_threshold_in_range() {
        assert!((0.0..1.0).contains(&index::ANISOTROPIC_QUANTIZATION_THRESHOLD));
    }
}
