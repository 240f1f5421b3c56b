//! Builder for [`TreeAhIndex`].
//!
//! The builder provides a fluent API for the partitioning, quantization and
//! re-scoring parameters. Every unset parameter falls back to the defaults in
//! [`crate::constants::index`].
//!
//! # Example
//!
//! ```ignore
//! use item_matcher::index::IndexBuilder;
//!
//! // Default parameters, round(sqrt(rows)) leaves
//! let index = IndexBuilder::new().build(&corpus.matrix)?;
//!
//! // Or specify parameters explicitly
//! let index = IndexBuilder::new()
//!     .num_leaves(1000)
//!     .num_leaves_to_search(100)
//!     .reorder_num_neighbors(250)
//!     .seed(7)
//!     .build(&corpus.matrix)?;
//! ```

use super::tree_ah::{Leaf, TreeAhIndex};
use crate::config::IndexConfig;
use crate::constants::{index, kmeans, quantization};
use crate::distance::dot_product;
use crate::error::BuildError;
use crate::kmeans::KMeans;
use crate::quantization::{AnisotropicQuantizer, QuantizerParams};
use crate::types::{NumLeaves, RowId};
use crate::vector::EmbeddingMatrix;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Build an index with default parameters and an optional leaf count.
///
/// `None` or `Some(0)` selects `round(sqrt(rows))` leaves.
pub fn build(matrix: &EmbeddingMatrix, num_leaves: Option<usize>) -> Result<TreeAhIndex, BuildError> {
    IndexBuilder::new()
        .num_leaves(num_leaves.unwrap_or(0))
        .build(matrix)
}

/// Builder for constructing a [`TreeAhIndex`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    /// Number of leaves; `None` selects `round(sqrt(rows))`.
    num_leaves: Option<usize>,
    /// Leaves scanned per query.
    num_leaves_to_search: usize,
    /// Dimensions per quantization block.
    dimensions_per_block: usize,
    /// Anisotropic threshold `T`.
    anisotropic_threshold: f32,
    /// Candidates re-scored exactly per query.
    reorder_num_neighbors: usize,
    /// Rows used to train leaf centroids; `None` uses all rows.
    training_sample_size: Option<usize>,
    /// Lloyd iterations for leaf centroids.
    kmeans_iterations: usize,
    /// Seed for sampling, centroid initialization and codebook training.
    seed: u64,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            num_leaves: None,
            num_leaves_to_search: index::NUM_LEAVES_TO_SEARCH,
            dimensions_per_block: index::DIMENSIONS_PER_BLOCK,
            anisotropic_threshold: index::ANISOTROPIC_QUANTIZATION_THRESHOLD,
            reorder_num_neighbors: index::REORDER_NUM_NEIGHBORS,
            training_sample_size: None,
            kmeans_iterations: kmeans::DEFAULT_MAX_ITERATIONS,
            seed: index::DEFAULT_SEED,
        }
    }

    /// Create a builder from the `index` settings section.
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            num_leaves: (config.num_leaves > 0).then_some(config.num_leaves),
            num_leaves_to_search: config.num_leaves_to_search,
            dimensions_per_block: config.dimensions_per_block,
            anisotropic_threshold: config.anisotropic_quantization_threshold,
            reorder_num_neighbors: config.reorder_num_neighbors,
            training_sample_size: (config.training_sample_size > 0)
                .then_some(config.training_sample_size),
            kmeans_iterations: config.kmeans_iterations,
            seed: config.seed,
        }
    }

    /// Set the number of leaves; 0 restores the `round(sqrt(rows))` default.
    pub fn num_leaves(mut self, n: usize) -> Self {
        self.num_leaves = (n > 0).then_some(n);
        self
    }

    /// Set the number of leaves scanned per query.
    ///
    /// Higher values improve recall but slow down search.
    pub fn num_leaves_to_search(mut self, n: usize) -> Self {
        self.num_leaves_to_search = n;
        self
    }

    /// Set the number of dimensions per quantization block.
    pub fn dimensions_per_block(mut self, n: usize) -> Self {
        self.dimensions_per_block = n;
        self
    }

    /// Set the anisotropic quantization threshold; 0 selects plain
    /// reconstruction loss.
    pub fn anisotropic_quantization_threshold(mut self, t: f32) -> Self {
        self.anisotropic_threshold = t;
        self
    }

    /// Set how many approximate candidates are re-scored exactly.
    pub fn reorder_num_neighbors(mut self, n: usize) -> Self {
        self.reorder_num_neighbors = n;
        self
    }

    /// Train leaf centroids on a seeded sample of `n` rows.
    pub fn training_sample_size(mut self, n: usize) -> Self {
        self.training_sample_size = (n > 0).then_some(n);
        self
    }

    /// Set the Lloyd iteration cap for leaf centroids.
    pub fn kmeans_iterations(mut self, n: usize) -> Self {
        self.kmeans_iterations = n;
        self
    }

    /// Set the seed for every randomized build step.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the index over L2-normalized rows.
    ///
    /// Row `i` of `matrix` becomes row label `i`; the vocabulary used to
    /// load the matrix must be persisted alongside the index.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The matrix is empty
    /// - More leaves are requested than there are rows
    /// - A parameter is invalid (zero leaves to search, zero block width,
    ///   threshold outside `[0, 1)`, training sample smaller than the leaf
    ///   count)
    pub fn build(&self, matrix: &EmbeddingMatrix) -> Result<TreeAhIndex, BuildError> {
        let rows = matrix.len();
        if rows == 0 {
            return Err(BuildError::EmptyMatrix);
        }
        let num_leaves = self
            .num_leaves
            .unwrap_or_else(|| NumLeaves::for_rows(rows).as_usize());
        self.validate(rows, num_leaves)?;

        let dim = matrix.dimension();
        let start = Instant::now();
        info!(rows, dim, num_leaves, "building tree-AH index");

        // Step 1: train leaf centroids
        let sample_rows = self.training_rows(rows);
        let training: Vec<&[f32]> = match &sample_rows {
            Some(rows) => rows.iter().map(|&i| matrix.row(i)).collect(),
            None => matrix.rows().collect(),
        };
        debug!(sample = training.len(), "training leaf centroids");
        let mut kmeans = KMeans::new(num_leaves, self.kmeans_iterations).with_seed(self.seed);
        kmeans.fit(&training);
        let centroids = kmeans.centroids;

        // Step 2: assign rows to the centroid with the largest inner product
        debug!("assigning rows to leaves");
        let assignments: Vec<usize> = matrix
            .as_slice()
            .par_chunks(dim.max(1))
            .map(|row| best_leaf(&centroids, row))
            .collect();

        // Step 3: train the residual quantizer
        debug!(
            dimensions_per_block = self.dimensions_per_block,
            threshold = self.anisotropic_threshold,
            "training residual quantizer"
        );
        let residuals: Vec<Vec<f32>> = matrix
            .rows()
            .zip(&assignments)
            .map(|(row, &leaf)| residual(row, &centroids[leaf]))
            .collect();
        let quantizer = AnisotropicQuantizer::train(
            &residuals,
            &QuantizerParams {
                dimensions_per_block: self.dimensions_per_block,
                anisotropic_threshold: self.anisotropic_threshold,
                iterations: quantization::KMEANS_ITERATIONS,
                seed: self.seed.wrapping_add(1),
            },
        )?;

        // Step 4: encode residuals leaf by leaf
        debug!(eta = quantizer.eta(), "encoding residuals");
        let mut members: Vec<Vec<RowId>> = vec![Vec::new(); centroids.len()];
        for (row, &leaf) in assignments.iter().enumerate() {
            members[leaf].push(RowId::new(row as u32));
        }
        let leaves: Vec<Leaf> = members
            .into_par_iter()
            .map(|rows| {
                let mut codes = Vec::with_capacity(rows.len() * quantizer.code_bytes());
                for row in &rows {
                    let i = row.as_usize();
                    codes.extend(quantizer.encode(&residuals[i], matrix.row(i)));
                }
                Leaf { rows, codes }
            })
            .collect();

        let empty = leaves.iter().filter(|l| l.rows.is_empty()).count();
        if empty > 0 {
            warn!(empty, num_leaves = leaves.len(), "some leaves received no rows");
        }

        let mut flat_centroids = EmbeddingMatrix::with_capacity(dim, centroids.len());
        for c in &centroids {
            flat_centroids.push_row(c);
        }

        let index = TreeAhIndex {
            centroids: flat_centroids,
            leaves,
            quantizer,
            vectors: matrix.clone(),
            num_leaves_to_search: self.num_leaves_to_search,
            reorder_num_neighbors: self.reorder_num_neighbors,
        };

        let stats = index.statistics();
        info!(
            rows = stats.num_rows,
            leaves = stats.num_leaves,
            code_bytes = stats.code_bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "index built"
        );
        debug!("{}", stats.summary());
        Ok(index)
    }

    fn validate(&self, rows: usize, num_leaves: usize) -> Result<(), BuildError> {
        if num_leaves > rows {
            return Err(BuildError::TooManyLeaves { num_leaves, rows });
        }
        if rows > u32::MAX as usize {
            return Err(BuildError::invalid_parameter(format!(
                "{rows} rows exceed the row label range"
            )));
        }
        if self.num_leaves_to_search == 0 {
            return Err(BuildError::invalid_parameter(
                "num_leaves_to_search must be at least 1",
            ));
        }
        if self.dimensions_per_block == 0 {
            return Err(BuildError::invalid_parameter(
                "dimensions_per_block must be at least 1",
            ));
        }
        if !(0.0..1.0).contains(&self.anisotropic_threshold) {
            return Err(BuildError::invalid_parameter(format!(
                "anisotropic_quantization_threshold must be in [0, 1), got {}",
                self.anisotropic_threshold
            )));
        }
        if let Some(sample) = self.training_sample_size {
            if sample < num_leaves {
                return Err(BuildError::invalid_parameter(format!(
                    "training_sample_size {sample} is smaller than num_leaves {num_leaves}"
                )));
            }
        }
        Ok(())
    }

    /// Seeded sample of row indices, or `None` to train on every row.
    fn training_rows(&self, rows: usize) -> Option<Vec<usize>> {
        let size = self.training_sample_size.filter(|&s| s < rows)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picked = sample(&mut rng, rows, size).into_vec();
        picked.sort_unstable();
        Some(picked)
    }
}

/// Index of the centroid with the largest inner product, lowest on ties.
fn best_leaf(centroids: &[Vec<f32>], row: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, c) in centroids.iter().enumerate() {
        let score = dot_product(row, c);
        if score > best_score {
            best_score = score;
            best = idx;
        }
    }
    best
}

fn residual(row: &[f32], centroid: &[f32]) -> Vec<f32> {
    row.iter().zip(centroid).map(|(x, c)| x - c).collect()
}
