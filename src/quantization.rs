//! Anisotropic asymmetric hashing for compact leaf storage.
//!
//! Each residual (datapoint minus its leaf centroid) is split into blocks of
//! `dimensions_per_block` dimensions and every block is replaced by the index
//! of one of 16 codewords, so a code fits in a nibble and two blocks share a
//! byte. Queries stay uncompressed: a per-query lookup table holds the inner
//! product of every query block with every codeword, and the approximate
//! score of a datapoint is a sum of table entries.
//!
//! # Anisotropic loss
//!
//! For maximum inner product search the error component parallel to the
//! datapoint hurts ranking far more than the orthogonal component. With
//! quantization error `e = r - r̃` and datapoint `x`, codes are chosen to
//! minimize
//!
//! ```text
//! L = h_par * ||e_par||² + h_perp * ||e_perp||²
//!   ∝ ||e||² + (η - 1) * <e, x>² / ||x||²,   η = h_par / h_perp
//! ```
//!
//! where `η = (d - 1) T² / (1 - T²)` for threshold `T`. A threshold of zero
//! selects plain reconstruction loss (`η = 1`). Codebooks themselves are
//! trained with per-block k-means; only code assignment is anisotropic, done
//! by coordinate descent over blocks.

use crate::constants::quantization::{ASSIGNMENT_SWEEPS, CODEWORDS_PER_BLOCK, KMEANS_ITERATIONS};
use crate::distance::{dot_product, euclidean_distance_squared, squared_norm};
use crate::error::BuildError;
use crate::kmeans::KMeans;
use crate::types::Dimension;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Training parameters for [`AnisotropicQuantizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizerParams {
    /// Dimensions covered by one block.
    pub dimensions_per_block: usize,
    /// Anisotropic threshold `T` in `[0, 1)`.
    pub anisotropic_threshold: f32,
    /// k-means iterations per block codebook.
    pub iterations: usize,
    /// Base seed; block `b` trains with `seed + b`.
    pub seed: u64,
}

impl Default for QuantizerParams {
    fn default() -> Self {
        Self {
            dimensions_per_block: crate::constants::index::DIMENSIONS_PER_BLOCK,
            anisotropic_threshold: crate::constants::index::ANISOTROPIC_QUANTIZATION_THRESHOLD,
            iterations: KMEANS_ITERATIONS,
            seed: crate::constants::index::DEFAULT_SEED,
        }
    }
}

/// Per-block quantizer with anisotropic code assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnisotropicQuantizer {
    /// Original vector dimension.
    dim: usize,
    /// Dimensions per block (the last block may be narrower).
    block_width: usize,
    /// Codewords per block, at most 16.
    num_codewords: usize,
    /// Ratio of parallel to orthogonal error cost.
    eta: f32,
    /// One flat codebook per block: `num_codewords` rows of the block width.
    codebooks: Vec<Vec<f32>>,
}

/// Pack two 4-bit codes into a single byte.
///
/// The first code occupies the lower 4 bits, the second code the upper 4 bits.
#[inline(always)]
pub fn pack_codes_4bit(a: u8, b: u8) -> u8 {
    (a & 0x0F) | ((b & 0x0F) << 4)
}

/// Read the code of block `block` from a packed code string.
#[inline(always)]
pub fn code_at(packed: &[u8], block: usize) -> u8 {
    let byte = packed[block / 2];
    if block % 2 == 0 {
        byte & 0x0F
    } else {
        byte >> 4
    }
}

/// Cost ratio `η = h_par / h_perp` for a unit-norm datapoint of dimension
/// `dim` and threshold `threshold`.
pub fn parallel_cost_ratio(threshold: f32, dim: usize) -> f32 {
    if threshold <= 0.0 || dim < 2 {
        return 1.0;
    }
    let t2 = threshold * threshold;
    (dim as f32 - 1.0) * t2 / (1.0 - t2)
}

impl AnisotropicQuantizer {
    /// Train codebooks on residuals.
    ///
    /// # Errors
    /// Returns [`BuildError::InvalidParameter`] for a zero block width, a
    /// threshold outside `[0, 1)`, or residuals of inconsistent dimension.
    pub fn train<R: AsRef<[f32]> + Sync>(
        residuals: &[R],
        params: &QuantizerParams,
    ) -> Result<Self, BuildError> {
        if params.dimensions_per_block == 0 {
            return Err(BuildError::invalid_parameter(
                "dimensions_per_block must be at least 1",
            ));
        }
        if !(0.0..1.0).contains(&params.anisotropic_threshold) {
            return Err(BuildError::invalid_parameter(format!(
                "anisotropic_quantization_threshold must be in [0, 1), got {}",
                params.anisotropic_threshold
            )));
        }
        let dim = residuals
            .first()
            .map(|r| r.as_ref().len())
            .ok_or(BuildError::EmptyMatrix)?;
        if residuals.iter().any(|r| r.as_ref().len() != dim) {
            return Err(BuildError::invalid_parameter(
                "residuals must share one dimension",
            ));
        }

        let block_width = params.dimensions_per_block.min(dim.max(1));
        let num_blocks = Dimension::new(dim).num_blocks(block_width);
        let num_codewords = CODEWORDS_PER_BLOCK.min(residuals.len());

        // Train codebooks in parallel for each block
        let codebooks: Vec<Vec<f32>> = (0..num_blocks)
            .into_par_iter()
            .map(|b| {
                let range = block_range(b, block_width, dim);
                let sub: Vec<&[f32]> = residuals.iter().map(|r| &r.as_ref()[range.clone()]).collect();

                let mut kmeans = KMeans::new(num_codewords, params.iterations)
                    .with_seed(params.seed.wrapping_add(b as u64));
                kmeans.fit(&sub);

                let mut flat = Vec::with_capacity(num_codewords * range.len());
                for centroid in &kmeans.centroids {
                    flat.extend_from_slice(centroid);
                }
                flat
            })
            .collect();

        Ok(Self {
            dim,
            block_width,
            num_codewords,
            eta: parallel_cost_ratio(params.anisotropic_threshold, dim),
            codebooks,
        })
    }

    /// Number of blocks per vector.
    pub fn num_blocks(&self) -> usize {
        self.codebooks.len()
    }

    /// Bytes of packed code per vector.
    pub fn code_bytes(&self) -> usize {
        self.num_blocks().div_ceil(2)
    }

    /// Codewords per block.
    pub fn num_codewords(&self) -> usize {
        self.num_codewords
    }

    /// Ratio of parallel to orthogonal error cost used during encoding.
    pub fn eta(&self) -> f32 {
        self.eta
    }

    /// Vector dimension this quantizer was trained for.
    pub fn dimension(&self) -> usize {
        self.dim
    }

    #[inline]
    fn codeword(&self, block: usize, code: usize) -> &[f32] {
        let width = block_range(block, self.block_width, self.dim).len();
        &self.codebooks[block][code * width..(code + 1) * width]
    }

    /// Encode a residual into packed 4-bit codes.
    ///
    /// `datapoint` is the original (unit-norm) vector the residual belongs to;
    /// it defines the direction along which quantization error is penalized.
    pub fn encode(&self, residual: &[f32], datapoint: &[f32]) -> Vec<u8> {
        let codes = self.assign_codes(residual, datapoint);
        codes
            .chunks(2)
            .map(|pair| pack_codes_4bit(pair[0], pair.get(1).copied().unwrap_or(0)))
            .collect()
    }

    /// Choose one code per block.
    ///
    /// Starts from the nearest codeword of each block, then sweeps the blocks
    /// re-choosing each code to minimize the anisotropic loss while holding
    /// the others fixed.
    fn assign_codes(&self, residual: &[f32], datapoint: &[f32]) -> Vec<u8> {
        let num_blocks = self.num_blocks();
        let mut codes: Vec<u8> = (0..num_blocks)
            .map(|b| {
                let range = block_range(b, self.block_width, self.dim);
                let sub = &residual[range.clone()];
                let mut best = 0;
                let mut best_dist = f32::INFINITY;
                for j in 0..self.num_codewords {
                    let dist = euclidean_distance_squared(sub, self.codeword(b, j));
                    if dist < best_dist {
                        best_dist = dist;
                        best = j;
                    }
                }
                best as u8
            })
            .collect();

        let x_norm_sq = squared_norm(datapoint);
        if (self.eta - 1.0).abs() < f32::EPSILON || x_norm_sq == 0.0 {
            return codes;
        }
        let parallel_weight = (self.eta - 1.0) / x_norm_sq;

        // Per-block error e_b = r_b - c_b, its squared norm and projection on x_b.
        let mut block_err_sq = vec![0.0f32; num_blocks];
        let mut block_proj = vec![0.0f32; num_blocks];
        let mut scratch = vec![0.0f32; self.block_width];
        for b in 0..num_blocks {
            let range = block_range(b, self.block_width, self.dim);
            let (err_sq, proj) = block_error(
                &residual[range.clone()],
                self.codeword(b, codes[b] as usize),
                &datapoint[range],
                &mut scratch,
            );
            block_err_sq[b] = err_sq;
            block_proj[b] = proj;
        }
        let mut total_err_sq: f32 = block_err_sq.iter().sum();
        let mut total_proj: f32 = block_proj.iter().sum();

        for _sweep in 0..ASSIGNMENT_SWEEPS {
            let mut changed = false;
            for b in 0..num_blocks {
                let range = block_range(b, self.block_width, self.dim);
                let rest_err_sq = total_err_sq - block_err_sq[b];
                let rest_proj = total_proj - block_proj[b];

                let mut best = (codes[b], block_err_sq[b], block_proj[b]);
                let mut best_loss = {
                    let p = rest_proj + block_proj[b];
                    rest_err_sq + block_err_sq[b] + parallel_weight * p * p
                };
                for j in 0..self.num_codewords {
                    if j == codes[b] as usize {
                        continue;
                    }
                    let (err_sq, proj) = block_error(
                        &residual[range.clone()],
                        self.codeword(b, j),
                        &datapoint[range.clone()],
                        &mut scratch,
                    );
                    let p = rest_proj + proj;
                    let loss = rest_err_sq + err_sq + parallel_weight * p * p;
                    if loss < best_loss {
                        best_loss = loss;
                        best = (j as u8, err_sq, proj);
                    }
                }

                if best.0 != codes[b] {
                    changed = true;
                    codes[b] = best.0;
                    total_err_sq = rest_err_sq + best.1;
                    total_proj = rest_proj + best.2;
                    block_err_sq[b] = best.1;
                    block_proj[b] = best.2;
                }
            }
            if !changed {
                break;
            }
        }

        codes
    }

    /// Reconstruct the approximate residual from packed codes.
    pub fn decode(&self, packed: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dim);
        for b in 0..self.num_blocks() {
            out.extend_from_slice(self.codeword(b, code_at(packed, b) as usize));
        }
        out
    }

    /// Build a lookup table for asymmetric scoring.
    ///
    /// Layout: `[block0: num_codewords floats][block1: ...]...`, where
    /// `table[b * num_codewords + j]` is the inner product of query block `b`
    /// with codeword `j` of that block.
    pub fn build_lookup_table(&self, query: &[f32]) -> Vec<f32> {
        let mut table = Vec::with_capacity(self.num_blocks() * self.num_codewords);
        for b in 0..self.num_blocks() {
            let range = block_range(b, self.block_width, self.dim);
            let query_sub = &query[range];
            for j in 0..self.num_codewords {
                table.push(dot_product(query_sub, self.codeword(b, j)));
            }
        }
        table
    }

    /// Approximate inner product between the query and an encoded residual.
    #[inline]
    pub fn score(&self, table: &[f32], packed: &[u8]) -> f32 {
        let stride = self.num_codewords;
        let mut sum = 0.0f32;
        for b in 0..self.num_blocks() {
            sum += table[b * stride + code_at(packed, b) as usize];
        }
        sum
    }

    /// Nearest codeword index in block `b`, used by tests to check encoding.
    #[cfg(test)]
    fn nearest_code(&self, b: usize, sub: &[f32]) -> usize {
        let width = block_range(b, self.block_width, self.dim).len();
        let words: Vec<Vec<f32>> = self.codebooks[b].chunks(width).map(|c| c.to_vec()).collect();
        crate::kmeans::nearest_centroid(&words, sub)
    }
}

/// Dimensions covered by block `b`.
#[inline]
fn block_range(b: usize, width: usize, dim: usize) -> Range<usize> {
    let start = b * width;
    start..(start + width).min(dim)
}

/// Squared norm and projection onto `x` of `r - c`.
#[inline]
fn block_error(r: &[f32], c: &[f32], x: &[f32], scratch: &mut [f32]) -> (f32, f32) {
    let e = &mut scratch[..r.len()];
    for ((e, r), c) in e.iter_mut().zip(r).zip(c) {
        *e = r - c;
    }
    (squared_norm(e), dot_product(e, x))
}
