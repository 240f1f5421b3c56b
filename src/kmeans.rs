//! K-Means clustering for leaf partitioning and codebook training.
//!
//! Implements Lloyd's algorithm with k-means++ initialization for
//! high-quality centroid placement. The same routine trains the coarse leaf
//! centroids (over full rows) and the per-block codebooks (over sub-slices of
//! residuals).
//!
//! All randomness comes from a seeded [`StdRng`], so two fits over the same
//! points with the same seed produce identical centroids.

use crate::constants::kmeans::{CONVERGENCE_THRESHOLD, KMEANSPP_THRESHOLD};
use crate::distance::euclidean_distance_squared;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// K-Means clustering algorithm.
///
/// Uses k-means++ initialization for better convergence and
/// parallel assignment steps for performance.
pub struct KMeans {
    /// The computed cluster centroids.
    pub centroids: Vec<Vec<f32>>,
    /// Number of clusters.
    k: usize,
    /// Maximum iterations before stopping.
    max_iters: usize,
    /// RNG seed for initialization.
    seed: u64,
}

impl KMeans {
    /// Create a new K-Means instance.
    ///
    /// # Arguments
    /// * `k` - Number of clusters
    /// * `max_iters` - Maximum iterations for convergence
    pub fn new(k: usize, max_iters: usize) -> Self {
        Self {
            centroids: Vec::new(),
            k,
            max_iters,
            seed: 0,
        }
    }

    /// Set the seed used for centroid initialization.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fit the K-Means model to the given points.
    ///
    /// Initializes centroids using k-means++ and iteratively refines
    /// until convergence or max iterations reached. When there are fewer
    /// points than clusters, `k` is reduced to the number of points.
    pub fn fit<P: AsRef<[f32]> + Sync>(&mut self, points: &[P]) {
        if points.is_empty() || self.k == 0 {
            self.centroids.clear();
            return;
        }

        let k = self.k.min(points.len());
        let dim = points[0].as_ref().len();
        let mut rng = StdRng::seed_from_u64(self.seed);

        // Initialize centroids: random for large k (k-means++ is O(k²n), too slow)
        self.centroids = if k > KMEANSPP_THRESHOLD {
            let mut indices: Vec<usize> = (0..points.len()).collect();
            indices.shuffle(&mut rng);
            indices
                .into_iter()
                .take(k)
                .map(|i| points[i].as_ref().to_vec())
                .collect()
        } else {
            kmeans_plus_plus_init(points, k, &mut rng)
        };

        for _iter in 0..self.max_iters {
            let assignments = self.assign_all(points);
            let new_centroids = self.update_centroids(points, &assignments, dim);
            let change = self.measure_change(&new_centroids);

            self.centroids = new_centroids;

            if change < CONVERGENCE_THRESHOLD {
                break;
            }
        }
    }

    /// Index of the centroid closest (squared L2) to `point`.
    ///
    /// Ties resolve to the lowest centroid index.
    pub fn assign(&self, point: &[f32]) -> usize {
        nearest_centroid(&self.centroids, point)
    }

    /// Assign each point to its nearest centroid.
    ///
    /// Returns a vector of centroid indices, one per input point.
    pub fn assign_all<P: AsRef<[f32]> + Sync>(&self, points: &[P]) -> Vec<usize> {
        points
            .par_iter()
            .map(|p| self.assign(p.as_ref()))
            .collect()
    }

    /// Update centroids to be the mean of assigned points.
    ///
    /// Empty clusters retain their old centroid.
    fn update_centroids<P: AsRef<[f32]>>(
        &self,
        points: &[P],
        assignments: &[usize],
        dim: usize,
    ) -> Vec<Vec<f32>> {
        let k = self.centroids.len();
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];

        for (p, &cluster) in points.iter().zip(assignments) {
            counts[cluster] += 1;
            for (acc, &x) in sums[cluster].iter_mut().zip(p.as_ref()) {
                *acc += x;
            }
        }

        sums.into_iter()
            .zip(counts)
            .enumerate()
            .map(|(c, (mut sum, count))| {
                if count == 0 {
                    return self.centroids[c].clone();
                }
                let count = count as f32;
                for x in &mut sum {
                    *x /= count;
                }
                sum
            })
            .collect()
    }

    /// Measure the average change in centroid positions.
    fn measure_change(&self, new_centroids: &[Vec<f32>]) -> f32 {
        let total: f32 = self
            .centroids
            .iter()
            .zip(new_centroids.iter())
            .map(|(old, new)| euclidean_distance_squared(old, new))
            .sum();

        total / self.centroids.len().max(1) as f32
    }
}

/// Index of the centroid closest to `point`, lowest index on ties.
pub(crate) fn nearest_centroid(centroids: &[Vec<f32>], point: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (idx, c) in centroids.iter().enumerate() {
        let dist = euclidean_distance_squared(point, c);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}

/// Initialize centroids using the k-means++ algorithm.
///
/// Selects initial centroids with probability proportional to
/// squared distance from existing centroids.
fn kmeans_plus_plus_init<P: AsRef<[f32]> + Sync>(
    points: &[P],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let first = rng.gen_range(0..points.len());
    centroids.push(points[first].as_ref().to_vec());

    // Running distance from each point to its nearest chosen centroid.
    let mut distances: Vec<f32> = points
        .par_iter()
        .map(|p| euclidean_distance_squared(p.as_ref(), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = distances.iter().sum();

        let chosen = if total <= 0.0 || !total.is_finite() {
            // Every point sits on a centroid already
            rng.gen_range(0..points.len())
        } else {
            let mut r = rng.gen_range(0.0..total);
            let mut chosen = points.len() - 1;
            for (i, &d) in distances.iter().enumerate() {
                r -= d;
                if r <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = points[chosen].as_ref().to_vec();
        distances
            .par_iter_mut()
            .zip(points.par_iter())
            .for_each(|(d, p)| {
                *d = d.min(euclidean_distance_squared(p.as_ref(), &centroid));
            });
        centroids.push(centroid);
    }

    centroids
}
