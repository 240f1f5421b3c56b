use crate::distance::squared_norm;
use crate::error::QueryError;
use serde::{Deserialize, Serialize};

/// Row-major matrix of embeddings, one row per vocabulary entry.
///
/// Rows are stored contiguously so the exact scan and the re-scoring pass
/// walk memory linearly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    dim: usize,
}

impl EmbeddingMatrix {
    /// Create an empty matrix with the given row width.
    pub fn new(dim: usize) -> Self {
        Self {
            data: Vec::new(),
            dim,
        }
    }

    /// Create an empty matrix with room for `rows` rows.
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            data: Vec::with_capacity(dim * rows),
            dim,
        }
    }

    /// Build a matrix from equally sized rows.
    ///
    /// Returns `None` if the rows disagree on their length.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Option<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut matrix = Self::with_capacity(dim, rows.len());
        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return None;
            }
            matrix.data.extend_from_slice(row);
        }
        Some(matrix)
    }

    /// Append a row. The caller guarantees `row.len() == self.dimension()`.
    pub fn push_row(&mut self, row: &[f32]) {
        debug_assert_eq!(row.len(), self.dim);
        self.data.extend_from_slice(row);
    }

    /// Return row `idx`.
    #[inline]
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Iterate over the rows in order.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Return the flat row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Return the number of rows.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    /// Return true if the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the width of each row.
    pub fn dimension(&self) -> usize {
        self.dim
    }
}

/// Return `v / ||v||_2`, or `None` when `v` is all zeros or has a
/// non-finite component.
///
/// Components are first divided by the largest magnitude so the squared norm
/// neither overflows for large values nor underflows for tiny ones.
pub fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let max = v.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    if max == 0.0 {
        return None;
    }
    let scaled: Vec<f32> = v.iter().map(|x| x / max).collect();
    let norm = squared_norm(&scaled).sqrt();
    Some(scaled.iter().map(|x| x / norm).collect())
}

/// Normalize a query vector for search.
///
/// Normalizing an already unit-length vector is a no-op up to rounding, so
/// callers may pass either raw or normalized queries.
pub fn normalize_query(query: &[f32]) -> Result<Vec<f32>, QueryError> {
    if query.iter().any(|x| !x.is_finite()) {
        return Err(QueryError::NonFinite);
    }
    normalized(query).ok_or(QueryError::ZeroVector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_rows() {
        let m = EmbeddingMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.dimension(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.rows().count(), 2);
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        assert!(EmbeddingMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_none());
    }

    #[test]
    fn test_empty_matrix() {
        let m = EmbeddingMatrix::new(4);
        assert!(m.is_empty());
        assert_eq!(m.rows().count(), 0);
    }

    #[test]
    fn test_normalized() {
        let v = normalized(&[3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(normalized(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_normalize_query_rejects_invalid() {
        assert_eq!(normalize_query(&[0.0, 0.0]), Err(QueryError::ZeroVector));
        assert_eq!(normalize_query(&[f32::NAN, 1.0]), Err(QueryError::NonFinite));
        assert_eq!(normalize_query(&[]), Err(QueryError::ZeroVector));
    }

    #[test]
    fn test_normalized_extreme_magnitudes() {
        for scale in [1e20f32, 1e-25, 1e37, f32::MIN_POSITIVE] {
            let v = normalized(&[3.0 * scale, 4.0 * scale]).unwrap();
            assert!((v[0] - 0.6).abs() < 1e-5, "scale {scale}: {v:?}");
            assert!((v[1] - 0.8).abs() < 1e-5, "scale {scale}: {v:?}");
        }
        assert!(normalize_query(&[1e20, 5e19, 0.0]).is_ok());
        assert!(normalize_query(&[1e-25, 5e-26, 0.0]).is_ok());
        assert!(normalized(&[f32::INFINITY, 1.0]).is_none());
    }

    #[test]
    fn test_normalized_power_of_two_scale_is_exact() {
        let v = [0.3f32, -1.7, 2.2, 0.01];
        let base = normalized(&v).unwrap();
        for exp in [-100, -60, 60, 100] {
            let scaled: Vec<f32> = v.iter().map(|x| x * 2f32.powi(exp)).collect();
            assert_eq!(normalized(&scaled).unwrap(), base);
        }
    }
}
