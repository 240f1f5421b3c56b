//! Core newtypes for type-safe index operations.
//!
//! These types provide compile-time guarantees that prevent mixing up
//! related but semantically different values (e.g., row labels vs leaf ids).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal label of an embedding: its row in the matrix and its position in
/// the vocabulary.
///
/// Using a newtype prevents accidentally passing a leaf number where a row
/// label is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RowId(pub u32);

impl RowId {
    /// Create a new RowId.
    #[inline]
    pub const fn new(row: u32) -> Self {
        Self(row)
    }

    /// Get the row as a slice index.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl From<u32> for RowId {
    #[inline]
    fn from(row: u32) -> Self {
        Self(row)
    }
}

impl From<RowId> for u32 {
    #[inline]
    fn from(row: RowId) -> Self {
        row.0
    }
}

/// The dimensionality of embeddings in an index.
///
/// Ensures dimension values are used consistently throughout the codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Dimension(pub usize);

impl Dimension {
    /// Create a new Dimension.
    #[inline]
    pub const fn new(dim: usize) -> Self {
        Self(dim)
    }

    /// Get the raw usize value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Number of quantization blocks of `width` dimensions needed to cover
    /// this dimension. The last block may be narrower.
    #[inline]
    pub fn num_blocks(self, width: usize) -> usize {
        self.0.div_ceil(width)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for Dimension {
    #[inline]
    fn from(dim: usize) -> Self {
        Self(dim)
    }
}

/// The number of leaves of the coarse partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NumLeaves(pub usize);

impl NumLeaves {
    /// Create a new NumLeaves.
    #[inline]
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    /// Default leaf count for a corpus: `round(sqrt(rows))`, at least one.
    pub fn for_rows(rows: usize) -> Self {
        Self(((rows as f64).sqrt().round() as usize).max(1))
    }

    /// Get the raw usize value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for NumLeaves {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for NumLeaves {
    #[inline]
    fn from(n: usize) -> Self {
        Self(n)
    }
}
