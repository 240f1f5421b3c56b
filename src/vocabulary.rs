//! Ordered identifier list aligned with matrix rows.
//!
//! Position `i` of the vocabulary names row `i` of the embedding matrix and
//! row label `i` inside the index. Nothing re-orders a vocabulary after it is
//! built; the persisted sidecar stores it in the same order and a checksum of
//! that order is recorded next to the index so a mismatched pair is rejected
//! at load time.

use crate::types::RowId;
use std::collections::HashMap;

/// Ordered, duplicate-free list of item identifiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<String>,
    positions: HashMap<String, RowId>,
}

impl Vocabulary {
    /// Create an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vocabulary from identifiers in row order.
    ///
    /// Returns the first repeated identifier as the error.
    pub fn from_identifiers<I, S>(identifiers: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::new();
        for id in identifiers {
            let id = id.into();
            if vocab.positions.contains_key(&id) {
                return Err(id);
            }
            vocab.push_new(id);
        }
        Ok(vocab)
    }

    /// Append an identifier known not to be present yet.
    pub(crate) fn push_new(&mut self, id: String) -> RowId {
        let row = RowId::new(self.tokens.len() as u32);
        self.positions.insert(id.clone(), row);
        self.tokens.push(id);
        row
    }

    /// Identifier of `row`.
    #[inline]
    pub fn get(&self, row: RowId) -> Option<&str> {
        self.tokens.get(row.as_usize()).map(String::as_str)
    }

    /// Row label of `identifier`.
    #[inline]
    pub fn row_of(&self, identifier: &str) -> Option<RowId> {
        self.positions.get(identifier).copied()
    }

    /// Return the number of identifiers.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Return true if the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate over identifiers in row order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.tokens.iter().map(String::as_str)
    }

    /// CRC32 over the length-prefixed identifiers in row order.
    ///
    /// Two vocabularies share a fingerprint only if they list the same
    /// identifiers in the same order (up to CRC collisions).
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for token in &self.tokens {
            hasher.update(&(token.len() as u32).to_le_bytes());
            hasher.update(token.as_bytes());
        }
        hasher.finalize()
    }
}
