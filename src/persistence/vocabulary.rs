//! Length-prefixed encoding of the vocabulary sidecar.
//!
//! ```text
//! [COUNT u64]
//! [LEN u32][UTF-8 bytes] x COUNT
//! ```
//!
//! All integers are little-endian. Identifiers appear in row order.

use crate::error::PersistenceError;
use crate::vocabulary::Vocabulary;

/// Encode identifiers in row order.
pub fn encode(vocabulary: &Vocabulary) -> Vec<u8> {
    let payload: usize = vocabulary.iter().map(|t| 4 + t.len()).sum();
    let mut out = Vec::with_capacity(8 + payload);
    out.extend_from_slice(&(vocabulary.len() as u64).to_le_bytes());
    for token in vocabulary.iter() {
        out.extend_from_slice(&(token.len() as u32).to_le_bytes());
        out.extend_from_slice(token.as_bytes());
    }
    out
}

/// Decode a vocabulary written by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Vocabulary, PersistenceError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let count = u64::from_le_bytes(cursor.take_array()?);
    let count = usize::try_from(count)
        .map_err(|_| PersistenceError::invalid_format("vocabulary count overflows"))?;

    let mut tokens = Vec::with_capacity(count.min(bytes.len() / 4));
    for _ in 0..count {
        let len = u32::from_le_bytes(cursor.take_array()?) as usize;
        let raw = cursor.take(len)?;
        let token = std::str::from_utf8(raw)
            .map_err(|_| PersistenceError::invalid_format("identifier is not valid UTF-8"))?;
        tokens.push(token.to_owned());
    }
    if cursor.pos != bytes.len() {
        return Err(PersistenceError::invalid_format(
            "trailing bytes after vocabulary",
        ));
    }

    Vocabulary::from_identifiers(tokens).map_err(|dup| {
        PersistenceError::invalid_format(format!("duplicate identifier '{dup}' in vocabulary"))
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], PersistenceError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| PersistenceError::invalid_format("vocabulary is truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PersistenceError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
