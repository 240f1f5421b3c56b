//! File header shared by both index artifacts.

use crate::error::PersistenceError;

/// Magic bytes identifying an item-matcher artifact: "ITMATCH\0"
pub const MAGIC: [u8; 8] = *b"ITMATCH\0";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Artifact kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArtifactKind {
    /// Serialized tree-AH index
    Index = 1,
    /// Ordered identifier list
    Vocabulary = 2,
}

impl ArtifactKind {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Index),
            2 => Some(Self::Vocabulary),
            _ => None,
        }
    }

    /// Name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Vocabulary => "vocabulary",
        }
    }
}

/// File header structure.
///
/// Total size: 24 bytes
/// ```text
/// [MAGIC 8B][VERSION u32][KIND u32][RESERVED u32][CHECKSUM u32]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version
    pub version: u32,
    /// Artifact kind
    pub kind: ArtifactKind,
    /// CRC32 checksum of the data section (everything after header)
    pub checksum: u32,
}

impl FileHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 24;

    /// Create a new header.
    pub fn new(kind: ArtifactKind, checksum: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            kind,
            checksum,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&(self.kind as u32).to_le_bytes());
        bytes[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        if bytes.len() < Self::SIZE {
            return Err(PersistenceError::invalid_format("header too small"));
        }
        if bytes[0..8] != MAGIC {
            return Err(PersistenceError::invalid_format("invalid magic bytes"));
        }

        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let version = word(8);
        let kind = ArtifactKind::from_u32(word(12))
            .ok_or_else(|| PersistenceError::invalid_format("unknown artifact kind"))?;

        Ok(Self {
            version,
            kind,
            checksum: word(20),
        })
    }

    /// Verify the header is supported and of the expected kind.
    pub fn verify(&self, expected: ArtifactKind) -> Result<(), PersistenceError> {
        if self.version > FORMAT_VERSION {
            return Err(PersistenceError::invalid_format(format!(
                "unsupported version {} (max supported: {})",
                self.version, FORMAT_VERSION
            )));
        }

        if self.kind != expected {
            return Err(PersistenceError::invalid_format(format!(
                "artifact kind mismatch: expected {:?}, got {:?}",
                expected, self.kind
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader::new(ArtifactKind::Index, 0x12345678);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..8], b"ITMATCH\0");

        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = [0u8; FileHeader::SIZE];
        bytes[0..8].copy_from_slice(b"INVALID\0");
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = FileHeader::new(ArtifactKind::Index, 0).to_bytes();
        bytes[12] = 9;
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_verify() {
        let header = FileHeader::new(ArtifactKind::Index, 0);
        assert!(header.verify(ArtifactKind::Index).is_ok());
        assert!(header.verify(ArtifactKind::Vocabulary).is_err());

        let future = FileHeader {
            version: FORMAT_VERSION + 1,
            ..header
        };
        assert!(future.verify(ArtifactKind::Index).is_err());
    }

    #[test]
    fn test_kind_from_u32() {
        assert_eq!(ArtifactKind::from_u32(1), Some(ArtifactKind::Index));
        assert_eq!(ArtifactKind::from_u32(2), Some(ArtifactKind::Vocabulary));
        assert_eq!(ArtifactKind::from_u32(99), None);
    }
}
