//! Saving and loading an index directory.
//!
//! An index directory holds two co-located artifacts, each with a
//! checksummed header:
//!
//! ```text
//! index.bin    [HEADER 24B][bincode { vocabulary_len, vocabulary_crc, index }]
//! vocabulary   [HEADER 24B][COUNT u64]([LEN u32][UTF-8])*
//! ```
//!
//! The index artifact records the length and CRC32 fingerprint of the
//! vocabulary it was built against, so a directory whose two files come from
//! different builds is rejected instead of silently returning the wrong
//! identifiers. Each file is written to a temporary name and renamed into
//! place.
//!
//! # Example
//!
//! ```ignore
//! use item_matcher::persistence;
//!
//! persistence::save(&index, &corpus.vocabulary, "models/v3")?;
//! let (index, vocabulary) = persistence::load("models/v3")?;
//! ```

mod format;
pub mod vocabulary;

pub use format::{ArtifactKind, FileHeader, FORMAT_VERSION, MAGIC};

use crate::error::PersistenceError;
use crate::index::{ApproximateMatcher, TreeAhIndex};
use crate::vocabulary::Vocabulary;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the serialized index.
pub const INDEX_FILE: &str = "index.bin";

/// File name of the vocabulary sidecar.
pub const VOCABULARY_FILE: &str = "vocabulary";

#[derive(Serialize)]
struct IndexArtifactRef<'a> {
    vocabulary_len: u64,
    vocabulary_fingerprint: u32,
    index: &'a TreeAhIndex,
}

#[derive(Deserialize)]
struct IndexArtifact {
    vocabulary_len: u64,
    vocabulary_fingerprint: u32,
    index: TreeAhIndex,
}

/// Everything read from an index directory.
#[derive(Debug)]
pub struct Artifacts {
    /// The loaded index.
    pub index: TreeAhIndex,
    /// The vocabulary aligned with the index rows.
    pub vocabulary: Vocabulary,
    /// CRC32 of the index artifact's data section; identifies the build.
    pub checksum: u32,
}

impl Artifacts {
    /// Pair the index with its vocabulary for matching.
    pub fn into_matcher(self) -> Result<ApproximateMatcher, PersistenceError> {
        ApproximateMatcher::new(self.index, self.vocabulary)
    }
}

/// Write `index` and `vocabulary` into `dir`, creating it if needed.
///
/// # Errors
/// Returns [`PersistenceError::VocabularyMismatch`] if the vocabulary does
/// not have one entry per indexed row, or an I/O or serialization error.
pub fn save(
    index: &TreeAhIndex,
    vocabulary: &Vocabulary,
    dir: impl AsRef<Path>,
) -> Result<(), PersistenceError> {
    let dir = dir.as_ref();
    if index.len() != vocabulary.len() {
        return Err(PersistenceError::vocabulary_mismatch(format!(
            "index has {} rows, vocabulary has {} identifiers",
            index.len(),
            vocabulary.len()
        )));
    }
    fs::create_dir_all(dir)?;

    let payload = bincode::serialize(&IndexArtifactRef {
        vocabulary_len: vocabulary.len() as u64,
        vocabulary_fingerprint: vocabulary.fingerprint(),
        index,
    })?;
    let vocab_bytes = vocabulary::encode(vocabulary);

    write_with_header(&dir.join(VOCABULARY_FILE), ArtifactKind::Vocabulary, &vocab_bytes)?;
    write_with_header(&dir.join(INDEX_FILE), ArtifactKind::Index, &payload)?;

    info!(
        dir = %dir.display(),
        rows = index.len(),
        index_bytes = payload.len() + FileHeader::SIZE,
        vocabulary_bytes = vocab_bytes.len() + FileHeader::SIZE,
        "saved index"
    );
    Ok(())
}

/// Read the index and vocabulary from `dir`.
///
/// The loaded index answers every query exactly as the saved one did.
pub fn load(dir: impl AsRef<Path>) -> Result<(TreeAhIndex, Vocabulary), PersistenceError> {
    let artifacts = load_artifacts(dir)?;
    Ok((artifacts.index, artifacts.vocabulary))
}

/// Read the index directory and an identifier for this build.
///
/// # Errors
/// Returns [`PersistenceError`] if an artifact is missing, fails its
/// checksum, cannot be decoded, is internally inconsistent, or the two
/// artifacts do not belong together.
pub fn load_artifacts(dir: impl AsRef<Path>) -> Result<Artifacts, PersistenceError> {
    let dir = dir.as_ref();
    let index_path = dir.join(INDEX_FILE);
    let vocab_path = dir.join(VOCABULARY_FILE);

    let index_bytes = read_artifact(&index_path)?;
    let (checksum, data) = verify_header(&index_bytes, ArtifactKind::Index)?;
    let artifact: IndexArtifact = bincode::deserialize(data)?;
    artifact
        .index
        .check_consistency()
        .map_err(PersistenceError::InvalidFormat)?;
    debug!(path = %index_path.display(), rows = artifact.index.len(), "read index");

    let vocab_bytes = read_artifact(&vocab_path)?;
    let (_, data) = verify_header(&vocab_bytes, ArtifactKind::Vocabulary)?;
    let vocabulary = vocabulary::decode(data)?;

    if vocabulary.len() as u64 != artifact.vocabulary_len
        || vocabulary.fingerprint() != artifact.vocabulary_fingerprint
    {
        return Err(PersistenceError::vocabulary_mismatch(format!(
            "{} was not written with the index in {}",
            vocab_path.display(),
            dir.display()
        )));
    }
    if vocabulary.len() != artifact.index.len() {
        return Err(PersistenceError::vocabulary_mismatch(format!(
            "index has {} rows, vocabulary has {} identifiers",
            artifact.index.len(),
            vocabulary.len()
        )));
    }

    info!(
        dir = %dir.display(),
        rows = vocabulary.len(),
        checksum = format_args!("{checksum:08x}"),
        "loaded index"
    );
    Ok(Artifacts {
        index: artifact.index,
        vocabulary,
        checksum,
    })
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    if !path.is_file() {
        return Err(PersistenceError::MissingArtifact(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// Verify file header and return the checksum and data section.
pub(crate) fn verify_header(
    data: &[u8],
    expected: ArtifactKind,
) -> Result<(u32, &[u8]), PersistenceError> {
    if data.len() < FileHeader::SIZE {
        return Err(PersistenceError::invalid_format(format!(
            "{} file too small for header",
            expected.name()
        )));
    }

    let header = FileHeader::from_bytes(&data[..FileHeader::SIZE])?;
    header.verify(expected)?;

    // Verify checksum of the data section
    let data_section = &data[FileHeader::SIZE..];
    if crc32fast::hash(data_section) != header.checksum {
        return Err(PersistenceError::ChecksumMismatch(expected.name()));
    }

    Ok((header.checksum, data_section))
}

/// Write header and data to a temporary file, then rename it into place.
pub(crate) fn write_with_header(
    path: &Path,
    kind: ArtifactKind,
    data: &[u8],
) -> Result<(), PersistenceError> {
    let header = FileHeader::new(kind, crc32fast::hash(data));
    let tmp = temporary_path(path);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&header.to_bytes())?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
