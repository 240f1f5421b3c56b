//! Loading sharded embedding exports into a normalized corpus.
//!
//! A source pattern names one file, a directory of shards, or a glob over
//! file names (`exports/embeddings-*.csv`). Shards are read in lexicographic
//! path order and each holds one record per line, either as CSV
//! (`identifier,f1,f2,...`) or as JSON lines
//! (`{"identifier": "...", "embedding": [...]}`).
//!
//! Records that share an identifier are combined with the configured
//! [`Reduction`] before normalization, and the vocabulary lists identifiers
//! in first-seen order. The source files are never written.

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::vector::{normalized, EmbeddingMatrix};
use crate::vocabulary::Vocabulary;
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifier column names accepted in a CSV header line.
const HEADER_NAMES: [&str; 3] = ["identifier", "item_Id", "id"];

/// How records that share an identifier are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Element-wise sum of all records, independent of record order.
    #[default]
    Sum,
    /// Keep the vector of the last record read.
    LastWriteWins,
    /// Fail with [`LoadError::DuplicateIdentifier`].
    Reject,
}

/// A single `(identifier, vector)` pair as read from a shard.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Item identifier.
    pub identifier: String,
    /// Raw (unnormalized) embedding.
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    /// Create a new record.
    pub fn new(identifier: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            identifier: identifier.into(),
            vector,
        }
    }
}

/// Vocabulary plus row-aligned matrix of unit-norm embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    /// Identifiers in row order.
    pub vocabulary: Vocabulary,
    /// L2-normalized embeddings, one row per identifier.
    pub matrix: EmbeddingMatrix,
}

impl Corpus {
    /// Return the number of rows.
    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    /// Return true if the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Return the embedding dimension.
    pub fn dimension(&self) -> usize {
        self.matrix.dimension()
    }
}

/// Reads embedding shards and produces a [`Corpus`].
#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    reduction: Reduction,
}

impl VectorStore {
    /// Create a store with the given duplicate reduction.
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Create a store from the `loader` settings section.
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.reduction)
    }

    /// Return the duplicate reduction in use.
    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Load every shard matched by `pattern`.
    ///
    /// # Errors
    /// Returns [`LoadError`] when no shard matches, a shard cannot be read, a
    /// record is malformed, dimensions disagree, a duplicate is rejected, or
    /// a reduced vector has zero norm.
    pub fn load(&self, pattern: impl AsRef<Path>) -> Result<Corpus, LoadError> {
        let pattern = pattern.as_ref();
        let shards = resolve_shards(pattern)?;
        info!(
            pattern = %pattern.display(),
            shards = shards.len(),
            "loading embeddings"
        );

        let mut reducer = Reducer::new(self.reduction);
        for shard in &shards {
            let before = reducer.records;
            read_shard(shard, &mut reducer)?;
            debug!(
                shard = %shard.display(),
                records = reducer.records - before,
                "read shard"
            );
        }

        let corpus = reducer.finish()?;
        info!(
            rows = corpus.len(),
            dimension = corpus.dimension(),
            "loaded embeddings"
        );
        Ok(corpus)
    }

    /// Build a corpus from in-memory records.
    ///
    /// Applies the same dimension checks, reduction and normalization as
    /// [`VectorStore::load`].
    pub fn from_records<I>(&self, records: I) -> Result<Corpus, LoadError>
    where
        I: IntoIterator<Item = EmbeddingRecord>,
    {
        let mut reducer = Reducer::new(self.reduction);
        for record in records {
            if record.vector.iter().any(|x| !x.is_finite()) {
                return Err(LoadError::malformed(
                    "<memory>",
                    reducer.records + 1,
                    format!("non-finite component for '{}'", record.identifier),
                ));
            }
            reducer.add(record)?;
        }
        reducer.finish()
    }
}

/// Expand a source pattern into the sorted list of shard paths.
pub fn resolve_shards(pattern: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let no_shards = || LoadError::NoShards {
        pattern: pattern.display().to_string(),
    };

    if pattern.is_file() {
        return Ok(vec![pattern.to_path_buf()]);
    }

    let (dir, matcher) = if pattern.is_dir() {
        (pattern.to_path_buf(), None)
    } else {
        let name = pattern
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(no_shards)?;
        let glob = Glob::new(name).map_err(|e| LoadError::InvalidPattern {
            pattern: pattern.display().to_string(),
            reason: e.to_string(),
        })?;
        let dir = match pattern.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (dir, Some(glob.compile_matcher()))
    };

    if !dir.is_dir() {
        return Err(no_shards());
    }
    let entries = fs::read_dir(&dir).map_err(|e| LoadError::io(&dir, e))?;

    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LoadError::io(&dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let keep = match &matcher {
            Some(m) => m.is_match(name),
            None => !name.starts_with('.'),
        };
        if keep {
            shards.push(path);
        }
    }

    if shards.is_empty() {
        return Err(no_shards());
    }
    shards.sort();
    Ok(shards)
}

/// Structured record layout of JSON-lines shards.
#[derive(Deserialize)]
struct JsonRecord {
    #[serde(alias = "item_Id", alias = "id")]
    identifier: Option<String>,
    embedding: Option<Vec<f32>>,
}

fn is_json_lines(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "jsonl" | "ndjson")
    )
}

fn read_shard(path: &Path, reducer: &mut Reducer) -> Result<(), LoadError> {
    let text = fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
    let json = is_json_lines(path);

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = if json {
            parse_json_line(path, line_no, line)?
        } else {
            match parse_csv_line(path, line_no, line)? {
                Some(record) => record,
                None => continue,
            }
        };
        reducer.add(record)?;
    }
    Ok(())
}

/// Parse `identifier,f1,f2,...`. Returns `None` for a header on line 1.
///
/// Line 1 is a header only when it starts with a known column name and the
/// remaining fields are not all numbers, so an item named `id` still loads.
fn parse_csv_line(
    path: &Path,
    line_no: usize,
    line: &str,
) -> Result<Option<EmbeddingRecord>, LoadError> {
    let mut fields = line.split(',').map(str::trim);
    let identifier = fields.next().unwrap_or_default();
    if identifier.is_empty() {
        return Err(LoadError::malformed(path, line_no, "missing identifier"));
    }
    if line_no == 1 && HEADER_NAMES.contains(&identifier) && !is_numeric_row(fields.clone()) {
        return Ok(None);
    }

    let vector = fields
        .map(|field| {
            field.parse::<f32>().map_err(|_| {
                LoadError::malformed(path, line_no, format!("unparsable component '{field}'"))
            })
        })
        .collect::<Result<Vec<f32>, _>>()?;

    check_components(path, line_no, &vector)?;
    Ok(Some(EmbeddingRecord::new(identifier, vector)))
}

fn is_numeric_row<'a>(mut fields: impl Iterator<Item = &'a str>) -> bool {
    let mut any = false;
    let all = fields.all(|field| {
        any = true;
        field.parse::<f32>().is_ok()
    });
    any && all
}

fn parse_json_line(path: &Path, line_no: usize, line: &str) -> Result<EmbeddingRecord, LoadError> {
    let record: JsonRecord = serde_json::from_str(line)
        .map_err(|e| LoadError::malformed(path, line_no, e.to_string()))?;
    let identifier = record
        .identifier
        .filter(|id| !id.is_empty())
        .ok_or_else(|| LoadError::malformed(path, line_no, "missing identifier"))?;
    let vector = record.embedding.unwrap_or_default();
    check_components(path, line_no, &vector)?;
    Ok(EmbeddingRecord::new(identifier, vector))
}

fn check_components(path: &Path, line_no: usize, vector: &[f32]) -> Result<(), LoadError> {
    if vector.is_empty() {
        return Err(LoadError::malformed(path, line_no, "missing vector components"));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(LoadError::malformed(path, line_no, "non-finite component"));
    }
    Ok(())
}

/// Accumulates records keyed by identifier in first-seen order.
struct Reducer {
    reduction: Reduction,
    dim: Option<usize>,
    order: Vec<String>,
    positions: HashMap<String, usize>,
    sums: Vec<Vec<f64>>,
    records: usize,
}

impl Reducer {
    fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            dim: None,
            order: Vec::new(),
            positions: HashMap::new(),
            sums: Vec::new(),
            records: 0,
        }
    }

    fn add(&mut self, record: EmbeddingRecord) -> Result<(), LoadError> {
        let expected = *self.dim.get_or_insert(record.vector.len());
        if record.vector.len() != expected {
            return Err(LoadError::DimensionMismatch {
                identifier: record.identifier,
                expected,
                actual: record.vector.len(),
            });
        }
        if expected == 0 {
            return Err(LoadError::ZeroVector(record.identifier));
        }
        self.records += 1;

        let values = record.vector.iter().map(|&x| f64::from(x));
        match self.positions.get(&record.identifier) {
            None => {
                self.positions
                    .insert(record.identifier.clone(), self.sums.len());
                self.order.push(record.identifier);
                self.sums.push(values.collect());
            }
            Some(&pos) => match self.reduction {
                Reduction::Sum => {
                    for (acc, x) in self.sums[pos].iter_mut().zip(values) {
                        *acc += x;
                    }
                }
                Reduction::LastWriteWins => {
                    self.sums[pos] = values.collect();
                }
                Reduction::Reject => {
                    return Err(LoadError::DuplicateIdentifier(record.identifier));
                }
            },
        }
        Ok(())
    }

    fn finish(self) -> Result<Corpus, LoadError> {
        let dim = self.dim.unwrap_or(0);
        let duplicates = self.records - self.order.len();
        if duplicates > 0 {
            debug!(
                duplicates,
                reduction = ?self.reduction,
                "combined duplicate identifiers"
            );
        }

        let mut vocabulary = Vocabulary::new();
        let mut matrix = EmbeddingMatrix::with_capacity(dim, self.order.len());
        let mut row = Vec::with_capacity(dim);
        for (identifier, sum) in self.order.into_iter().zip(self.sums) {
            // Summed duplicates may exceed f32 range; rescale before narrowing.
            let max = sum.iter().fold(0.0f64, |m, x| m.max(x.abs()));
            row.clear();
            if max > 0.0 {
                row.extend(sum.iter().map(|&x| (x / max) as f32));
            } else {
                row.extend(sum.iter().map(|&x| x as f32));
            }
            let unit = normalized(&row).ok_or_else(|| LoadError::ZeroVector(identifier.clone()))?;
            matrix.push_row(&unit);
            vocabulary.push_new(identifier);
        }
        Ok(Corpus { vocabulary, matrix })
    }
}
