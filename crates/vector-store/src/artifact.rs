use crate::error::{Result, VectorStoreError};
use crate::flat_index::FlatIndex;
use buildrag_record_store::BuildRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const METADATA_SCHEMA_VERSION: u32 = 1;

const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

const VECTORS_MAGIC: [u8; 4] = *b"BRVX";
const VECTORS_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMetadata {
    schema_version: u32,
    embedding_model: String,
    dimension: usize,
    count: usize,
    built_at_unix_ms: u64,
    /// Hex SHA-256 of vectors.bin; binds the two files into one logical
    /// artifact version.
    vectors_sha256: String,
    records: Vec<BuildRecord>,
}

/// The persisted retrieval artifact: a vector index and its positionally
/// aligned metadata array, produced in one pass from the same ordered
/// record sequence.
///
/// Both halves are replaced wholesale on every rebuild. Writes go through
/// a staging directory and are renamed into place, so a reader never
/// observes an index from one snapshot paired with metadata from another.
#[derive(Debug)]
pub struct IndexArtifact {
    records: Vec<BuildRecord>,
    index: FlatIndex,
    embedding_model: String,
}

impl IndexArtifact {
    #[must_use]
    pub fn new(embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            records: Vec::new(),
            index: FlatIndex::new(dimension),
            embedding_model: embedding_model.into(),
        }
    }

    /// Appends a record and its embedding together, keeping position *i*
    /// in the metadata array aligned with vector *i* in the index.
    pub fn push(&mut self, record: BuildRecord, vector: &[f32]) -> Result<()> {
        self.index.push(vector)?;
        self.records.push(record);
        Ok(())
    }

    /// Alignment invariant: one metadata entry per vector.
    pub fn validate(&self) -> Result<()> {
        if self.records.len() != self.index.len() {
            return Err(VectorStoreError::ArtifactInconsistency(format!(
                "metadata has {} records but index has {} vectors",
                self.records.len(),
                self.index.len()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[BuildRecord] {
        &self.records
    }

    #[must_use]
    pub fn record_at(&self, position: usize) -> Option<&BuildRecord> {
        self.records.get(position)
    }

    #[must_use]
    pub const fn index(&self) -> &FlatIndex {
        &self.index
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Persists the artifact under `dir`, staging both files in a
    /// transaction directory and renaming them into place.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let dir = dir.as_ref();

        let vector_bytes = encode_vectors(&self.index);
        let checksum = hex_sha256(&vector_bytes);

        let metadata = PersistedMetadata {
            schema_version: METADATA_SCHEMA_VERSION,
            embedding_model: self.embedding_model.clone(),
            dimension: self.index.dimension(),
            count: self.records.len(),
            built_at_unix_ms: unix_ms_now(),
            vectors_sha256: checksum,
            records: self.records.clone(),
        };
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;

        let staging = staging_dir(dir);
        tokio::fs::create_dir_all(&staging).await?;

        let staged_vectors = staging.join(VECTORS_FILE);
        let staged_metadata = staging.join(METADATA_FILE);
        tokio::fs::write(&staged_vectors, &vector_bytes).await?;
        tokio::fs::write(&staged_metadata, &metadata_bytes).await?;

        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::rename(&staged_vectors, dir.join(VECTORS_FILE)).await?;
        tokio::fs::rename(&staged_metadata, dir.join(METADATA_FILE)).await?;
        let _ = tokio::fs::remove_dir_all(&staging).await;

        log::info!(
            "Saved index artifact ({} records, dim {}) to {}",
            self.records.len(),
            self.index.dimension(),
            dir.display()
        );
        Ok(())
    }

    /// Loads and validates the artifact. Refuses to serve on a schema or
    /// checksum mismatch, on misaligned element counts, and when the
    /// artifact was built with a different embedding model than
    /// `expected_model`.
    pub async fn load(dir: impl AsRef<Path>, expected_model: &str) -> Result<Self> {
        let dir = dir.as_ref();

        let metadata_bytes = tokio::fs::read(dir.join(METADATA_FILE)).await?;
        let metadata: PersistedMetadata = serde_json::from_slice(&metadata_bytes)?;

        if metadata.schema_version != METADATA_SCHEMA_VERSION {
            return Err(VectorStoreError::ArtifactInconsistency(format!(
                "unsupported metadata schema_version {} (expected {METADATA_SCHEMA_VERSION})",
                metadata.schema_version
            )));
        }
        if metadata.embedding_model != expected_model {
            return Err(VectorStoreError::ModelMismatch {
                indexed: metadata.embedding_model,
                loaded: expected_model.to_string(),
            });
        }

        let vector_bytes = tokio::fs::read(dir.join(VECTORS_FILE)).await?;
        if hex_sha256(&vector_bytes) != metadata.vectors_sha256 {
            return Err(VectorStoreError::ArtifactInconsistency(
                "vectors.bin checksum does not match metadata".to_string(),
            ));
        }

        let index = decode_vectors(&vector_bytes)?;
        if index.dimension() != metadata.dimension {
            return Err(VectorStoreError::ArtifactInconsistency(format!(
                "vector file dimension {} does not match metadata dimension {}",
                index.dimension(),
                metadata.dimension
            )));
        }
        if index.len() != metadata.count || metadata.records.len() != metadata.count {
            return Err(VectorStoreError::ArtifactInconsistency(format!(
                "element counts diverge: {} vectors, {} records, {} declared",
                index.len(),
                metadata.records.len(),
                metadata.count
            )));
        }

        log::info!(
            "Loaded index artifact ({} records, model '{}') from {}",
            metadata.count,
            metadata.embedding_model,
            dir.display()
        );

        Ok(Self {
            records: metadata.records,
            index,
            embedding_model: metadata.embedding_model,
        })
    }
}

fn staging_dir(dir: &Path) -> PathBuf {
    dir.join(".staging")
        .join(format!("tx-{}-{}", unix_ms_now(), std::process::id()))
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(u64::MAX)
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Layout: magic (4) | format version (u32 LE) | dimension (u32 LE) |
/// count (u64 LE) | count * dimension f32 LE.
fn encode_vectors(index: &FlatIndex) -> Vec<u8> {
    let data = index.as_flat();
    let mut out = Vec::with_capacity(20 + data.len() * 4);
    out.extend_from_slice(&VECTORS_MAGIC);
    out.extend_from_slice(&VECTORS_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&u32::try_from(index.dimension()).unwrap_or(u32::MAX).to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for value in data {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_vectors(bytes: &[u8]) -> Result<FlatIndex> {
    if bytes.len() < 20 {
        return Err(VectorStoreError::ArtifactInconsistency(
            "vectors.bin is truncated".to_string(),
        ));
    }
    if bytes[0..4] != VECTORS_MAGIC {
        return Err(VectorStoreError::ArtifactInconsistency(
            "vectors.bin has an unrecognized magic header".to_string(),
        ));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VECTORS_FORMAT_VERSION {
        return Err(VectorStoreError::ArtifactInconsistency(format!(
            "unsupported vectors.bin format version {version} (expected {VECTORS_FORMAT_VERSION})"
        )));
    }

    let dimension =
        u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let count = u64::from_le_bytes([
        bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19],
    ]) as usize;

    let payload = &bytes[20..];
    let expected_len = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            VectorStoreError::ArtifactInconsistency("vectors.bin header overflows".to_string())
        })?;
    if payload.len() != expected_len {
        return Err(VectorStoreError::ArtifactInconsistency(format!(
            "vectors.bin payload is {} bytes, header declares {expected_len}",
            payload.len()
        )));
    }

    let mut data = Vec::with_capacity(count * dimension);
    for chunk in payload.chunks_exact(4) {
        data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    if dimension == 0 {
        // An empty artifact still records the embedding dimension in its
        // metadata; a zero dimension in the binary header is corruption.
        return Err(VectorStoreError::ArtifactInconsistency(
            "vectors.bin declares dimension 0".to_string(),
        ));
    }

    FlatIndex::from_flat(dimension, data)
}
