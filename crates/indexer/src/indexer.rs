use crate::error::Result;
use buildrag_record_store::RecordStore;
use buildrag_vector_store::{EmbeddingModel, IndexArtifact};
use std::path::PathBuf;
use std::time::Instant;

/// Summary of one index rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub records: usize,
    pub dimension: usize,
    pub elapsed_ms: u64,
}

/// Turns the append-only record store into a searchable artifact.
pub struct CorpusIndexer {
    store: RecordStore,
    artifact_dir: PathBuf,
    embedder: EmbeddingModel,
}

impl CorpusIndexer {
    /// Builds an indexer with the embedding backend resolved from the
    /// environment.
    pub fn new(store: RecordStore, artifact_dir: impl Into<PathBuf>) -> Result<Self> {
        let embedder = EmbeddingModel::from_env()?;
        Ok(Self::with_embedder(store, artifact_dir, embedder))
    }

    pub fn with_embedder(
        store: RecordStore,
        artifact_dir: impl Into<PathBuf>,
        embedder: EmbeddingModel,
    ) -> Self {
        Self {
            store,
            artifact_dir: artifact_dir.into(),
            embedder,
        }
    }

    /// Rebuilds the artifact from scratch and persists it.
    ///
    /// An empty record store still produces a valid, loadable artifact
    /// with zero entries.
    pub async fn build(&self) -> Result<IndexStats> {
        let started = Instant::now();

        let records = self.store.load_all().await?;
        log::info!(
            "Indexing {} build records from {}",
            records.len(),
            self.store.path().display()
        );

        let texts: Vec<&str> = records.iter().map(|r| r.rendered_text.as_str()).collect();
        let vectors = self.embedder.embed_batch(texts).await?;

        let mut artifact =
            IndexArtifact::new(self.embedder.model_id(), self.embedder.dimension());
        for (record, vector) in records.into_iter().zip(vectors.iter()) {
            artifact.push(record, vector)?;
        }
        artifact.validate()?;
        artifact.save(&self.artifact_dir).await?;

        let stats = IndexStats {
            records: artifact.len(),
            dimension: self.embedder.dimension(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        log::info!(
            "Index rebuild complete: {} records, dim {}, {} ms",
            stats.records,
            stats.dimension,
            stats.elapsed_ms
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrag_record_store::{BuildRecord, BuildResult};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(number: u64, result: BuildResult) -> BuildRecord {
        BuildRecord {
            job: "ci".to_string(),
            build_number: number,
            result,
            timestamp: 1_700_000_000_000 + number as i64,
            duration: 900,
            commit_sha: format!("{number:040x}"),
            url: format!("http://ci/job/ci/{number}/"),
            rendered_text: format!("Job: ci\nBuild Number: {number}\nResult: {result}"),
            raw: serde_json::json!({ "number": number }),
        }
    }

    async fn seeded_store(tmp: &TempDir, count: u64) -> RecordStore {
        let store = RecordStore::new(tmp.path().join("builds.jsonl"));
        for i in 1..=count {
            store.append(&record(i, BuildResult::Success)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn build_indexes_every_stored_record_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp, 4).await;
        let artifact_dir = tmp.path().join("index");

        let indexer =
            CorpusIndexer::with_embedder(store, &artifact_dir, EmbeddingModel::stub(16));
        let stats = indexer.build().await.unwrap();
        assert_eq!(stats.records, 4);
        assert_eq!(stats.dimension, 16);

        let artifact = IndexArtifact::load(&artifact_dir, "stub-16").await.unwrap();
        assert_eq!(artifact.len(), 4);
        let numbers: Vec<u64> = artifact.records().iter().map(|r| r.build_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_store_produces_loadable_empty_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path().join("builds.jsonl"));
        let artifact_dir = tmp.path().join("index");

        let indexer =
            CorpusIndexer::with_embedder(store, &artifact_dir, EmbeddingModel::stub(8));
        let stats = indexer.build().await.unwrap();
        assert_eq!(stats.records, 0);

        let artifact = IndexArtifact::load(&artifact_dir, "stub-8").await.unwrap();
        assert!(artifact.is_empty());
    }

    #[tokio::test]
    async fn rebuild_after_new_records_replaces_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp, 2).await;
        let artifact_dir = tmp.path().join("index");

        let indexer = CorpusIndexer::with_embedder(
            RecordStore::new(store.path()),
            &artifact_dir,
            EmbeddingModel::stub(8),
        );
        indexer.build().await.unwrap();

        store.append(&record(3, BuildResult::Failure)).await.unwrap();
        indexer.build().await.unwrap();

        let artifact = IndexArtifact::load(&artifact_dir, "stub-8").await.unwrap();
        assert_eq!(artifact.len(), 3);
        assert_eq!(artifact.record_at(2).unwrap().result, BuildResult::Failure);
    }
}
