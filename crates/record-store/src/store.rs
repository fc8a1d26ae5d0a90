use crate::error::Result;
use crate::types::{BuildKey, BuildRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Append-only JSONL log of build records.
///
/// Each record is a single newline-terminated line, serialized and written
/// as one buffer so a failed append never leaves a partial line behind.
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably appends one record. The record is serialized up front, so a
    /// serialization failure leaves the file untouched.
    pub async fn append(&self, record: &BuildRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        log::debug!(
            "Appended build {}#{} to {}",
            record.job,
            record.build_number,
            self.path.display()
        );
        Ok(())
    }

    /// Returns every record in write order. A store that does not exist yet
    /// is an empty store, not an error.
    pub async fn load_all(&self) -> Result<Vec<BuildRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    /// Set of `(job, build_number)` keys already ingested, for O(1)
    /// membership tests before fetching remote detail.
    pub async fn existing_keys(&self) -> Result<HashSet<BuildKey>> {
        let records = self.load_all().await?;
        Ok(records.iter().map(BuildRecord::key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(job: &str, number: u64, result: BuildResult) -> BuildRecord {
        let url = format!("http://localhost:8080/job/{job}/{number}/");
        BuildRecord {
            job: job.to_string(),
            build_number: number,
            result,
            timestamp: 1_700_000_000_000 + number as i64,
            duration: 60_000,
            commit_sha: format!("sha-{number}"),
            url: url.clone(),
            rendered_text: BuildRecord::render_text(
                job,
                number,
                result,
                1_700_000_000_000 + number as i64,
                60_000,
                &url,
                &format!("sha-{number}"),
            ),
            raw: serde_json::json!({ "number": number, "url": url }),
        }
    }

    #[tokio::test]
    async fn append_and_load_preserves_write_order() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path().join("builds.jsonl"));

        store.append(&record("ci", 3, BuildResult::Success)).await.unwrap();
        store.append(&record("ci", 1, BuildResult::Failure)).await.unwrap();
        store.append(&record("ci", 2, BuildResult::Aborted)).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        let numbers: Vec<u64> = loaded.iter().map(|r| r.build_number).collect();
        assert_eq!(numbers, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn raw_payload_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path().join("builds.jsonl"));

        let rec = record("ci", 7, BuildResult::Success);
        store.append(&rec).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].raw, rec.raw);
        assert_eq!(loaded[0].rendered_text, rec.rendered_text);
    }

    #[tokio::test]
    async fn missing_store_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path().join("absent.jsonl"));

        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.existing_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_lines_are_tolerated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("builds.jsonl");
        let store = RecordStore::new(&path);

        store.append(&record("ci", 1, BuildResult::Success)).await.unwrap();
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push('\n');
        tokio::fs::write(&path, contents).await.unwrap();
        store.append(&record("ci", 2, BuildResult::Failure)).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn existing_keys_matches_appended_records() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path().join("builds.jsonl"));

        store.append(&record("ci", 1, BuildResult::Success)).await.unwrap();
        store.append(&record("ci", 2, BuildResult::Success)).await.unwrap();

        let keys = store.existing_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&BuildKey::new("ci", 1)));
        assert!(keys.contains(&BuildKey::new("ci", 2)));
        assert!(!keys.contains(&BuildKey::new("ci", 3)));
        assert!(!keys.contains(&BuildKey::new("other", 1)));
    }
}
