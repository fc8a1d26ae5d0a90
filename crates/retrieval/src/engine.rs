use crate::error::{Result, RetrievalError};
use crate::generator::TextGenerator;
use crate::prompt::{self, CueOutcome};
use buildrag_record_store::{BuildRecord, BuildResult};
use buildrag_vector_store::{EmbeddingModel, IndexArtifact};
use serde::Serialize;
use std::path::Path;

/// Neighbors fetched per question.
pub const DEFAULT_TOP_K: usize = 5;
/// Generation budget for one answer.
pub const MAX_ANSWER_TOKENS: u32 = 300;

/// One retrieved build with its index position and raw squared-L2
/// distance to the question embedding.
#[derive(Debug, Clone)]
pub struct RetrievedBuild {
    pub record: BuildRecord,
    pub position: usize,
    pub distance: f32,
}

impl RetrievedBuild {
    /// Monotone relevance score in (0, 1]; 1.0 means an exact match.
    #[must_use]
    pub fn relevance(&self) -> f32 {
        1.0 / (1.0 + self.distance)
    }
}

/// A generated answer plus the evidence it was grounded on.
#[derive(Debug)]
pub struct Answer {
    pub text: String,
    pub cue: CueOutcome,
    pub retrieved: Vec<RetrievedBuild>,
}

/// Aggregate counters over the indexed corpus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStats {
    pub total_builds: usize,
    pub success: usize,
    pub failure: usize,
    pub aborted: usize,
    pub unknown: usize,
    pub success_rate_percent: f64,
}

/// Readiness report for the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub models_loaded: bool,
    pub indexed_builds: usize,
}

/// Answers questions against a loaded index artifact.
///
/// The engine holds an immutable snapshot of the artifact; a rebuilt
/// index is picked up by constructing a fresh engine.
pub struct RetrievalEngine {
    artifact: IndexArtifact,
    embedder: EmbeddingModel,
    generator: Box<dyn TextGenerator>,
    top_k: usize,
}

impl RetrievalEngine {
    /// Loads the artifact from `dir`, refusing artifacts built with a
    /// different embedding model than `embedder`.
    pub async fn load(
        dir: impl AsRef<Path>,
        embedder: EmbeddingModel,
        generator: Box<dyn TextGenerator>,
    ) -> Result<Self> {
        let artifact = IndexArtifact::load(dir, embedder.model_id()).await?;
        Ok(Self::from_parts(artifact, embedder, generator))
    }

    pub fn from_parts(
        artifact: IndexArtifact,
        embedder: EmbeddingModel,
        generator: Box<dyn TextGenerator>,
    ) -> Self {
        Self {
            artifact,
            embedder,
            generator,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Overrides how many builds `answer` retrieves as context.
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Nearest builds to the question, ascending by distance.
    ///
    /// Returns at most `k` builds, fewer when the corpus is smaller, and
    /// none when it is empty.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedBuild>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }
        if self.artifact.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(question).await?;
        let neighbors = self.artifact.index().search(&query, k)?;

        let mut retrieved = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let record = self.artifact.record_at(neighbor.position).ok_or_else(|| {
                buildrag_vector_store::VectorStoreError::ArtifactInconsistency(format!(
                    "index returned position {} beyond {} records",
                    neighbor.position,
                    self.artifact.len()
                ))
            })?;
            retrieved.push(RetrievedBuild {
                record: record.clone(),
                position: neighbor.position,
                distance: neighbor.distance,
            });
        }
        Ok(retrieved)
    }

    /// Full question-answering pass: retrieve, assemble the prompt,
    /// generate, and extract the answer after the final cue.
    ///
    /// An empty question fails before any embedding or generation work.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }

        let retrieved = self.retrieve(question, self.top_k).await?;
        let context: Vec<&str> = retrieved
            .iter()
            .map(|r| r.record.rendered_text.as_str())
            .collect();
        let prompt = prompt::build_prompt(&context.join("\n\n"), question);

        log::debug!(
            "Answering with {} retrieved builds, prompt {} chars",
            retrieved.len(),
            prompt.len()
        );
        let completion = self.generator.generate(&prompt, MAX_ANSWER_TOKENS).await?;
        let (text, cue) = prompt::extract_answer(&completion);
        if cue == CueOutcome::RawFallback {
            log::warn!("Model output did not contain the answer cue; returning raw completion");
        }

        Ok(Answer {
            text,
            cue,
            retrieved,
        })
    }

    /// Counters over the whole indexed corpus. The success rate is a
    /// percentage rounded to two decimals, and zero for an empty corpus.
    #[must_use]
    pub fn stats(&self) -> BuildStats {
        let mut stats = BuildStats {
            total_builds: self.artifact.len(),
            success: 0,
            failure: 0,
            aborted: 0,
            unknown: 0,
            success_rate_percent: 0.0,
        };
        for record in self.artifact.records() {
            match record.result {
                BuildResult::Success => stats.success += 1,
                BuildResult::Failure => stats.failure += 1,
                BuildResult::Aborted => stats.aborted += 1,
                BuildResult::Unknown => stats.unknown += 1,
            }
        }
        if stats.total_builds > 0 {
            let rate = stats.success as f64 / stats.total_builds as f64 * 100.0;
            stats.success_rate_percent = (rate * 100.0).round() / 100.0;
        }
        stats
    }

    /// Indexed builds, newest build number first.
    #[must_use]
    pub fn list_builds(&self) -> Vec<&BuildRecord> {
        let mut builds: Vec<&BuildRecord> = self.artifact.records().iter().collect();
        builds.sort_by(|a, b| b.build_number.cmp(&a.build_number));
        builds
    }

    /// Readiness probe. The embedding model and artifact are loaded at
    /// construction, so a live engine is always ready; the build count
    /// tells callers whether there is anything to retrieve yet.
    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            models_loaded: true,
            indexed_builds: self.artifact.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const DIM: usize = 16;

    struct CannedGenerator {
        completion: String,
        calls: Arc<AtomicUsize>,
    }

    impl CannedGenerator {
        fn new(completion: &str) -> Self {
            Self {
                completion: completion.to_string(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _prompt: &str, _max_new_tokens: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.completion.clone())
        }
    }

    struct CapturingGenerator {
        prompt: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl TextGenerator for CapturingGenerator {
        async fn generate(&self, prompt: &str, _max_new_tokens: u32) -> Result<String> {
            *self.prompt.lock().unwrap() = Some(prompt.to_string());
            Ok("unused".to_string())
        }
    }

    fn record(number: u64, result: BuildResult) -> BuildRecord {
        let result_text = result.to_string();
        BuildRecord {
            job: "ci".to_string(),
            build_number: number,
            result,
            timestamp: 1_700_000_000_000 + number as i64,
            duration: 700,
            commit_sha: format!("{number:040x}"),
            url: format!("http://ci/job/ci/{number}/"),
            rendered_text: format!("Job: ci\nBuild Number: {number}\nResult: {result_text}"),
            raw: serde_json::json!({ "number": number }),
        }
    }

    async fn engine_with(
        records: Vec<BuildRecord>,
        completion: &str,
    ) -> RetrievalEngine {
        let embedder = EmbeddingModel::stub(DIM);
        let mut artifact = IndexArtifact::new(embedder.model_id(), DIM);
        for rec in records {
            let vector = embedder.embed(&rec.rendered_text).await.unwrap();
            artifact.push(rec, &vector).unwrap();
        }
        RetrievalEngine::from_parts(artifact, embedder, Box::new(CannedGenerator::new(completion)))
    }

    #[tokio::test]
    async fn empty_question_fails_before_generation() {
        let generator = CannedGenerator::new("unused");
        let calls = generator.calls.clone();
        let embedder = EmbeddingModel::stub(DIM);
        let artifact = IndexArtifact::new(embedder.model_id(), DIM);
        let engine = RetrievalEngine::from_parts(artifact, embedder, Box::new(generator));

        let err = engine.answer("   \n ").await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyQuestion));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identical_text_is_the_top_result() {
        let records = vec![
            record(1, BuildResult::Success),
            record(2, BuildResult::Failure),
            record(3, BuildResult::Success),
        ];
        let wanted = records[1].rendered_text.clone();
        let engine = engine_with(records, "unused").await;

        let retrieved = engine.retrieve(&wanted, 3).await.unwrap();
        assert_eq!(retrieved[0].record.build_number, 2);
        assert!(retrieved[0].distance.abs() < 1e-6);
        assert!((retrieved[0].relevance() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn retrieve_is_bounded_by_corpus_and_k() {
        let records = vec![record(1, BuildResult::Success), record(2, BuildResult::Success)];
        let engine = engine_with(records, "unused").await;

        assert_eq!(engine.retrieve("anything", 5).await.unwrap().len(), 2);
        assert_eq!(engine.retrieve("anything", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_corpus_retrieves_nothing() {
        let engine = engine_with(Vec::new(), "unused").await;
        assert!(engine.retrieve("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_extracts_text_after_final_cue() {
        let records = vec![record(1, BuildResult::Success)];
        let completion = format!("echoed prompt\n{} build 1 passed", prompt::ANSWER_CUE);
        let engine = engine_with(records, &completion).await;

        let answer = engine.answer("did build 1 pass?").await.unwrap();
        assert_eq!(answer.text, "build 1 passed");
        assert_eq!(answer.cue, CueOutcome::Extracted);
        assert_eq!(answer.retrieved.len(), 1);
    }

    #[tokio::test]
    async fn prompt_carries_context_in_retrieval_order() {
        let records = vec![
            record(1, BuildResult::Success),
            record(2, BuildResult::Failure),
        ];
        // Asking with record 2's exact text makes it the nearest neighbor,
        // so the context must open with it and record 1 must follow.
        let question = records[1].rendered_text.clone();
        let first = records[1].rendered_text.clone();
        let second = records[0].rendered_text.clone();

        let embedder = EmbeddingModel::stub(DIM);
        let mut artifact = IndexArtifact::new(embedder.model_id(), DIM);
        for rec in records {
            let vector = embedder.embed(&rec.rendered_text).await.unwrap();
            artifact.push(rec, &vector).unwrap();
        }

        let captured = Arc::new(std::sync::Mutex::new(None));
        let generator = CapturingGenerator {
            prompt: captured.clone(),
        };
        let engine = RetrievalEngine::from_parts(artifact, embedder, Box::new(generator));

        let answer = engine.answer(&question).await.unwrap();
        assert_eq!(answer.retrieved.len(), 2);
        assert_eq!(answer.retrieved[0].record.build_number, 2);

        let prompt = captured.lock().unwrap().clone().unwrap();
        // Both rendered texts appear, blank-line separated, in the same
        // order the builds were retrieved.
        assert!(prompt.contains(&format!("{first}\n\n{second}")));
        assert!(prompt.find(&first).unwrap() < prompt.find(&second).unwrap());
    }

    #[tokio::test]
    async fn answer_without_cue_returns_raw_completion() {
        let records = vec![record(1, BuildResult::Success)];
        let engine = engine_with(records, "freeform model output").await;

        let answer = engine.answer("did build 1 pass?").await.unwrap();
        assert_eq!(answer.text, "freeform model output");
        assert_eq!(answer.cue, CueOutcome::RawFallback);
    }

    #[tokio::test]
    async fn stats_count_every_result_kind() {
        let records = vec![
            record(1, BuildResult::Success),
            record(2, BuildResult::Success),
            record(3, BuildResult::Failure),
            record(4, BuildResult::Aborted),
        ];
        let engine = engine_with(records, "unused").await;

        let stats = engine.stats();
        assert_eq!(
            stats,
            BuildStats {
                total_builds: 4,
                success: 2,
                failure: 1,
                aborted: 1,
                unknown: 0,
                success_rate_percent: 50.0,
            }
        );
    }

    #[tokio::test]
    async fn stats_on_empty_corpus_report_zero_rate() {
        let engine = engine_with(Vec::new(), "unused").await;
        let stats = engine.stats();
        assert_eq!(stats.total_builds, 0);
        assert_eq!(stats.success_rate_percent, 0.0);
    }

    #[tokio::test]
    async fn builds_list_newest_first() {
        let records = vec![
            record(2, BuildResult::Success),
            record(9, BuildResult::Failure),
            record(5, BuildResult::Success),
        ];
        let engine = engine_with(records, "unused").await;

        let numbers: Vec<u64> = engine.list_builds().iter().map(|r| r.build_number).collect();
        assert_eq!(numbers, vec![9, 5, 2]);
    }
}
