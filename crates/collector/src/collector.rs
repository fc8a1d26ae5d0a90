use crate::error::Result;
use crate::jenkins::BuildSource;
use buildrag_record_store::{BuildKey, BuildRecord, BuildResult, RecordStore};
use std::time::Duration;
use tokio::sync::watch;

/// Result of a single collector cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Builds newly appended to the record store this cycle.
    pub appended: usize,
    /// Builds whose detail fetch or append failed; retried next cycle.
    pub failed: usize,
}

/// Polls a [`BuildSource`] on a fixed interval and appends unseen builds
/// to the record store. Single writer: nothing else appends to the store.
pub struct Collector<S: BuildSource> {
    source: S,
    store: RecordStore,
    job: String,
    interval: Duration,
}

impl<S: BuildSource> Collector<S> {
    pub fn new(source: S, store: RecordStore, job: impl Into<String>, interval: Duration) -> Self {
        Self {
            source,
            store,
            job: job.into(),
            interval,
        }
    }

    /// Runs one cycle: diff the remote listing against the store, then
    /// fetch and append each new build independently.
    ///
    /// A listing failure aborts the cycle (there is nothing to diff
    /// against). A per-build failure is logged and counted, and the cycle
    /// moves on to the next candidate; the build stays absent from the
    /// store, so the next cycle retries it.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let existing = self.store.existing_keys().await?;
        let remote = self.source.list_builds(&self.job).await?;

        // The candidate set is fixed here; builds appearing remotely
        // mid-cycle are picked up on the next cycle.
        let new_numbers: Vec<u64> = remote
            .into_iter()
            .filter(|n| !existing.contains(&BuildKey::new(self.job.clone(), *n)))
            .collect();

        let mut outcome = CycleOutcome::default();
        for build_number in new_numbers {
            match self.ingest_build(build_number).await {
                Ok(()) => outcome.appended += 1,
                Err(err) => {
                    log::warn!(
                        "Failed to ingest build {}#{build_number}: {err}",
                        self.job
                    );
                    outcome.failed += 1;
                }
            }
        }

        log::info!(
            "Collector cycle for '{}': {} new builds appended, {} failed",
            self.job,
            outcome.appended,
            outcome.failed
        );
        Ok(outcome)
    }

    async fn ingest_build(&self, build_number: u64) -> Result<()> {
        let detail = self.source.build_detail(&self.job, build_number).await?;

        let result = BuildResult::from_remote(detail.result.as_deref());
        let commit_sha = detail.commit_sha();
        let rendered_text = BuildRecord::render_text(
            &self.job,
            build_number,
            result,
            detail.timestamp,
            detail.duration,
            &detail.url,
            &commit_sha,
        );

        let record = BuildRecord {
            job: self.job.clone(),
            build_number,
            result,
            timestamp: detail.timestamp,
            duration: detail.duration,
            commit_sha,
            url: detail.url,
            rendered_text,
            raw: detail.raw,
        };

        self.store.append(&record).await?;
        Ok(())
    }

    /// Polling loop. Cycles never overlap: each finishes before the fixed
    /// sleep starts. A failed cycle yields zero new records and is retried
    /// on the next tick; it is never fatal to the loop.
    ///
    /// The loop exits when the shutdown channel observes `true` or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Collector started for job '{}' (interval {:?})",
            self.job,
            self.interval
        );

        loop {
            if let Err(err) = self.run_cycle().await {
                log::warn!("Collector cycle failed: {err}; retrying next interval");
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Collector for job '{}' stopped", self.job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectorError;
    use crate::jenkins::BuildDetail;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockSource {
        builds: Mutex<Vec<u64>>,
        failing: HashSet<u64>,
        listing_fails: bool,
        detail_calls: AtomicUsize,
    }

    impl MockSource {
        fn with_builds(builds: Vec<u64>) -> Self {
            Self {
                builds: Mutex::new(builds),
                failing: HashSet::new(),
                listing_fails: false,
                detail_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BuildSource for MockSource {
        async fn list_builds(&self, _job: &str) -> Result<Vec<u64>> {
            if self.listing_fails {
                return Err(CollectorError::BadResponse("listing unavailable".into()));
            }
            Ok(self.builds.lock().unwrap().clone())
        }

        async fn build_detail(&self, job: &str, build_number: u64) -> Result<BuildDetail> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&build_number) {
                return Err(CollectorError::BadResponse(format!(
                    "detail for #{build_number} unavailable"
                )));
            }
            Ok(BuildDetail::from_json(serde_json::json!({
                "number": build_number,
                "result": "SUCCESS",
                "timestamp": 1_700_000_000_000_i64 + build_number as i64,
                "duration": 10_000,
                "url": format!("http://ci/job/{job}/{build_number}/"),
            })))
        }
    }

    fn store_in(tmp: &TempDir) -> RecordStore {
        RecordStore::new(tmp.path().join("builds.jsonl"))
    }

    #[tokio::test]
    async fn first_cycle_ingests_all_builds() {
        let tmp = TempDir::new().unwrap();
        let source = MockSource::with_builds(vec![1, 2, 3]);
        let collector = Collector::new(source, store_in(&tmp), "ci", Duration::from_secs(10));

        let outcome = collector.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome { appended: 3, failed: 0 });

        let records = collector.store.load_all().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].result, BuildResult::Success);
    }

    #[tokio::test]
    async fn repeated_cycle_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let source = MockSource::with_builds(vec![1, 2]);
        let collector = Collector::new(source, store_in(&tmp), "ci", Duration::from_secs(10));

        let first = collector.run_cycle().await.unwrap();
        assert_eq!(first.appended, 2);

        let second = collector.run_cycle().await.unwrap();
        assert_eq!(second.appended, 0);

        // Already-ingested builds are never re-fetched.
        assert_eq!(collector.source.detail_calls.load(Ordering::SeqCst), 2);

        let keys = collector.store.existing_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn only_unseen_builds_are_fetched() {
        let tmp = TempDir::new().unwrap();
        let source = MockSource::with_builds(vec![1, 2]);
        let collector = Collector::new(source, store_in(&tmp), "ci", Duration::from_secs(10));

        collector.run_cycle().await.unwrap();
        collector.source.builds.lock().unwrap().push(3);

        let outcome = collector.run_cycle().await.unwrap();
        assert_eq!(outcome.appended, 1);

        let records = collector.store.load_all().await.unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.build_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn one_failing_build_does_not_abort_the_cycle() {
        let tmp = TempDir::new().unwrap();
        let mut source = MockSource::with_builds(vec![1, 2, 3]);
        source.failing.insert(2);
        let collector = Collector::new(source, store_in(&tmp), "ci", Duration::from_secs(10));

        let outcome = collector.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome { appended: 2, failed: 1 });

        // The failed build is retried on the next cycle.
        let keys = collector.store.existing_keys().await.unwrap();
        assert!(!keys.contains(&BuildKey::new("ci", 2)));
    }

    #[tokio::test]
    async fn listing_failure_aborts_the_cycle() {
        let tmp = TempDir::new().unwrap();
        let mut source = MockSource::with_builds(vec![1]);
        source.listing_fails = true;
        let collector = Collector::new(source, store_in(&tmp), "ci", Duration::from_secs(10));

        assert!(collector.run_cycle().await.is_err());
        assert!(collector.store.load_all().await.unwrap().is_empty());
        assert_eq!(collector.source.detail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let tmp = TempDir::new().unwrap();
        let source = MockSource::with_builds(vec![1]);
        let collector = Collector::new(source, store_in(&tmp), "ci", Duration::from_secs(60));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { collector.run(rx).await });

        // Give the first cycle a moment, then signal shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("collector should stop promptly")
            .unwrap();
    }
}
