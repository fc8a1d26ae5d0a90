use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single CI build as reported by the remote system.
///
/// Jenkins reports `null` while a build is still running and may report
/// statuses this tool does not track; both map to [`BuildResult::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Failure,
    Aborted,
    Unknown,
}

impl BuildResult {
    #[must_use]
    pub fn from_remote(raw: Option<&str>) -> Self {
        match raw {
            Some("SUCCESS") => Self::Success,
            Some("FAILURE") => Self::Failure,
            Some("ABORTED") => Self::Aborted,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Aborted => "ABORTED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Natural key of a build record, unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    pub job: String,
    pub build_number: u64,
}

impl BuildKey {
    pub fn new(job: impl Into<String>, build_number: u64) -> Self {
        Self {
            job: job.into(),
            build_number,
        }
    }
}

/// One normalized observation of a single CI build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub job: String,
    pub build_number: u64,
    pub result: BuildResult,
    /// Build start, epoch milliseconds.
    pub timestamp: i64,
    /// Build duration, milliseconds.
    pub duration: u64,
    /// Empty when not resolvable from build metadata.
    pub commit_sha: String,
    pub url: String,
    /// Deterministic rendering of the fields above; the unit of embedding.
    pub rendered_text: String,
    /// Full source record, retained for traceability only.
    pub raw: serde_json::Value,
}

impl BuildRecord {
    #[must_use]
    pub fn key(&self) -> BuildKey {
        BuildKey::new(self.job.clone(), self.build_number)
    }

    /// Renders the canonical text for a build. Field order and labels are
    /// stable: the same inputs always produce the same text, and therefore
    /// the same embedding.
    #[must_use]
    pub fn render_text(
        job: &str,
        build_number: u64,
        result: BuildResult,
        timestamp: i64,
        duration: u64,
        url: &str,
        commit_sha: &str,
    ) -> String {
        format!(
            "Job: {job}\n\
             Build Number: {build_number}\n\
             Result: {result}\n\
             Timestamp: {timestamp}\n\
             Duration: {duration}\n\
             URL: {url}\n\
             Commit: {commit_sha}"
        )
    }
}
