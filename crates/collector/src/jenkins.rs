use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Detail record for a single remote build, with the raw payload retained.
#[derive(Debug, Clone)]
pub struct BuildDetail {
    /// Remote result string; `None` while the build is still running.
    pub result: Option<String>,
    pub timestamp: i64,
    pub duration: u64,
    pub url: String,
    pub raw: serde_json::Value,
}

impl BuildDetail {
    #[must_use]
    pub fn from_json(raw: serde_json::Value) -> Self {
        Self {
            result: raw
                .get("result")
                .and_then(|v| v.as_str())
                .map(ToString::to_string),
            timestamp: raw.get("timestamp").and_then(serde_json::Value::as_i64).unwrap_or(0),
            duration: raw.get("duration").and_then(serde_json::Value::as_u64).unwrap_or(0),
            url: raw
                .get("url")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            raw,
        }
    }

    /// Commit SHA resolved from the `BuildData` action, empty when the
    /// build carries no SCM metadata.
    #[must_use]
    pub fn commit_sha(&self) -> String {
        let Some(actions) = self.raw.get("actions").and_then(|v| v.as_array()) else {
            return String::new();
        };
        for action in actions {
            let is_build_data = action
                .get("_class")
                .and_then(|v| v.as_str())
                .is_some_and(|class| class.contains("BuildData"));
            if !is_build_data {
                continue;
            }
            if let Some(sha) = action
                .pointer("/lastBuiltRevision/SHA1")
                .and_then(|v| v.as_str())
            {
                return sha.to_string();
            }
        }
        String::new()
    }
}

/// Remote CI system seam. The collector only needs a build listing and a
/// per-build detail fetch; everything else is transport detail.
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn list_builds(&self, job: &str) -> Result<Vec<u64>>;

    async fn build_detail(&self, job: &str, build_number: u64) -> Result<BuildDetail>;
}

/// Jenkins JSON API client with basic credentials.
pub struct JenkinsClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    api_token: String,
}

impl JenkinsClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            api_token: api_token.into(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl BuildSource for JenkinsClient {
    async fn list_builds(&self, job: &str) -> Result<Vec<u64>> {
        let url = format!("{}/job/{job}/api/json", self.base_url);
        let body = self.get_json(&url).await?;

        let builds = body
            .get("builds")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                CollectorError::BadResponse(format!("job listing for '{job}' has no builds array"))
            })?;

        Ok(builds
            .iter()
            .filter_map(|b| b.get("number").and_then(serde_json::Value::as_u64))
            .collect())
    }

    async fn build_detail(&self, job: &str, build_number: u64) -> Result<BuildDetail> {
        let url = format!("{}/job/{job}/{build_number}/api/json", self.base_url);
        let body = self.get_json(&url).await?;
        Ok(BuildDetail::from_json(body))
    }
}
