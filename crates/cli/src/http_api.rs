use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use buildrag_retrieval::{CueOutcome, RetrievalEngine, RetrievalError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub cue_found: bool,
    pub sources: Vec<SourceBuild>,
}

/// The evidence a generated answer was grounded on.
#[derive(Debug, Serialize)]
pub struct SourceBuild {
    pub job: String,
    pub build_number: u64,
    pub result: String,
    pub url: String,
    pub relevance: f32,
}

#[derive(Serialize)]
pub struct BuildSummary {
    pub job: String,
    pub build_number: u64,
    pub result: String,
    pub timestamp: i64,
    pub duration: u64,
    pub url: String,
}

pub fn router(engine: Arc<RetrievalEngine>) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/stats", get(stats))
        .route("/builds", get(builds))
        .route("/health", get(health))
        .with_state(engine)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: String) -> ApiError {
    (status, Json(json!({ "error": message })))
}

async fn ask(
    State(engine): State<Arc<RetrievalEngine>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let answer = engine.answer(&request.question).await.map_err(|err| {
        let status = match err {
            RetrievalError::EmptyQuestion => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("ask failed: {err}");
        }
        error_response(status, err.to_string())
    })?;

    let sources = answer
        .retrieved
        .iter()
        .map(|r| SourceBuild {
            job: r.record.job.clone(),
            build_number: r.record.build_number,
            result: r.record.result.to_string(),
            url: r.record.url.clone(),
            relevance: r.relevance(),
        })
        .collect();

    Ok(Json(AskResponse {
        answer: answer.text,
        cue_found: answer.cue == CueOutcome::Extracted,
        sources,
    }))
}

async fn stats(State(engine): State<Arc<RetrievalEngine>>) -> Json<serde_json::Value> {
    Json(json!(engine.stats()))
}

async fn builds(State(engine): State<Arc<RetrievalEngine>>) -> Json<Vec<BuildSummary>> {
    let builds = engine
        .list_builds()
        .into_iter()
        .map(|r| BuildSummary {
            job: r.job.clone(),
            build_number: r.build_number,
            result: r.result.to_string(),
            timestamp: r.timestamp,
            duration: r.duration,
            url: r.url.clone(),
        })
        .collect();
    Json(builds)
}

async fn health(State(engine): State<Arc<RetrievalEngine>>) -> Json<serde_json::Value> {
    Json(json!(engine.health()))
}
