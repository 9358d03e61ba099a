use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::request_id::RequestId;
use crate::models::{RecommendationItem, RequestContext};
use crate::services::prompt;

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub context: RequestContext,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Raw backend output
    pub response: String,
    pub recs: Vec<RecommendationItem>,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Generates recommendations inline, without retrieval, cache or events
///
/// The prompt is built with an empty catalog.
pub async fn generate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<GenerateRequest>,
) -> AppResult<Json<GenerateResponse>> {
    tracing::info!(
        request_id = %request_id,
        history = request.context.last_5_watched.len(),
        "Processing inline generation request"
    );

    let prompt_text = prompt::build(&request.context.prefs, &request.context.last_5_watched, &[]);
    let raw = state.generator.generate(&prompt_text).await?;
    let recs = RecommendationItem::parse_list(&raw)?;

    tracing::info!(
        request_id = %request_id,
        recs = recs.len(),
        "Inline generation completed"
    );

    Ok(Json(GenerateResponse { response: raw, recs }))
}
