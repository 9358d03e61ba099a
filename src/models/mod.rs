use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// Inbound `rec.request` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub request_id: String,
    pub user_id: String,
    pub context: RequestContext,
    /// Opaque timestamp, copied onto every outbound event
    pub ts: Value,
}

impl RecommendationRequest {
    /// Decodes a raw event payload, rejecting anything missing a required field
    pub fn from_slice(payload: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(payload).map_err(|e| AppError::MalformedInput(e.to_string()))
    }
}

/// User context carried by a request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    /// Preference dimensions, e.g. `{"genres": ["scifi"]}`
    pub prefs: Map<String, Value>,
    /// Most recent first, at most 5 ids
    #[serde(default)]
    pub last_5_watched: Vec<String>,
}

impl RequestContext {
    /// Genre preferences as plain strings.
    ///
    /// Accepts either a list or a single string under `prefs.genres`.
    pub fn genres(&self) -> Vec<String> {
        match self.prefs.get("genres") {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(genre)) => vec![genre.clone()],
            _ => Vec::new(),
        }
    }

    /// Text handed to the embedding backend for candidate retrieval
    pub fn query_text(&self) -> String {
        self.genres()
            .iter()
            .chain(self.last_5_watched.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Content ids ordered by ascending distance to the query embedding
pub type CandidateSet = Vec<String>;

/// One recommendation as returned by the generative backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationItem {
    pub content_id: String,
    pub score: f64,
    pub reason: String,
}

impl RecommendationItem {
    /// Parses raw backend output as a JSON list of items
    pub fn parse_list(raw: &str) -> AppResult<Vec<Self>> {
        serde_json::from_str(raw.trim()).map_err(|e| AppError::GenerationFormat(e.to_string()))
    }
}

/// Outbound `rec.ready` event, also the cached value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub request_id: String,
    pub user_id: String,
    pub recs: Vec<RecommendationItem>,
    pub ts: Value,
}

impl RecommendationResponse {
    /// Rewrites the correlation fields so a cached payload answers `request`
    pub fn relabel_for(mut self, request: &RecommendationRequest) -> Self {
        self.request_id = request.request_id.clone();
        self.ts = request.ts.clone();
        self
    }
}

/// Outbound `llm.raw` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawTraceEvent {
    pub request_id: String,
    pub user_id: String,
    pub prompt: String,
    pub response: String,
    pub ts: Value,
}
