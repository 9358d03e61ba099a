use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Generation output is malformed: {0}")]
    GenerationFormat(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same call may succeed.
    ///
    /// Connection failures, timeouts, 5xx and 429 responses are transient.
    /// Anything describing the request or the response body is not.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::HttpClient(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                } else {
                    !e.is_decode() && !e.is_builder()
                }
            }
            AppError::Backend { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::MalformedInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Cache(_) | AppError::Database(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Retrieval(_)
            | AppError::Backend { .. }
            | AppError::HttpClient(_)
            | AppError::GenerationFormat(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Broker(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
