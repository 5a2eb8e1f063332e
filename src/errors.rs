//! Errors surfaced to gateway callers
use crate::traits::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("API key is required")]
    MissingKey,

    #[error("Invalid API key")]
    UnknownKey,

    #[error("API key is deactivated")]
    DeactivatedKey,

    #[error("Rate limit exceeded. Try again later.")]
    RateLimited,

    #[error("Invalid request body")]
    InvalidBody,

    /// The backend could not be reached at all. Backend error responses are relayed as-is and
    /// never become this variant.
    #[error("Error making request to Ollama API")]
    BackendUnavailable,

    #[error("Internal server error")]
    Store(#[from] StoreError),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingKey | GatewayError::InvalidBody => StatusCode::BAD_REQUEST,
            GatewayError::UnknownKey | GatewayError::DeactivatedKey => StatusCode::FORBIDDEN,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BackendUnavailable | GatewayError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Store errors carry database detail that callers shouldn't see
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
