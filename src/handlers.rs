/// Axum handlers for the gateway
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::models::{GeneratePayload, GenerateRequest, HealthQuery, HealthResponse};
use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use tracing::{debug, info, instrument};

/// Liveness probe. Requires a known key but never spends a token.
#[instrument(skip(state, query))]
pub async fn health<T: HttpClient>(
    State(state): State<AppState<T>>,
    Query(query): Query<HealthQuery>,
) -> Result<Json<HealthResponse>, GatewayError> {
    state.gate.verify(query.apikey.as_deref()).await?;

    Ok(Json(HealthResponse {
        status: "API is healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Admit the request against its key, then forward it to Ollama, returning the response as-is.
#[instrument(skip(state, body))]
pub async fn generate<T: HttpClient>(
    State(state): State<AppState<T>>,
    body: axum::body::Bytes,
) -> Result<Response, GatewayError> {
    debug!("Received generate request body of size: {}", body.len());
    let request: GenerateRequest =
        serde_json::from_slice(&body).map_err(|_| GatewayError::InvalidBody)?;

    let record = state.gate.admit(request.api_key().as_deref()).await?;

    let payload = GeneratePayload::from(request);
    info!(
        "Admitted generate request for model {} ({})",
        payload.model,
        crate::auth::redact(&record.key)
    );

    state.backend.generate(&state.http_client, &payload).await
}
