//! Forwarding admitted generate requests to Ollama
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::models::GeneratePayload;
use axum::http::{Method, Uri, header};
use axum::response::Response;
use tracing::{debug, error};
use url::Url;

const GENERATE_PATH: &str = "api/generate";

/// Where admitted requests go.
#[derive(Debug, Clone)]
pub struct Backend {
    pub url: Url,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    fn generate_uri(&self) -> Result<Uri, GatewayError> {
        // Url::join drops the last path segment unless it ends in '/'
        let mut base = self.url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let joined = base.join(GENERATE_PATH).map_err(|e| {
            error!("Invalid backend URL {}: {}", self.url, e);
            GatewayError::BackendUnavailable
        })?;
        Uri::try_from(joined.as_str()).map_err(|e| {
            error!("Invalid URI {}: {}", joined, e);
            GatewayError::BackendUnavailable
        })
    }

    /// POST the payload to Ollama and hand back whatever it answers, status and body untouched.
    /// Only a failure to get an answer at all is an error.
    pub async fn generate<T: HttpClient>(
        &self,
        client: &T,
        payload: &GeneratePayload,
    ) -> Result<Response, GatewayError> {
        let uri = self.generate_uri()?;
        let body = serde_json::to_vec(payload).map_err(|e| {
            error!("Failed to serialize generate payload: {}", e);
            GatewayError::BackendUnavailable
        })?;

        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(axum::body::Body::from(body))
            .map_err(|e| {
                error!("Failed to build backend request: {}", e);
                GatewayError::BackendUnavailable
            })?;

        debug!("Forwarding generate request for model {} to {}", payload.model, uri);
        client.request(req).await.map_err(|e| {
            error!("Error making request to Ollama API at {}: {}", uri, e);
            GatewayError::BackendUnavailable
        })
    }
}
