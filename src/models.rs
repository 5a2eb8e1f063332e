/// Request and response bodies for the gateway endpoints.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model used when a generate request doesn't name one.
pub const DEFAULT_MODEL: &str = "llama2";

/// Query string for `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthQuery {
    pub apikey: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    /// RFC 3339 time at which the probe was answered.
    pub timestamp: String,
}

/// Body of `POST /generate`. Everything but `apikey` is passed on to Ollama.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Any JSON value; see [`GenerateRequest::api_key`].
    #[serde(default)]
    pub apikey: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub raw: Option<bool>,
}

impl GenerateRequest {
    /// The key to look up. Strings are used as-is and other non-empty values by their JSON
    /// text, so they fail lookup as unknown keys. `null`, `false`, `0` and empty values count
    /// as no key at all.
    pub fn api_key(&self) -> Option<String> {
        match self.apikey.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::Array(a) if a.is_empty() => None,
            Value::Object(o) if o.is_empty() => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// The body sent to Ollama's `/api/generate`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneratePayload {
    pub model: String,
    pub prompt: Option<String>,
    pub stream: bool,
    pub images: Vec<String>,
    pub raw: bool,
}

impl From<GenerateRequest> for GeneratePayload {
    fn from(req: GenerateRequest) -> Self {
        GeneratePayload {
            model: req.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            prompt: req.prompt,
            stream: req.stream.unwrap_or(false),
            images: req.images.unwrap_or_default(),
            raw: req.raw.unwrap_or(false),
        }
    }
}
