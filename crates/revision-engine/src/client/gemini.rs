use std::env;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{ModelClient, ModelRequest};
use crate::errors::{error_chain_text, truncate_text, ClientError};

const PROVIDER: &str = "Gemini";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modality {
    Text,
    Image,
}

impl Modality {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
        }
    }
}

/// `generateContent` REST client for both analysis and image editing.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiClient {
    pub fn from_env() -> Self {
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            http: HttpClient::new(),
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &ModelRequest, modality: Modality) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.mime_type,
                            "data": BASE64.encode(&request.image),
                        }
                    },
                    { "text": request.prompt },
                ],
            }]),
        );
        if let Some(instruction) = request
            .system_instruction
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }

        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), json!(request.temperature));
        generation_config.insert(
            "maxOutputTokens".to_string(),
            json!(request.max_output_tokens),
        );
        if let Some(top_p) = request.top_p {
            generation_config.insert("topP".to_string(), json!(top_p));
        }
        generation_config.insert(
            "responseModalities".to_string(),
            json!([modality.as_str()]),
        );
        if modality == Modality::Text {
            generation_config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
        }
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        payload.insert(
            "safetySettings".to_string(),
            Value::Array(default_safety_settings()),
        );
        Value::Object(payload)
    }

    async fn post(&self, request: &ModelRequest, modality: Modality) -> Result<Value, ClientError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ClientError::MissingCredentials("GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string())
        })?;
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request, modality);

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ClientError::Status {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }
        serde_json::from_str(&body).map_err(|err| {
            ClientError::InvalidResponse(format!("{PROVIDER} returned invalid JSON payload: {err}"))
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn analyze(&self, request: &ModelRequest) -> Result<String, ClientError> {
        let payload = self.post(request, Modality::Text).await?;
        extract_text(&payload)
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Vec<u8>, ClientError> {
        let payload = self.post(request, Modality::Image).await?;
        extract_image(&payload)
    }
}

fn default_safety_settings() -> Vec<Value> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| {
        json!({
            "category": category,
            "threshold": "BLOCK_ONLY_HIGH",
        })
    })
    .collect()
}

fn candidate_parts(payload: &Value) -> Vec<Value> {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
        .cloned()
        .collect()
}

/// Missing output is either an explicit block or an empty answer.
fn missing_output(payload: &Value) -> ClientError {
    let block_reason = payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("candidates")
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|candidate| candidate.get("finishReason"))
                .and_then(Value::as_str)
                .filter(|reason| matches!(*reason, "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST"))
        });
    match block_reason {
        Some(reason) => ClientError::Blocked(reason.to_string()),
        None => ClientError::EmptyResponse(PROVIDER.to_string()),
    }
}

fn extract_text(payload: &Value) -> Result<String, ClientError> {
    let text = candidate_parts(payload)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("");
    if text.trim().is_empty() {
        return Err(missing_output(payload));
    }
    Ok(text)
}

fn extract_image(payload: &Value) -> Result<Vec<u8>, ClientError> {
    for part in candidate_parts(payload) {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
            ClientError::InvalidResponse(format!("{PROVIDER} image base64 decode failed: {err}"))
        })?;
        if !bytes.is_empty() {
            return Ok(bytes);
        }
    }
    Err(missing_output(payload))
}

/// The request URL is dropped so error text never carries endpoint details
/// into results, events or logs.
fn transport_error(err: reqwest::Error) -> ClientError {
    ClientError::Transport(error_chain_text(&err.without_url(), 512))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
