//! Google Gemini backend (`generateContent`).

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::network::{build_http_client, decode, non_empty, send_for_text};
use super::{BackendError, BackendKind, GenerationConfig, RawCompletion, TextBackend};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

pub struct GeminiBackend {
    base_url: String,
    api_key: Option<String>,
    inner: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            inner: build_http_client(connect_timeout, request_timeout)?,
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/models/{}", self.base_url, model)
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Unauthorized("GEMINI_API_KEY is not set".into()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let value = HeaderValue::from_str(key)
            .map_err(|_| BackendError::Unauthorized("API key contains invalid characters".into()))?;
        headers.insert(API_KEY_HEADER, value);
        Ok(headers)
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    #[instrument(skip(self, system, prompt, params), fields(backend = "gemini", model = %params.model))]
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationConfig,
    ) -> Result<RawCompletion, BackendError> {
        let headers = self.headers()?;
        let req = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        };
        let url = format!("{}:generateContent", self.model_url(&params.model));
        debug!(%url, prompt_chars = prompt.len(), "sending gemini generateContent request");

        let started = Instant::now();
        let body = send_for_text(self.inner.post(&url).headers(headers).json(&req)).await?;
        let resp: GenerateContentResponse = decode(&body)?;

        // A blocked prompt comes back without candidates
        let Some(candidate) = resp.candidates.into_iter().next() else {
            warn!("gemini returned no candidates");
            return Err(BackendError::EmptyResponse);
        };
        if let Some(reason) = candidate.finish_reason.as_deref() {
            debug!(finish_reason = reason, "gemini candidate finished");
        }
        let text: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();
        let text = non_empty(text)?;
        let latency = started.elapsed();
        info!(latency_ms = latency.as_millis() as u64, "gemini call successful");

        Ok(RawCompletion {
            text,
            backend: BackendKind::Gemini,
            model: params.model.clone(),
            latency,
        })
    }

    async fn health_check(&self, params: &GenerationConfig) -> Result<(), BackendError> {
        let headers = self.headers()?;
        send_for_text(self.inner.get(self.model_url(&params.model)).headers(headers)).await?;
        Ok(())
    }
}
