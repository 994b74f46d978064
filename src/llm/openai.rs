use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

use super::network::{build_http_client, decode, non_empty, send_for_text};
use super::{BackendError, BackendKind, GenerationConfig, RawCompletion, TextBackend};

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

/// Cloud backend speaking the OpenAI chat completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    inner: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            inner: build_http_client(connect_timeout, request_timeout)?,
        })
    }

    fn api_base(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base).trim_end_matches('/');
        format!("{base}/v1")
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base())
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Unauthorized("OPENAI_API_KEY is not set".into()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| BackendError::Unauthorized("API key contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

#[async_trait]
impl TextBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    #[instrument(skip(self, system, prompt, params), fields(backend = "openai", model = %params.model))]
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationConfig,
    ) -> Result<RawCompletion, BackendError> {
        let headers = self.headers()?;
        let req = ChatRequest {
            model: params.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        debug!(endpoint=%self.endpoint(), prompt_chars = prompt.len(), "sending chat.completions request");

        let started = Instant::now();
        let body =
            send_for_text(self.inner.post(self.endpoint()).headers(headers).json(&req)).await?;
        let resp: ChatResponse = decode(&body)?;
        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let text = non_empty(text)?;
        let latency = started.elapsed();
        info!(latency_ms = latency.as_millis() as u64, "openai call successful");

        Ok(RawCompletion {
            text,
            backend: BackendKind::OpenAi,
            model: params.model.clone(),
            latency,
        })
    }

    async fn health_check(&self, _params: &GenerationConfig) -> Result<(), BackendError> {
        let headers = self.headers()?;
        let url = format!("{}/models", self.api_base());
        send_for_text(self.inner.get(url).headers(headers)).await?;
        Ok(())
    }
}
