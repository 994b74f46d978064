//! Local model runner backend (Ollama HTTP API).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::network::{build_http_client, decode, non_empty, send_for_text};
use super::{BackendError, BackendKind, GenerationConfig, RawCompletion, TextBackend};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

pub struct OllamaBackend {
    base_url: String,
    inner: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inner: build_http_client(connect_timeout, request_timeout)?,
        })
    }
}

/// A missing model makes the local runner unusable, same as a stopped server.
fn model_missing(err: BackendError, model: &str) -> BackendError {
    match err {
        BackendError::InvalidResponse(detail)
            if detail.starts_with(StatusCode::NOT_FOUND.as_str()) =>
        {
            BackendError::Unreachable(format!(
                "model '{model}' is not available locally (run: ollama pull {model}): {detail}"
            ))
        }
        other => other,
    }
}

#[async_trait]
impl TextBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    #[instrument(skip(self, system, prompt, params), fields(backend = "ollama", model = %params.model))]
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationConfig,
    ) -> Result<RawCompletion, BackendError> {
        let req = GenerateRequest {
            model: &params.model,
            prompt,
            system,
            stream: false,
            options: GenerateOptions {
                num_predict: params.max_tokens,
                temperature: params.temperature,
            },
        };
        let url = format!("{}/api/generate", self.base_url);
        debug!(%url, prompt_chars = prompt.len(), "sending ollama generate request");

        let started = Instant::now();
        let body = send_for_text(self.inner.post(&url).json(&req))
            .await
            .map_err(|e| model_missing(e, &params.model))?;
        let resp: GenerateResponse = decode(&body)?;
        let text = non_empty(resp.response)?;
        let latency = started.elapsed();
        info!(latency_ms = latency.as_millis() as u64, "ollama call successful");

        Ok(RawCompletion {
            text,
            backend: BackendKind::Ollama,
            model: params.model.clone(),
            latency,
        })
    }

    async fn health_check(&self, params: &GenerationConfig) -> Result<(), BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let body = send_for_text(self.inner.get(&url)).await?;
        let tags: TagsResponse = decode(&body)?;
        if tags.models.iter().any(|m| model_matches(&m.name, &params.model)) {
            Ok(())
        } else {
            warn!(model=%params.model, "model not found on local runner");
            Err(BackendError::Unreachable(format!(
                "model '{}' not found (run: ollama pull {})",
                params.model, params.model
            )))
        }
    }
}

// "llama3.2" matches the installed "llama3.2:latest" but "llama3" does not
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted || installed.split(':').next() == Some(wanted)
}
