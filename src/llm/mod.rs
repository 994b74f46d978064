mod gemini;
mod network;
mod ollama;
mod openai;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AppConfig;

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use types::*;

/// Classified failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend rejected credentials: {0}")]
    Unauthorized(String),
    #[error("backend rate limited: {0}")]
    RateLimited(String),
    #[error("backend timed out: {0}")]
    Timeout(String),
    #[error("backend returned an empty response")]
    EmptyResponse,
    #[error("backend returned an unexpected response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Short tag used in logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Unreachable(_) => "unreachable",
            BackendError::Unauthorized(_) => "unauthorized",
            BackendError::RateLimited(_) => "rate_limited",
            BackendError::Timeout(_) => "timeout",
            BackendError::EmptyResponse => "empty_response",
            BackendError::InvalidResponse(_) => "invalid_response",
        }
    }

    /// True when the provider could not be reached in time.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BackendError::Unreachable(_) | BackendError::Timeout(_))
    }
}

/// A text-generation provider.
///
/// Implementations perform exactly one request per call; retry and
/// fallback decisions belong to the caller.
#[async_trait]
pub trait TextBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Completes `prompt` under the tutor persona.
    async fn invoke(
        &self,
        prompt: &str,
        params: &GenerationConfig,
    ) -> Result<RawCompletion, BackendError> {
        self.complete(TUTOR_SYSTEM_PROMPT, prompt, params).await
    }

    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationConfig,
    ) -> Result<RawCompletion, BackendError>;

    async fn health_check(&self, params: &GenerationConfig) -> Result<(), BackendError>;
}

/// Constructs the concrete backend for `kind` from the loaded configuration.
pub fn build_backend(kind: BackendKind, cfg: &AppConfig) -> anyhow::Result<Arc<dyn TextBackend>> {
    let settings = cfg.backend_settings(kind);
    let connect = Duration::from_millis(cfg.connect_timeout_ms);
    let request = Duration::from_millis(cfg.timeout_ms);
    let backend: Arc<dyn TextBackend> = match kind {
        BackendKind::Ollama => Arc::new(OllamaBackend::new(&settings.base_url, connect, request)?),
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(
            &settings.base_url,
            settings.api_key.clone(),
            connect,
            request,
        )?),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(
            &settings.base_url,
            settings.api_key.clone(),
            connect,
            request,
        )?),
    };
    Ok(backend)
}
