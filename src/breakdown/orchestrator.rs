use anyhow::{Result, ensure};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::llm::{
    BackendError, BackendKind, GenerationConfig, INSTRUCTIONS_SYSTEM_PROMPT, RawCompletion,
    TUTOR_SYSTEM_PROMPT, TextBackend, build_backend,
};

use super::parser::{ParseError, parse_with_description};
use super::prompt::PromptBuilder;
use super::types::{GenerationRequest, TaskBreakdown, TaskDescription};

/// The only failure text shown to end users.
pub const USER_MESSAGE: &str =
    "Could not generate a guide. Please try again, or switch to a different AI service.";

/// Output budget for single-step instructions, which are much shorter than guides.
pub const STEP_INSTRUCTIONS_MAX_TOKENS: u32 = 1000;

/// A configured backend together with its generation parameters.
#[derive(Clone)]
pub struct BackendSlot {
    pub backend: Arc<dyn TextBackend>,
    pub params: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Why one backend attempt did not produce a breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub backend: BackendKind,
    pub model: String,
    pub reason: FailureReason,
    pub elapsed: Duration,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) after {} ms: {}",
            self.backend,
            self.model,
            self.elapsed.as_millis(),
            self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("all {count} backends failed: {summary}", count = .attempts.len(), summary = summarize(.attempts))]
    Exhausted { attempts: Vec<AttemptFailure> },
    #[error("generation cancelled")]
    Cancelled,
}

fn summarize(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GenerationError {
    /// HTTP status an outer service layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GenerationError::Cancelled => 499,
            GenerationError::Exhausted { attempts } => {
                let rate_limited = !attempts.is_empty()
                    && attempts.iter().all(|a| {
                        matches!(a.reason, FailureReason::Backend(BackendError::RateLimited(_)))
                    });
                let connectivity = attempts.iter().any(|a| {
                    matches!(&a.reason, FailureReason::Backend(e) if e.is_connectivity())
                });
                if rate_limited {
                    429
                } else if connectivity {
                    502
                } else {
                    500
                }
            }
        }
    }

    pub fn user_message(&self) -> &'static str {
        USER_MESSAGE
    }
}

/// A successful generation plus the diagnostics gathered on the way.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub request_id: Uuid,
    pub breakdown: TaskBreakdown,
    pub backend: BackendKind,
    pub model: String,
    pub failures: Vec<AttemptFailure>,
}

#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub backend: BackendKind,
    pub model: String,
    pub status: Result<(), BackendError>,
    pub latency: Duration,
}

enum AttemptError {
    Cancelled,
    Failed(FailureReason),
}

impl From<BackendError> for AttemptError {
    fn from(e: BackendError) -> Self {
        AttemptError::Failed(e.into())
    }
}

/// Runs prompt building, backend invocation and parsing with one-pass
/// fallback across the configured backends.
///
/// Holds no mutable state; concurrent calls share it through `&self`.
pub struct BreakdownOrchestrator {
    slots: Vec<BackendSlot>,
    prompts: PromptBuilder,
}

impl BreakdownOrchestrator {
    pub fn new(slots: Vec<BackendSlot>, prompts: PromptBuilder) -> Result<Self> {
        ensure!(!slots.is_empty(), "at least one backend must be configured");
        Ok(Self { slots, prompts })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let slots = cfg
            .backend_order
            .iter()
            .map(|&kind| {
                Ok(BackendSlot {
                    backend: build_backend(kind, cfg)?,
                    params: cfg.generation_config(kind),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(slots, PromptBuilder::new(cfg.max_description_chars))
    }

    pub fn backend_order(&self) -> Vec<BackendKind> {
        self.slots.iter().map(|s| s.backend.kind()).collect()
    }

    pub async fn generate(
        &self,
        description: &TaskDescription,
        cancel: &CancellationToken,
    ) -> Result<TaskBreakdown, GenerationError> {
        self.generate_with_report(description, cancel)
            .await
            .map(|report| report.breakdown)
    }

    pub async fn generate_with_report(
        &self,
        description: &TaskDescription,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, GenerationError> {
        let request_id = Uuid::now_v7();
        let span = info_span!("generate", %request_id);
        async move {
            let prompt = self.prompts.build(description.as_str());
            debug!(prompt_chars = prompt.chars().count(), "prompt built");

            let mut failures = Vec::new();
            for slot in &self.slots {
                let request = GenerationRequest {
                    description,
                    prompt: &prompt,
                    backend: slot.backend.kind(),
                    params: &slot.params,
                };
                let started = Instant::now();
                match attempt(slot.backend.as_ref(), &request, cancel).await {
                    Ok(breakdown) => {
                        info!(
                            backend = %request.backend,
                            steps = breakdown.steps.len(),
                            complexity = breakdown.complexity_score,
                            failed_attempts = failures.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "breakdown generated"
                        );
                        return Ok(GenerationReport {
                            request_id,
                            breakdown,
                            backend: request.backend,
                            model: slot.params.model.clone(),
                            failures,
                        });
                    }
                    Err(AttemptError::Cancelled) => {
                        info!(backend = %request.backend, "generation cancelled");
                        return Err(GenerationError::Cancelled);
                    }
                    Err(AttemptError::Failed(reason)) => {
                        warn!(backend = %request.backend, %reason, "backend attempt failed, advancing");
                        failures.push(AttemptFailure {
                            backend: request.backend,
                            model: slot.params.model.clone(),
                            reason,
                            elapsed: started.elapsed(),
                        });
                    }
                }
            }
            warn!(attempts = failures.len(), "all backends exhausted");
            Err(GenerationError::Exhausted { attempts: failures })
        }
        .instrument(span)
        .await
    }

    /// Detailed instructions for a single step. Falls back to a generic
    /// two-line outline when no backend answers.
    pub async fn generate_step_instructions(
        &self,
        title: &str,
        description: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let span = info_span!("step_instructions", request_id = %Uuid::now_v7());
        async move {
            let prompt = self.prompts.build_step_instructions(title, description, context);
            for slot in &self.slots {
                let params = GenerationConfig {
                    max_tokens: STEP_INSTRUCTIONS_MAX_TOKENS,
                    ..slot.params.clone()
                };
                let backend = slot.backend.as_ref();
                match bounded_invoke(backend, INSTRUCTIONS_SYSTEM_PROMPT, &prompt, &params, cancel)
                    .await
                {
                    Ok(raw) => {
                        let text = raw.text.trim();
                        if !text.is_empty() {
                            return Ok(text.to_string());
                        }
                    }
                    Err(AttemptError::Cancelled) => return Err(GenerationError::Cancelled),
                    Err(AttemptError::Failed(reason)) => {
                        warn!(backend = %slot.backend.kind(), %reason, "step instructions attempt failed");
                    }
                }
            }
            warn!("no backend produced step instructions, using fallback");
            Ok(fallback_instructions(description))
        }
        .instrument(span)
        .await
    }

    /// Probes every configured backend once, in order.
    pub async fn health_report(&self) -> Vec<BackendHealth> {
        let mut report = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let started = Instant::now();
            let status = match tokio::time::timeout(
                slot.params.timeout,
                slot.backend.health_check(&slot.params),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(timeout_error(slot.params.timeout)),
            };
            debug!(backend = %slot.backend.kind(), ok = status.is_ok(), "health check finished");
            report.push(BackendHealth {
                backend: slot.backend.kind(),
                model: slot.params.model.clone(),
                status,
                latency: started.elapsed(),
            });
        }
        report
    }
}

pub fn fallback_instructions(description: &str) -> String {
    format!(
        "1. {}\n2. Follow the standard process for this type of task.",
        description.trim()
    )
}

async fn attempt(
    backend: &dyn TextBackend,
    request: &GenerationRequest<'_>,
    cancel: &CancellationToken,
) -> Result<TaskBreakdown, AttemptError> {
    debug!(backend = %request.backend, model = %request.params.model, "invoking backend");
    let raw = bounded_invoke(
        backend,
        TUTOR_SYSTEM_PROMPT,
        request.prompt,
        request.params,
        cancel,
    )
    .await?;
    debug!(
        backend = %request.backend,
        response_chars = raw.text.chars().count(),
        latency_ms = raw.latency.as_millis() as u64,
        "parsing response"
    );
    parse_with_description(&raw.text, request.description.as_str())
        .map_err(|e| AttemptError::Failed(e.into()))
}

async fn bounded_invoke(
    backend: &dyn TextBackend,
    system: &str,
    prompt: &str,
    params: &GenerationConfig,
    cancel: &CancellationToken,
) -> Result<RawCompletion, AttemptError> {
    let call = backend.complete(system, prompt, params);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AttemptError::Cancelled),
        res = tokio::time::timeout(params.timeout, call) => match res {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(timeout_error(params.timeout).into()),
        },
    }
}

fn timeout_error(limit: Duration) -> BackendError {
    BackendError::Timeout(format!("no response within {} ms", limit.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Fail(BackendError),
        Reply(String),
        Sleep(Duration),
    }

    struct MockBackend {
        kind: BackendKind,
        behavior: Behavior,
        calls: AtomicUsize,
        // (system prompt, max_tokens) of the latest call
        last_call: Mutex<Option<(String, u32)>>,
    }

    impl MockBackend {
        fn new(kind: BackendKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                calls: AtomicUsize::new(0),
                last_call: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextBackend for MockBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn complete(
            &self,
            system: &str,
            _prompt: &str,
            params: &GenerationConfig,
        ) -> Result<RawCompletion, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_call.lock().unwrap() = Some((system.to_string(), params.max_tokens));
            match &self.behavior {
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Reply(text) => Ok(RawCompletion {
                    text: text.clone(),
                    backend: self.kind,
                    model: params.model.clone(),
                    latency: Duration::from_millis(1),
                }),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Err(BackendError::EmptyResponse)
                }
            }
        }

        async fn health_check(&self, _params: &GenerationConfig) -> Result<(), BackendError> {
            match &self.behavior {
                Behavior::Fail(e) => Err(e.clone()),
                _ => Ok(()),
            }
        }
    }

    fn params(timeout: Duration) -> GenerationConfig {
        GenerationConfig {
            model: "test-model".into(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout,
        }
    }

    fn orchestrator(backends: &[Arc<MockBackend>], timeout: Duration) -> BreakdownOrchestrator {
        let slots = backends
            .iter()
            .map(|b| BackendSlot {
                backend: b.clone() as Arc<dyn TextBackend>,
                params: params(timeout),
            })
            .collect();
        BreakdownOrchestrator::new(slots, PromptBuilder::default()).unwrap()
    }

    fn valid_payload(steps: usize) -> String {
        let steps: Vec<_> = (1..=steps)
            .map(|i| {
                let deps: Vec<usize> = (1..i).rev().take(1).collect();
                serde_json::json!({
                    "step_number": i,
                    "title": format!("Step {i}"),
                    "description": format!("Do part {i}"),
                    "estimated_time": 10,
                    "dependencies": deps
                })
            })
            .collect();
        let payload = serde_json::json!({"title": "Set up a web server", "steps": steps});
        format!("Here is your guide:\n{payload}\nGood luck!")
    }

    fn description() -> TaskDescription {
        TaskDescription::new("Set up an nginx web server on Ubuntu").unwrap()
    }

    fn unreachable() -> BackendError {
        BackendError::Unreachable("connection refused".into())
    }

    #[tokio::test]
    async fn falls_back_past_unreachable_and_malformed() {
        let ollama = MockBackend::new(BackendKind::Ollama, Behavior::Fail(unreachable()));
        let gemini = MockBackend::new(
            BackendKind::Gemini,
            Behavior::Reply("I cannot produce JSON today.".into()),
        );
        let openai = MockBackend::new(BackendKind::OpenAi, Behavior::Reply(valid_payload(4)));
        let orch = orchestrator(
            &[ollama.clone(), gemini.clone(), openai.clone()],
            Duration::from_secs(5),
        );

        let report = orch
            .generate_with_report(&description(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.backend, BackendKind::OpenAi);
        assert_eq!(report.breakdown.steps.len(), 4);
        assert_eq!(report.breakdown.estimated_total_time, Some(40));
        assert_eq!(
            report.breakdown.description,
            "Set up an nginx web server on Ubuntu"
        );
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].backend, BackendKind::Ollama);
        assert_eq!(
            report.failures[0].reason,
            FailureReason::Backend(unreachable())
        );
        assert_eq!(report.failures[1].backend, BackendKind::Gemini);
        assert!(matches!(
            report.failures[1].reason,
            FailureReason::Parse(ParseError::MalformedPayload(_))
        ));
        assert_eq!(
            (ollama.calls(), gemini.calls(), openai.calls()),
            (1, 1, 1)
        );
    }

    #[tokio::test]
    async fn all_unreachable_exhausts_once() {
        let backends: Vec<_> = BackendKind::ALL
            .iter()
            .map(|&k| MockBackend::new(k, Behavior::Fail(unreachable())))
            .collect();
        let orch = orchestrator(&backends, Duration::from_secs(5));

        let err = orch
            .generate(&description(), &CancellationToken::new())
            .await
            .unwrap_err();

        let GenerationError::Exhausted { attempts } = &err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert_eq!(attempts.len(), 3);
        assert!(
            attempts
                .iter()
                .all(|a| a.reason == FailureReason::Backend(unreachable()))
        );
        assert!(backends.iter().all(|b| b.calls() == 1));
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.user_message(), USER_MESSAGE);
    }

    #[tokio::test]
    async fn first_success_stops_fallback() {
        let first = MockBackend::new(BackendKind::Gemini, Behavior::Reply(valid_payload(2)));
        let second = MockBackend::new(BackendKind::OpenAi, Behavior::Reply(valid_payload(3)));
        let orch = orchestrator(&[first.clone(), second.clone()], Duration::from_secs(5));

        let breakdown = orch
            .generate(&description(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(breakdown.steps.len(), 2);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn empty_step_list_advances() {
        let empty = MockBackend::new(
            BackendKind::Ollama,
            Behavior::Reply(r#"{"title": "Nothing", "steps": []}"#.into()),
        );
        let good = MockBackend::new(BackendKind::Gemini, Behavior::Reply(valid_payload(1)));
        let orch = orchestrator(&[empty, good], Duration::from_secs(5));

        let report = orch
            .generate_with_report(&description(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            report.failures[0].reason,
            FailureReason::Parse(ParseError::NoValidSteps)
        );
    }

    #[tokio::test]
    async fn slow_backend_times_out_and_advances() {
        let slow = MockBackend::new(BackendKind::Ollama, Behavior::Sleep(Duration::from_secs(5)));
        let good = MockBackend::new(BackendKind::OpenAi, Behavior::Reply(valid_payload(2)));
        let orch = orchestrator(&[slow, good], Duration::from_millis(20));

        let report = orch
            .generate_with_report(&description(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.backend, BackendKind::OpenAi);
        assert!(matches!(
            report.failures[0].reason,
            FailureReason::Backend(BackendError::Timeout(_))
        ));
        assert!(report.failures[0].elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_call() {
        let slow = MockBackend::new(BackendKind::Ollama, Behavior::Sleep(Duration::from_secs(5)));
        let next = MockBackend::new(BackendKind::OpenAi, Behavior::Reply(valid_payload(2)));
        let orch = orchestrator(&[slow, next.clone()], Duration::from_secs(10));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = orch.generate(&description(), &cancel).await.unwrap_err();
        assert_eq!(err, GenerationError::Cancelled);
        assert_eq!(err.status_code(), 499);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(next.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_calls_nothing() {
        let backend = MockBackend::new(BackendKind::Gemini, Behavior::Reply(valid_payload(2)));
        let orch = orchestrator(&[backend.clone()], Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orch.generate(&description(), &cancel).await.unwrap_err();
        assert_eq!(err, GenerationError::Cancelled);
    }

    #[tokio::test]
    async fn status_codes_reflect_failures() {
        let limited = |k| MockBackend::new(k, Behavior::Fail(BackendError::RateLimited("429".into())));
        let orch = orchestrator(
            &[limited(BackendKind::Gemini), limited(BackendKind::OpenAi)],
            Duration::from_secs(5),
        );
        let err = orch
            .generate(&description(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 429);

        let orch = orchestrator(
            &[
                limited(BackendKind::Gemini),
                MockBackend::new(
                    BackendKind::OpenAi,
                    Behavior::Fail(BackendError::Unauthorized("bad key".into())),
                ),
            ],
            Duration::from_secs(5),
        );
        let err = orch
            .generate(&description(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("all 2 backends failed"));
    }

    #[tokio::test]
    async fn step_instructions_use_first_answer() {
        let empty = MockBackend::new(BackendKind::Ollama, Behavior::Reply("   ".into()));
        let good = MockBackend::new(
            BackendKind::Gemini,
            Behavior::Reply("\n1. Open a terminal\n2. Run apt install nginx\n".into()),
        );
        let orch = orchestrator(&[empty, good], Duration::from_secs(5));
        let text = orch
            .generate_step_instructions(
                "Install nginx",
                "Install the web server",
                "",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "1. Open a terminal\n2. Run apt install nginx");
    }

    #[tokio::test]
    async fn step_instructions_use_own_persona_and_token_cap() {
        let backend = MockBackend::new(BackendKind::Ollama, Behavior::Reply("1. Do it".into()));
        let orch = orchestrator(&[backend.clone()], Duration::from_secs(5));
        orch.generate_step_instructions("Flash", "Flash the board", "", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            backend.last_call.lock().unwrap().clone(),
            Some((INSTRUCTIONS_SYSTEM_PROMPT.to_string(), STEP_INSTRUCTIONS_MAX_TOKENS))
        );

        orch.generate(&description(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            backend.last_call.lock().unwrap().clone(),
            Some((TUTOR_SYSTEM_PROMPT.to_string(), 4000))
        );
    }

    #[tokio::test]
    async fn step_instructions_fall_back() {
        let down = MockBackend::new(BackendKind::Ollama, Behavior::Fail(unreachable()));
        let orch = orchestrator(&[down], Duration::from_secs(5));
        let text = orch
            .generate_step_instructions(
                "Install nginx",
                "Install the web server",
                "Ubuntu 22.04",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            text,
            "1. Install the web server\n2. Follow the standard process for this type of task."
        );
    }

    #[tokio::test]
    async fn health_report_covers_every_backend() {
        let orch = orchestrator(
            &[
                MockBackend::new(BackendKind::Ollama, Behavior::Fail(unreachable())),
                MockBackend::new(BackendKind::Gemini, Behavior::Reply(String::new())),
            ],
            Duration::from_secs(5),
        );
        let report = orch.health_report().await;
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].status, Err(unreachable()));
        assert!(report[1].status.is_ok());
        assert_eq!(
            orch.backend_order(),
            vec![BackendKind::Ollama, BackendKind::Gemini]
        );
    }

    #[test]
    fn empty_slot_list_rejected() {
        assert!(BreakdownOrchestrator::new(Vec::new(), PromptBuilder::default()).is_err());
    }
}
