use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifies one of the supported text-generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local model runner (Ollama HTTP API)
    Ollama,
    /// OpenAI chat completions
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini generateContent
    Gemini,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Ollama, BackendKind::Gemini, BackendKind::OpenAi];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAi => "openai",
            BackendKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(BackendKind::Ollama),
            "openai" => Ok(BackendKind::OpenAi),
            "gemini" | "google" => Ok(BackendKind::Gemini),
            other => Err(format!(
                "unknown AI service '{other}' (expected ollama, openai or gemini)"
            )),
        }
    }
}

/// Per-backend generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for one backend call, enforced by the orchestrator.
    pub timeout: Duration,
}

/// Text returned by a backend for one prompt.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub backend: BackendKind,
    pub model: String,
    pub latency: Duration,
}

/// Persona sent as the system instruction for breakdown generation.
pub const TUTOR_SYSTEM_PROMPT: &str = "You are an expert personal tutor who breaks down complex tasks into extremely detailed, beginner-friendly step-by-step guides. You handle both software development tasks and hardware/electronics tasks (ESP32, Arduino, Raspberry Pi, sensors, LEDs). Tell the learner where to go, what to do, how to do it, what to expect and how to verify it. Assume the learner knows nothing.";

/// Persona for single-step instruction requests.
pub const INSTRUCTIONS_SYSTEM_PROMPT: &str =
    "You are an expert at creating detailed, beginner-friendly instructions.";
