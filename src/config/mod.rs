use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::breakdown::prompt::DEFAULT_MAX_DESCRIPTION_CHARS;
use crate::llm::{BackendKind, GenerationConfig};

pub const PROJECT_CONFIG_DIR: &str = ".task-breakdown";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_TOKENS: u32 = 4_000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Backends in the order they are attempted; the primary comes first.
    pub backend_order: Vec<BackendKind>,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_description_chars: usize,
    pub ollama: BackendSettings,
    pub openai: BackendSettings,
    pub gemini: BackendSettings,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

#[derive(Clone, PartialEq)]
pub struct BackendSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

// api keys never reach the logs
impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl BackendSettings {
    fn defaults_for(kind: BackendKind) -> Self {
        let (base_url, model) = match kind {
            BackendKind::Ollama => ("http://localhost:11434", "llama3.2"),
            BackendKind::OpenAi => ("https://api.openai.com/v1", "gpt-4o-mini"),
            BackendKind::Gemini => (
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-1.5-flash",
            ),
        };
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_order: default_backend_order(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_description_chars: DEFAULT_MAX_DESCRIPTION_CHARS,
            ollama: BackendSettings::defaults_for(BackendKind::Ollama),
            openai: BackendSettings::defaults_for(BackendKind::OpenAi),
            gemini: BackendSettings::defaults_for(BackendKind::Gemini),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

pub fn default_backend_order() -> Vec<BackendKind> {
    vec![BackendKind::Ollama, BackendKind::Gemini, BackendKind::OpenAi]
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub backend_order: Option<Vec<BackendKind>>,
    pub primary: Option<BackendKind>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_description_chars: Option<usize>,
    pub ollama: Option<PartialBackendSettings>,
    pub openai: Option<PartialBackendSettings>,
    pub gemini: Option<PartialBackendSettings>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialBackendSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl FileConfig {
    fn backend(&self, kind: BackendKind) -> Option<&PartialBackendSettings> {
        match kind {
            BackendKind::Ollama => self.ollama.as_ref(),
            BackendKind::OpenAi => self.openai.as_ref(),
            BackendKind::Gemini => self.gemini.as_ref(),
        }
    }
}

/// Values supplied on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub primary: Option<BackendKind>,
    pub backend_order: Option<Vec<BackendKind>>,
    pub timeout_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    /// Resolves configuration once at process start.
    ///
    /// Priority: CLI overrides, environment, project config
    /// (`.task-breakdown/config.toml`), global config, defaults.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let project_root = std::env::current_dir().context("resolve current dir")?;
        let project_cfg = load_project_config(&project_root).unwrap_or_default();
        let file_cfg = load_file_config(overrides.config_path.as_deref())?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(overrides, &env, project_cfg, file_cfg)
    }

    pub fn from_sources(
        overrides: ConfigOverrides,
        env: &HashMap<String, String>,
        project_cfg: FileConfig,
        file_cfg: FileConfig,
    ) -> Result<Self> {
        let defaults = AppConfig::default();
        let env_get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut backend_order = match overrides.backend_order {
            Some(order) => order,
            None => match env_get("AI_SERVICE_ORDER") {
                Some(raw) => parse_backend_list(raw).context("parse AI_SERVICE_ORDER")?,
                None => project_cfg
                    .backend_order
                    .clone()
                    .or_else(|| file_cfg.backend_order.clone())
                    .unwrap_or_else(default_backend_order),
            },
        };

        let primary = match overrides.primary {
            Some(kind) => Some(kind),
            None => match env_get("AI_SERVICE") {
                Some(raw) => Some(
                    raw.parse::<BackendKind>()
                        .map_err(anyhow::Error::msg)
                        .context("parse AI_SERVICE")?,
                ),
                None => project_cfg.primary.or(file_cfg.primary),
            },
        };
        if let Some(primary) = primary {
            backend_order.retain(|k| *k != primary);
            backend_order.insert(0, primary);
        }
        dedup_in_order(&mut backend_order);
        if backend_order.is_empty() {
            anyhow::bail!("backend_order must name at least one AI service");
        }

        let timeout_ms = match overrides.timeout_ms {
            Some(ms) => ms,
            None => match env_get("TASK_BREAKDOWN_TIMEOUT_MS") {
                Some(raw) => raw
                    .parse::<u64>()
                    .with_context(|| format!("parse TASK_BREAKDOWN_TIMEOUT_MS={raw}"))?,
                None => project_cfg
                    .timeout_ms
                    .or(file_cfg.timeout_ms)
                    .unwrap_or(defaults.timeout_ms),
            },
        };
        if timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }

        let connect_timeout_ms = project_cfg
            .connect_timeout_ms
            .or(file_cfg.connect_timeout_ms)
            .unwrap_or(defaults.connect_timeout_ms);
        let max_description_chars = project_cfg
            .max_description_chars
            .or(file_cfg.max_description_chars)
            .unwrap_or(defaults.max_description_chars);

        let ollama = merge_backend(
            BackendKind::Ollama,
            env_get("OLLAMA_HOST"),
            env_get("OLLAMA_MODEL"),
            None,
            &project_cfg,
            &file_cfg,
        );
        let openai = merge_backend(
            BackendKind::OpenAi,
            env_get("OPENAI_BASE_URL"),
            env_get("OPENAI_MODEL"),
            env_get("OPENAI_API_KEY"),
            &project_cfg,
            &file_cfg,
        );
        let gemini = merge_backend(
            BackendKind::Gemini,
            env_get("GEMINI_BASE_URL"),
            env_get("GEMINI_MODEL"),
            env_get("GEMINI_API_KEY"),
            &project_cfg,
            &file_cfg,
        );

        let log_level = overrides
            .log_level
            .or_else(|| env_get("TASK_BREAKDOWN_LOG").map(String::from))
            .or(project_cfg.log_level.clone())
            .or(file_cfg.log_level.clone())
            .unwrap_or(defaults.log_level);
        let log_file = overrides
            .log_file
            .or(project_cfg.log_file.clone())
            .or(file_cfg.log_file.clone());

        Ok(Self {
            backend_order,
            timeout_ms,
            connect_timeout_ms,
            max_description_chars,
            ollama,
            openai,
            gemini,
            log_level,
            log_file,
        })
    }

    pub fn backend_settings(&self, kind: BackendKind) -> &BackendSettings {
        match kind {
            BackendKind::Ollama => &self.ollama,
            BackendKind::OpenAi => &self.openai,
            BackendKind::Gemini => &self.gemini,
        }
    }

    pub fn generation_config(&self, kind: BackendKind) -> GenerationConfig {
        let settings = self.backend_settings(kind);
        GenerationConfig {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

fn merge_backend(
    kind: BackendKind,
    env_base_url: Option<&str>,
    env_model: Option<&str>,
    env_api_key: Option<&str>,
    project_cfg: &FileConfig,
    file_cfg: &FileConfig,
) -> BackendSettings {
    let defaults = BackendSettings::defaults_for(kind);
    let project = project_cfg.backend(kind);
    let global = file_cfg.backend(kind);
    let pick = |f: fn(&PartialBackendSettings) -> Option<String>| {
        project.and_then(f).or_else(|| global.and_then(f))
    };

    BackendSettings {
        base_url: env_base_url
            .map(String::from)
            .or_else(|| pick(|p| p.base_url.clone()))
            .unwrap_or(defaults.base_url),
        model: env_model
            .map(String::from)
            .or_else(|| pick(|p| p.model.clone()))
            .unwrap_or(defaults.model),
        api_key: env_api_key
            .map(String::from)
            .or_else(|| pick(|p| p.api_key.clone())),
        max_tokens: project
            .and_then(|p| p.max_tokens)
            .or_else(|| global.and_then(|p| p.max_tokens))
            .unwrap_or(defaults.max_tokens),
        temperature: project
            .and_then(|p| p.temperature)
            .or_else(|| global.and_then(|p| p.temperature))
            .unwrap_or(defaults.temperature),
    }
}

/// Parses a comma separated list such as `gemini,ollama`.
pub fn parse_backend_list(raw: &str) -> Result<Vec<BackendKind>> {
    let mut out = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        out.push(name.parse::<BackendKind>().map_err(anyhow::Error::msg)?);
    }
    if out.is_empty() {
        anyhow::bail!("empty AI service list");
    }
    Ok(out)
}

fn dedup_in_order(order: &mut Vec<BackendKind>) {
    let mut seen = Vec::with_capacity(order.len());
    order.retain(|k| {
        if seen.contains(k) {
            false
        } else {
            seen.push(*k);
            true
        }
    });
}

/// Loads the global configuration file.
///
/// An explicit path must exist and parse; the implicit locations are skipped
/// with a warning when unreadable.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(p) = explicit {
        let s = fs::read_to_string(p)
            .with_context(|| format!("read config file: {}", p.display()))?;
        let cfg = toml::from_str::<FileConfig>(&s)
            .with_context(|| format!("parse config file: {}", p.display()))?;
        info!(path=%p.display(), "loaded config file");
        return Ok(cfg);
    }

    for p in candidate_paths() {
        if p.exists() {
            let s = fs::read_to_string(&p)
                .with_context(|| format!("read config file: {}", p.display()))?;
            match toml::from_str::<FileConfig>(&s) {
                Ok(cfg) => {
                    info!(path=%p.display(), "loaded config file");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(path=%p.display(), error=%e.to_string(), "parse config failed");
                    continue;
                }
            }
        }
    }
    Ok(FileConfig::default())
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut v = Vec::new();
    if let Ok(p) = std::env::var("TASK_BREAKDOWN_CONFIG") {
        v.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs::config_dir() {
        v.push(dir.join("task-breakdown").join(CONFIG_FILE_NAME));
    }
    v
}

/// Load project-specific configuration from .task-breakdown/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let project_config_path = project_root.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE_NAME);

    if project_config_path.exists() {
        let s = fs::read_to_string(&project_config_path).with_context(|| {
            format!(
                "read project config file: {}",
                project_config_path.display()
            )
        })?;
        match toml::from_str::<FileConfig>(&s) {
            Ok(cfg) => {
                info!(path=%project_config_path.display(), "loaded project config file");
                Ok(cfg)
            }
            Err(e) => {
                warn!(path=%project_config_path.display(), error=%e.to_string(), "parse project config failed");
                Ok(FileConfig::default())
            }
        }
    } else {
        Ok(FileConfig::default())
    }
}
