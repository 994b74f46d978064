use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use task_breakdown::breakdown::{BreakdownOrchestrator, GenerationError, TaskDescription};
use task_breakdown::config::{AppConfig, ConfigOverrides, parse_backend_list};
use task_breakdown::llm::BackendKind;
use task_breakdown::logging::{init_logging, with_startup_logging};

#[derive(Parser, Debug)]
#[command(
    name = "tbk",
    version,
    about = "Turn a task description into a beginner-friendly step-by-step guide"
)]
struct Cli {
    /// Global config file (default: <config_dir>/task-breakdown/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Primary AI backend (ollama, gemini, openai)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Comma-separated fallback order, e.g. "gemini,openai"
    #[arg(long, global = true)]
    order: Option<String>,

    /// Per-backend timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log level (error,warn,info,debug,trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit stderr logs as JSON
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a guide for a task ("-" reads the description from stdin)
    Generate {
        /// Use this title instead of the generated one
        #[arg(long)]
        title: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
    },
    /// Detailed instructions for a single step
    Instructions {
        #[arg(long)]
        title: String,

        #[arg(long)]
        description: String,

        #[arg(long, default_value = "")]
        context: String,
    },
    /// Probe every configured backend
    Check,
    /// Print the resolved configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();
    let cli = Cli::parse();

    let backend_order = cli
        .order
        .as_deref()
        .map(parse_backend_list)
        .transpose()
        .context("parse --order")?;
    let startup_level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("TASK_BREAKDOWN_LOG").ok())
        .unwrap_or_else(|| "warn".to_string());
    let cfg = with_startup_logging(&startup_level, std::io::stderr, || {
        AppConfig::load(ConfigOverrides {
            config_path: cli.config.clone(),
            primary: cli.backend,
            backend_order,
            timeout_ms: cli.timeout_ms,
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
        })
    })?;
    init_logging(&cfg.log_level, cfg.log_file.as_deref(), cli.log_json)?;
    info!(?cfg, "app config");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::Generate {
            title,
            format,
            description,
        } => run_generate(&cfg, &cancel, title, format, description).await,
        Command::Instructions {
            title,
            description,
            context,
        } => {
            let orch = BreakdownOrchestrator::from_config(&cfg)?;
            match orch
                .generate_step_instructions(&title, &description, &context, &cancel)
                .await
            {
                Ok(text) => {
                    println!("{text}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_failure(&e)),
            }
        }
        Command::Check => {
            let orch = BreakdownOrchestrator::from_config(&cfg)?;
            let report = orch.health_report().await;
            for entry in &report {
                match &entry.status {
                    Ok(()) => println!(
                        "{:<7} {:<20} ok ({} ms)",
                        entry.backend,
                        entry.model,
                        entry.latency.as_millis()
                    ),
                    Err(e) => println!("{:<7} {:<20} {e}", entry.backend, entry.model),
                }
            }
            if report.iter().any(|e| e.status.is_ok()) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Config => {
            println!("{cfg:#?}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_generate(
    cfg: &AppConfig,
    cancel: &CancellationToken,
    title: Option<String>,
    format: OutputFormat,
    words: Vec<String>,
) -> Result<ExitCode> {
    let text = if words.len() == 1 && words[0] == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("read description from stdin")?;
        buf
    } else {
        words.join(" ")
    };
    let description = TaskDescription::new(text)?;
    let orch = BreakdownOrchestrator::from_config(cfg)?;

    match orch.generate_with_report(&description, cancel).await {
        Ok(report) => {
            info!(
                request_id = %report.request_id,
                backend = %report.backend,
                model = %report.model,
                failed_attempts = report.failures.len(),
                "guide ready"
            );
            let breakdown = report.breakdown.with_title(title.as_deref());
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&breakdown)?),
                OutputFormat::Text => print!("{breakdown}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

fn report_failure(err: &GenerationError) -> ExitCode {
    error!(status = err.status_code(), error = %err, "generation failed");
    match err {
        GenerationError::Cancelled => ExitCode::from(130),
        GenerationError::Exhausted { .. } => {
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}
