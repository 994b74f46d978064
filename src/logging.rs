use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter for `level`; an invalid directive falls back to `info`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: stderr output (plain or JSON) plus an
/// optional plain-text file with source locations.
pub fn init_logging(level: &str, log_file: Option<&Path>, json: bool) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = Arc::new(
                File::create(path)
                    .with_context(|| format!("create log file {}", path.display()))?,
            );
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(file),
            )
        }
        None => None,
    };
    let stderr_json = json.then(|| fmt::layer().json().with_writer(io::stderr));
    let stderr_plain = (!json).then(|| fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_json)
        .with(stderr_plain)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    info!(filter = level, "logging initialized");
    Ok(())
}

/// Runs `f` under a temporary plain-text subscriber writing to `writer`.
/// Config loading runs before [`init_logging`] and its warnings go here.
pub fn with_startup_logging<W, T>(level: &str, writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = fmt()
        .with_env_filter(env_filter(level))
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

