//! Shared logging configuration and initialization.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::pipeline::{ExperimentConfig, ExperimentRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("TSCAST_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("TSCAST_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("TSCAST_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_run_start(logging: &LoggingConfig, experiment: &ExperimentConfig, input: &Path) {
    info!(
        component = "tscast_run",
        event = "run.start",
        log_level = %logging.level,
        log_format = ?logging.format,
        input = %input.display(),
        dataset = %experiment.dataset,
        frequency = %experiment.frequency,
        impute = %experiment.impute,
        prompt_type = experiment.prompt_type.as_str(),
        ts_format = experiment.ts_format.as_str(),
        ts_type = experiment.ts_type.as_str(),
        periods = experiment.split.periods
    );
}

pub fn log_run_finish(record: &ExperimentRecord, stored_id: Option<i64>) {
    match stored_id {
        Some(id) => info!(
            component = "tscast_run",
            event = "run.finish",
            model = %record.model,
            smape = record.metrics.smape,
            mae = record.metrics.mae,
            rmse = record.metrics.rmse,
            stored_id = id
        ),
        None => info!(
            component = "tscast_run",
            event = "run.finish",
            model = %record.model,
            smape = record.metrics.smape,
            mae = record.metrics.mae,
            rmse = record.metrics.rmse
        ),
    }
    if record.parse_skipped > 0 || record.used_fallback {
        warn!(
            component = "tscast_run",
            event = "run.degraded_parse",
            parse_skipped = record.parse_skipped,
            used_fallback = record.used_fallback
        );
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
