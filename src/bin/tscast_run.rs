use std::path::{Path, PathBuf};
use std::str::FromStr;

use tscast::{
    init_logging, load_data, log_run_finish, log_run_start, logging_config_from_env,
    parse_timestamp, run_experiment, ExperimentConfig, Frequency, HistoryStore,
    OpenAiCompatibleProvider, ProviderConfig, SplitSpec,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let input = PathBuf::from(required("TSCAST_INPUT")?);
    let experiment = experiment_from_env(&input)?;
    log_run_start(&logging_cfg, &experiment, &input);

    let provider = OpenAiCompatibleProvider::new(ProviderConfig {
        base_url: optional("TSCAST_BASE_URL").unwrap_or_else(|| ProviderConfig::default().base_url),
        model: required("TSCAST_MODEL")?,
        api_key: optional("TSCAST_API_KEY"),
        timeout_ms: parsed_or("TSCAST_TIMEOUT_MS", ProviderConfig::default().timeout_ms)?,
        system_prompt: optional("TSCAST_SYSTEM_PROMPT"),
    })?;

    let raw = load_data(&input)?;
    let record = run_experiment(&raw, &experiment, &provider)?;

    let stored_id = match optional("TSCAST_HISTORY_DB") {
        Some(path) => Some(HistoryStore::open(path)?.insert(&record)?),
        None => None,
    };
    log_run_finish(&record, stored_id);

    println!(
        "{} | {} {} {} | periods={} smape={:.4} mae={:.4} rmse={:.4} tokens={}/{} time={:.2}s",
        record.dataset,
        record.prompt_type,
        record.ts_format,
        record.ts_type,
        record.periods,
        record.metrics.smape,
        record.metrics.mae,
        record.metrics.rmse,
        record.prompt_tokens,
        record.response_tokens,
        record.response_time_seconds
    );
    Ok(())
}

fn experiment_from_env(input: &Path) -> Result<ExperimentConfig, Box<dyn std::error::Error>> {
    let dataset = optional("TSCAST_DATASET").unwrap_or_else(|| {
        input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string())
    });
    let split = SplitSpec {
        start_date: date_var("TSCAST_START_DATE")?,
        end_date: date_var("TSCAST_END_DATE")?,
        periods: parsed("TSCAST_PERIODS")?,
    };
    let frequency: Frequency = parsed_or("TSCAST_FREQUENCY", Frequency::Hours(1))?;

    let mut cfg = ExperimentConfig::new(dataset, frequency, split);
    if let Some(date_col) = optional("TSCAST_DATE_COL") {
        cfg.preprocessing.date_col = date_col;
    }
    if let Some(value_col) = optional("TSCAST_VALUE_COL") {
        cfg.preprocessing.value_col = value_col;
    }
    cfg.preprocessing.duplicates = parsed_or("TSCAST_DUPLICATES", cfg.preprocessing.duplicates)?;
    cfg.impute = parsed_or("TSCAST_IMPUTE", cfg.impute)?;
    cfg.prompt_type = parsed_or("TSCAST_PROMPT_TYPE", cfg.prompt_type)?;
    cfg.ts_format = parsed_or("TSCAST_TS_FORMAT", cfg.ts_format)?;
    cfg.ts_type = parsed_or("TSCAST_TS_TYPE", cfg.ts_type)?;
    cfg.prompt_params.sampling = parsed_or("TSCAST_SAMPLING", cfg.prompt_params.sampling)?;
    cfg.prompt_params.examples = parsed_or("TSCAST_EXAMPLES", cfg.prompt_params.examples)?;
    cfg.prompt_params.decimals = parsed_or("TSCAST_DECIMALS", cfg.prompt_params.decimals)?;
    if let Some(seed) = optional("TSCAST_SEED") {
        cfg.prompt_params.seed = Some(seed.parse()?);
    }
    cfg.temperature = parsed_or("TSCAST_TEMPERATURE", cfg.temperature)?;
    cfg.max_tokens = parsed_or("TSCAST_MAX_TOKENS", cfg.max_tokens)?;
    Ok(cfg)
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn required(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    optional(key).ok_or_else(|| format!("{key} must be set").into())
}

fn parsed<T>(key: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = required(key)?;
    raw.parse::<T>()
        .map_err(|err| format!("{key}={raw} is invalid: {err}").into())
}

fn parsed_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(_) => parsed(key),
        None => Ok(default),
    }
}

fn date_var(key: &str) -> Result<chrono::NaiveDateTime, Box<dyn std::error::Error>> {
    let raw = required(key)?;
    parse_timestamp(&raw).ok_or_else(|| format!("{key}={raw} is not a date").into())
}
