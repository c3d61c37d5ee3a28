//! One forecasting experiment, end to end.
//!
//! raw table -> standardize -> normalize -> impute -> split -> prompt ->
//! provider -> parse -> metrics.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::formatting::{parse_response, TsFormat, TsType};
use crate::history::prompt_fingerprint;
use crate::imputation::{impute, ImputeStrategy};
use crate::metrics::ForecastMetrics;
use crate::preprocessor::{
    normalize_with_report, split, standardize, GapReport, NormalizeRequest, PreprocessingConfig,
    SplitSegments, SplitSpec,
};
use crate::prompt::{generate, PromptParams, PromptSpec, PromptType};
use crate::provider::ModelProvider;
use crate::statistics::Statistics;
use crate::table::{Frequency, RawTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Label stored with the result, usually the input file name.
    pub dataset: String,
    pub preprocessing: PreprocessingConfig,
    pub frequency: Frequency,
    pub impute: ImputeStrategy,
    pub split: SplitSpec,
    pub prompt_type: PromptType,
    pub ts_format: TsFormat,
    pub ts_type: TsType,
    pub prompt_params: PromptParams,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl ExperimentConfig {
    pub fn new(dataset: impl Into<String>, frequency: Frequency, split: SplitSpec) -> Self {
        Self {
            dataset: dataset.into(),
            preprocessing: PreprocessingConfig::default(),
            frequency,
            impute: ImputeStrategy::Mean,
            split,
            prompt_type: PromptType::ZeroShot,
            ts_format: TsFormat::Array,
            ts_type: TsType::Numeric,
            prompt_params: PromptParams::default(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    pub fn prompt_spec(&self) -> PromptSpec {
        PromptSpec {
            prompt_type: self.prompt_type,
            ts_format: self.ts_format,
            ts_type: self.ts_type,
            periods: self.split.periods,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Row id once stored in a `HistoryStore`.
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub temperature: f64,
    pub dataset: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub periods: usize,
    pub prompt: String,
    pub prompt_fingerprint: String,
    pub prompt_type: PromptType,
    pub ts_format: TsFormat,
    pub ts_type: TsType,
    pub y_val: Vec<f64>,
    pub y_pred: Vec<f64>,
    pub metrics: ForecastMetrics,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub response_time_seconds: f64,
    pub parse_skipped: usize,
    pub used_fallback: bool,
    pub val_stats: Statistics,
    pub pred_stats: Statistics,
}

/// Output of the data-preparation half of an experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSeries {
    pub segments: SplitSegments,
    pub gaps: GapReport,
}

/// Standardizes, normalizes, imputes and splits `raw`.
pub fn prepare(raw: &RawTable, cfg: &ExperimentConfig) -> Result<PreparedSeries> {
    let table = standardize(raw, &cfg.preprocessing)?;
    let (normalized, gaps) = normalize_with_report(&table, &NormalizeRequest::new(cfg.frequency))?;
    let imputed = impute(&normalized, cfg.impute)?;
    let segments = split(&imputed, &cfg.split)?;
    Ok(PreparedSeries { segments, gaps })
}

pub fn run_experiment(
    raw: &RawTable,
    cfg: &ExperimentConfig,
    provider: &dyn ModelProvider,
) -> Result<ExperimentRecord> {
    info!(
        component = "pipeline",
        event = "pipeline.experiment.start",
        dataset = %cfg.dataset,
        model = provider.name(),
        prompt_type = cfg.prompt_type.as_str(),
        ts_format = cfg.ts_format.as_str(),
        ts_type = cfg.ts_type.as_str(),
        periods = cfg.split.periods
    );

    let prepared = prepare(raw, cfg)?;
    let y_val = prepared.segments.validation_values()?;

    let spec = cfg.prompt_spec();
    let prompt = generate(&prepared.segments.train, &spec, &cfg.prompt_params)?;
    let prediction = provider.predict(&prompt, cfg.temperature, cfg.max_tokens)?;

    let parsed = parse_response(&prediction.response_text, cfg.ts_format, cfg.ts_type)?;
    if parsed.values.len() > spec.periods {
        debug!(
            component = "pipeline",
            event = "pipeline.forecast.truncated",
            returned = parsed.values.len(),
            periods = spec.periods
        );
    }
    let y_pred = parsed.forecast(spec.periods)?;
    let metrics = ForecastMetrics::compute(&y_val, &y_pred)?;

    let record = ExperimentRecord {
        id: None,
        created_at: Utc::now(),
        model: provider.name().to_string(),
        temperature: cfg.temperature,
        dataset: cfg.dataset.clone(),
        start_date: cfg.split.start_date,
        end_date: cfg.split.end_date,
        periods: spec.periods,
        prompt_fingerprint: prompt_fingerprint(&prompt),
        prompt,
        prompt_type: cfg.prompt_type,
        ts_format: cfg.ts_format,
        ts_type: cfg.ts_type,
        val_stats: Statistics::from_numbers(&y_val),
        pred_stats: Statistics::from_numbers(&y_pred),
        y_val,
        y_pred,
        metrics,
        prompt_tokens: prediction.prompt_tokens,
        response_tokens: prediction.response_tokens,
        response_time_seconds: prediction.elapsed_seconds,
        parse_skipped: parsed.skipped,
        used_fallback: parsed.used_fallback,
    };

    info!(
        component = "pipeline",
        event = "pipeline.experiment.finish",
        dataset = %record.dataset,
        model = %record.model,
        smape = record.metrics.smape,
        mae = record.metrics.mae,
        rmse = record.metrics.rmse,
        missing_points = prepared.gaps.missing_points,
        parse_skipped = record.parse_skipped
    );
    Ok(record)
}
