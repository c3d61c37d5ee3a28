//! tscast: time-series forecasting with language-model prompts.
//!
//! A series is cleaned onto a regular grid, imputed, split into a training
//! window and a validation horizon, rendered into a prompt in one of several
//! textual layouts, and the model's answer is decoded back into numbers and
//! scored.

mod error;
mod formatting;
mod history;
mod imputation;
mod loader;
mod metrics;
mod observability;
mod pipeline;
mod preprocessor;
mod prompt;
mod provider;
mod sampling;
mod statistics;
mod table;

pub use error::{Result, TsCastError};
pub use formatting::{
    decode_value, encode_value, format_series, parse_response, EncodeOptions, ParsedSeries,
    TsFormat, TsType, DEFAULT_DECIMALS,
};
pub use history::{prompt_fingerprint, HistoryFilter, HistoryStore};
pub use imputation::{impute, impute_values, ImputeStrategy};
pub use loader::{load_data, save_data};
pub use metrics::{standard_error, ForecastMetrics};
pub use observability::{
    init_logging, log_run_finish, log_run_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{prepare, run_experiment, ExperimentConfig, ExperimentRecord, PreparedSeries};
pub use preprocessor::{
    normalize, normalize_with_report, split, standardize, DuplicatePolicy, GapReport,
    NormalizeRequest, PreprocessingConfig, SplitSegments, SplitSpec,
};
pub use prompt::{generate, PromptParams, PromptSpec, PromptType};
#[cfg(feature = "provider-http")]
pub use provider::ReqwestBlockingTransport;
pub use provider::{
    clean_response, HttpTransport, ModelProvider, OpenAiCompatibleProvider, Prediction,
    ProviderConfig,
};
pub use sampling::{sample_windows, Sampling, WindowPair};
pub use statistics::{quantile_sorted, Statistics};
pub use table::{format_timestamp, parse_timestamp, Frequency, RawTable, Record, TimeSeriesTable};
