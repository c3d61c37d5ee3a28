//! Missing-value imputation strategies.
//!
//! Every strategy only writes into missing slots; known values pass through
//! untouched. Aggregates are taken over the known values before any slot is
//! filled, so replacements never feed back into the statistic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TsCastError};
use crate::statistics::{mean_of, quantile_sorted};
use crate::table::TimeSeriesTable;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    Mean,
    Median,
    ForwardFill,
    BackwardFill,
    SimpleMovingAverage { window: usize, min_periods: usize },
    ExponentialMovingAverage { span: usize },
    LinearInterpolation,
    Zero,
}

impl ImputeStrategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::ForwardFill => "forward_fill",
            Self::BackwardFill => "backward_fill",
            Self::SimpleMovingAverage { .. } => "simple_moving_average",
            Self::ExponentialMovingAverage { .. } => "exponential_moving_average",
            Self::LinearInterpolation => "linear_interpolation",
            Self::Zero => "zero",
        }
    }
}

impl fmt::Display for ImputeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImputeStrategy {
    type Err = TsCastError;

    /// Accepts bare names plus `sma:<window>` and `ema:<span>`.
    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        let (name, arg) = match normalized.split_once(':') {
            Some((name, arg)) => (name.to_string(), Some(arg.to_string())),
            None => (normalized, None),
        };
        let parse_arg = |arg: Option<String>, default: usize| -> Result<usize> {
            match arg {
                Some(raw) => raw.parse::<usize>().map_err(|_| {
                    TsCastError::validation(format!("invalid strategy argument: {raw}"))
                }),
                None => Ok(default),
            }
        };

        match name.as_str() {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "forward_fill" | "ffill" => Ok(Self::ForwardFill),
            "backward_fill" | "bfill" => Ok(Self::BackwardFill),
            "simple_moving_average" | "sma" => Ok(Self::SimpleMovingAverage {
                window: parse_arg(arg, 3)?,
                min_periods: 1,
            }),
            "exponential_moving_average" | "ema" => Ok(Self::ExponentialMovingAverage {
                span: parse_arg(arg, 3)?,
            }),
            "linear_interpolation" | "linear" | "interpolate" => Ok(Self::LinearInterpolation),
            "zero" => Ok(Self::Zero),
            other => Err(TsCastError::validation(format!(
                "unknown imputation strategy: {other}"
            ))),
        }
    }
}

pub fn impute(table: &TimeSeriesTable, strategy: ImputeStrategy) -> Result<TimeSeriesTable> {
    let values = table.values();
    let missing = values.iter().filter(|v| v.is_none()).count();
    if missing == 0 {
        return Ok(table.clone());
    }

    let filled = impute_values(&values, strategy)?;
    info!(
        component = "imputation",
        event = "impute.finish",
        strategy = strategy.name(),
        rows = values.len(),
        filled = missing
    );
    Ok(table.map_values(filled.into_iter().map(Some).collect()))
}

/// Fills every `None` in `values`. Known entries are copied as-is.
pub fn impute_values(values: &[Option<f64>], strategy: ImputeStrategy) -> Result<Vec<f64>> {
    let known: Vec<f64> = values.iter().flatten().copied().collect();
    if known.is_empty() && !values.is_empty() && strategy != ImputeStrategy::Zero {
        return Err(TsCastError::validation(format!(
            "cannot impute with {strategy}: every value is missing"
        )));
    }

    let filled = match strategy {
        ImputeStrategy::Mean => constant_fill(values, mean_of(&known)),
        ImputeStrategy::Median => {
            let mut sorted = known;
            sorted.sort_by(f64::total_cmp);
            constant_fill(values, quantile_sorted(&sorted, 0.5))
        }
        ImputeStrategy::Zero => constant_fill(values, 0.0),
        ImputeStrategy::ForwardFill => backward_fill(&forward_fill(values)),
        ImputeStrategy::BackwardFill => forward_fill(&backward_fill(values)),
        ImputeStrategy::SimpleMovingAverage {
            window,
            min_periods,
        } => {
            if window == 0 {
                return Err(TsCastError::validation("moving average window must be > 0"));
            }
            let rolling = rolling_mean(values, window, min_periods.max(1));
            edge_fill(&fill_from(values, &rolling))
        }
        ImputeStrategy::ExponentialMovingAverage { span } => {
            if span == 0 {
                return Err(TsCastError::validation("exponential span must be > 0"));
            }
            let smoothed = ewm_mean(values, 2.0 / (span as f64 + 1.0));
            edge_fill(&fill_from(values, &smoothed))
        }
        ImputeStrategy::LinearInterpolation => edge_fill(&interpolate_interior(values)),
    };

    // Every slot is known at this point unless the input was all-missing.
    Ok(filled.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

fn constant_fill(values: &[Option<f64>], fill: f64) -> Vec<Option<f64>> {
    values.iter().map(|v| Some(v.unwrap_or(fill))).collect()
}

fn fill_from(values: &[Option<f64>], candidates: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .zip(candidates)
        .map(|(value, candidate)| value.or(*candidate))
        .collect()
}

fn edge_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    backward_fill(&forward_fill(values))
}

fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|value| {
            if value.is_some() {
                last = *value;
            }
            last
        })
        .collect()
}

fn backward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut next = None;
    for slot in out.iter_mut().rev() {
        match slot {
            Some(value) => next = Some(*value),
            None => *slot = next,
        }
    }
    out
}

/// Trailing-window mean over known values; `None` below `min_periods`.
fn rolling_mean(values: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| {
            let start = (idx + 1).saturating_sub(window);
            let known: Vec<f64> = values[start..=idx].iter().flatten().copied().collect();
            if known.len() >= min_periods {
                Some(mean_of(&known))
            } else {
                None
            }
        })
        .collect()
}

/// Exponentially weighted mean without bias adjustment. Missing steps decay
/// the old weight and carry the running mean forward.
fn ewm_mean(values: &[Option<f64>], alpha: f64) -> Vec<Option<f64>> {
    let decay = 1.0 - alpha;
    let mut weighted: Option<f64> = None;
    let mut old_weight = 1.0;

    values
        .iter()
        .map(|value| {
            if weighted.is_some() {
                old_weight *= decay;
            }
            if let Some(current) = value {
                weighted = Some(match weighted {
                    None => *current,
                    Some(prev) => (old_weight * prev + alpha * current) / (old_weight + alpha),
                });
                old_weight = 1.0;
            }
            weighted
        })
        .collect()
}

/// Linear interpolation by position between known neighbours; edges untouched.
fn interpolate_interior(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut prev: Option<(usize, f64)> = None;

    for (idx, value) in values.iter().enumerate() {
        let Some(current) = value else {
            continue;
        };
        if let Some((prev_idx, prev_value)) = prev {
            let span = (idx - prev_idx) as f64;
            for (offset, slot) in out[prev_idx + 1..idx].iter_mut().enumerate() {
                let t = (offset + 1) as f64 / span;
                *slot = Some(prev_value + (current - prev_value) * t);
            }
        }
        prev = Some((idx, *current));
    }
    out
}
