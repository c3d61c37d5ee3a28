//! Descriptive statistics over a series that may contain missing entries.
//!
//! Quartiles use linear interpolation between order statistics: for
//! probability `p` over `n` sorted known values the rank is `h = p * (n - 1)`
//! and the result is `x[floor(h)] + (h - floor(h)) * (x[floor(h) + 1] - x[floor(h)])`
//! (Hyndman-Fan type 7, the numpy default).

use serde::{Deserialize, Serialize};

use crate::table::TimeSeriesTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub first_quartile: Option<f64>,
    pub third_quartile: Option<f64>,
    /// Sample standard deviation (n - 1); 0.0 for a single known value.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub missing_count: usize,
    pub missing_percentage: f64,
}

impl Statistics {
    pub fn from_values(values: &[Option<f64>]) -> Self {
        let mut known: Vec<f64> = values.iter().flatten().copied().collect();
        known.sort_by(f64::total_cmp);

        let missing_count = values.len() - known.len();
        let missing_percentage = if values.is_empty() {
            0.0
        } else {
            missing_count as f64 / values.len() as f64 * 100.0
        };

        if known.is_empty() {
            return Self {
                count: 0,
                mean: None,
                median: None,
                first_quartile: None,
                third_quartile: None,
                std: None,
                min: None,
                max: None,
                missing_count,
                missing_percentage,
            };
        }

        let mean = mean_of(&known);
        Self {
            count: known.len(),
            mean: Some(mean),
            median: Some(quantile_sorted(&known, 0.5)),
            first_quartile: Some(quantile_sorted(&known, 0.25)),
            third_quartile: Some(quantile_sorted(&known, 0.75)),
            std: Some(sample_std(&known, mean)),
            min: known.first().copied(),
            max: known.last().copied(),
            missing_count,
            missing_percentage,
        }
    }

    pub fn from_numbers(values: &[f64]) -> Self {
        let wrapped: Vec<Option<f64>> = values
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect();
        Self::from_values(&wrapped)
    }

    pub fn from_table(table: &TimeSeriesTable) -> Self {
        Self::from_values(&table.values())
    }
}

pub(crate) fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Type-7 quantile of an ascending slice. NaN for an empty slice.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = h.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let frac = h - lower as f64;
            sorted[lower] + frac * (sorted[upper] - sorted[lower])
        }
    }
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>();
    (ss / (values.len() - 1) as f64).sqrt()
}
