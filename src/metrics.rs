//! Forecast-error metrics.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TsCastError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Percent, in `[0, 200]`.
    pub smape: f64,
    pub mae: f64,
    pub rmse: f64,
}

impl ForecastMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(TsCastError::LengthMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(TsCastError::validation("metrics need at least one pair"));
        }
        if let Some(idx) = actual
            .iter()
            .zip(predicted)
            .position(|(a, p)| !a.is_finite() || !p.is_finite())
        {
            return Err(TsCastError::validation(format!(
                "non-finite value at position {idx}"
            )));
        }

        let n = actual.len() as f64;
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut smape_sum = 0.0;
        for (a, p) in actual.iter().zip(predicted) {
            let err = (a - p).abs();
            abs_sum += err;
            sq_sum += err * err;
            smape_sum += smape_term(*a, *p);
        }

        let metrics = Self {
            smape: 100.0 * smape_sum / n,
            mae: abs_sum / n,
            rmse: (sq_sum / n).sqrt(),
        };
        debug!(
            component = "metrics",
            event = "metrics.computed",
            pairs = actual.len(),
            smape = metrics.smape,
            mae = metrics.mae,
            rmse = metrics.rmse
        );
        Ok(metrics)
    }
}

/// `2|a - p| / (|a| + |p|)`, with the both-zero pair defined as a perfect 0.
fn smape_term(actual: f64, predicted: f64) -> f64 {
    let denom = actual.abs() + predicted.abs();
    if denom == 0.0 {
        0.0
    } else {
        2.0 * (actual - predicted).abs() / denom
    }
}

/// Standard error of the mean (sample std / sqrt(n)); `None` below two values.
pub fn standard_error(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0);
    Some(variance.sqrt() / n.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "actual={actual} expected={expected}"
        );
    }

    #[test]
    fn identical_sequences_score_zero() {
        let m = ForecastMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(m.smape, 0.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rmse, 0.0);
    }

    #[test]
    fn both_zero_pair_contributes_exactly_zero() {
        let m = ForecastMetrics::compute(&[0.0], &[0.0]).unwrap();
        assert_eq!(m.smape, 0.0);

        // Half of the pairs are perfect zeros, the other half is off by 100%.
        let m = ForecastMetrics::compute(&[0.0, 100.0], &[0.0, 50.0]).unwrap();
        assert_close(m.smape, 100.0 * (2.0 * 50.0 / 150.0) / 2.0);
    }

    #[test]
    fn one_sided_zero_is_maximal_error() {
        let m = ForecastMetrics::compute(&[0.0], &[5.0]).unwrap();
        assert_close(m.smape, 200.0);
    }

    #[test]
    fn mae_and_rmse_follow_definitions() {
        let m = ForecastMetrics::compute(&[10.0, 20.0, 30.0], &[12.0, 18.0, 32.0]).unwrap();
        assert_close(m.mae, 2.0);
        assert_close(m.rmse, 2.0);

        let m = ForecastMetrics::compute(&[100.0, 200.0, 300.0], &[110.0, 190.0, 310.0]).unwrap();
        assert_close(m.mae, 10.0);
        let expected = 100.0 / 3.0 * (20.0 / 210.0 + 20.0 / 390.0 + 20.0 / 610.0);
        assert_close(m.smape, expected);
    }

    #[test]
    fn unequal_lengths_are_rejected() {
        let err = ForecastMetrics::compute(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            TsCastError::LengthMismatch {
                actual: 2,
                predicted: 1
            }
        ));
    }

    #[test]
    fn empty_and_nan_inputs_are_rejected() {
        assert!(matches!(
            ForecastMetrics::compute(&[], &[]),
            Err(TsCastError::Validation(_))
        ));
        assert!(matches!(
            ForecastMetrics::compute(&[1.0], &[f64::NAN]),
            Err(TsCastError::Validation(_))
        ));
    }

    #[test]
    fn standard_error_matches_sample_formula() {
        let se = standard_error(&[2.0, -2.0, 2.0]).unwrap();
        assert!((se - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(standard_error(&[1.0]), None);
    }
}
