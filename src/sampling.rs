//! Input/output window selection for few-shot examples.
//!
//! Every strategy returns pairs of adjacent windows of equal length drawn
//! from one series: `input = data[s..s + w]`, `output = data[s + w..s + 2w]`.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TsCastError};
use crate::table::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sampling {
    /// Consecutive non-overlapping pairs from the start of the series.
    Frontend,
    /// Consecutive non-overlapping pairs ending at the last record.
    Backend,
    /// Distinct random start offsets, returned in ascending order.
    Random,
    /// Starts spread evenly over the series, or every `step` records.
    Uniform { step: Option<usize> },
}

impl Default for Sampling {
    fn default() -> Self {
        Self::Backend
    }
}

impl fmt::Display for Sampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frontend => f.write_str("frontend"),
            Self::Backend => f.write_str("backend"),
            Self::Random => f.write_str("random"),
            Self::Uniform { step: None } => f.write_str("uniform"),
            Self::Uniform { step: Some(step) } => write!(f, "uniform:{step}"),
        }
    }
}

impl FromStr for Sampling {
    type Err = TsCastError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if let Some(step) = normalized.strip_prefix("uniform:") {
            let step = step
                .parse::<usize>()
                .ok()
                .filter(|step| *step > 0)
                .ok_or_else(|| TsCastError::validation(format!("invalid uniform step: {step}")))?;
            return Ok(Self::Uniform { step: Some(step) });
        }
        match normalized.as_str() {
            "frontend" => Ok(Self::Frontend),
            "backend" => Ok(Self::Backend),
            "random" => Ok(Self::Random),
            "uniform" => Ok(Self::Uniform { step: None }),
            other => Err(TsCastError::validation(format!("unknown sampling strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPair<'a> {
    pub input: &'a [Record],
    pub output: &'a [Record],
}

/// Selects up to `samples` window pairs of length `window`.
///
/// Returns fewer pairs (possibly none) when the series is too short.
/// `seed` only affects `Random`; `None` draws from OS entropy.
pub fn sample_windows(
    data: &[Record],
    window: usize,
    samples: usize,
    sampling: Sampling,
    seed: Option<u64>,
) -> Vec<WindowPair<'_>> {
    if window == 0 || samples == 0 || data.len() < 2 * window {
        return Vec::new();
    }
    let max_start = data.len() - 2 * window;

    let starts: Vec<usize> = match sampling {
        Sampling::Frontend => (0..samples)
            .map(|i| i * 2 * window)
            .take_while(|start| *start <= max_start)
            .collect(),
        Sampling::Backend => {
            let count = samples.min(data.len() / (2 * window));
            (0..count)
                .map(|i| data.len() - (count - i) * 2 * window)
                .collect()
        }
        Sampling::Random => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let count = samples.min(max_start + 1);
            let mut starts = rand::seq::index::sample(&mut rng, max_start + 1, count).into_vec();
            starts.sort_unstable();
            starts
        }
        Sampling::Uniform { step: Some(step) } => {
            (0..=max_start).step_by(step.max(1)).take(samples).collect()
        }
        Sampling::Uniform { step: None } => {
            if samples == 1 {
                vec![0]
            } else {
                (0..samples)
                    .map(|i| (i as f64 * max_start as f64 / (samples - 1) as f64) as usize)
                    .collect()
            }
        }
    };

    starts
        .into_iter()
        .map(|start| WindowPair {
            input: &data[start..start + window],
            output: &data[start + window..start + 2 * window],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::parse_timestamp;

    fn daily(n: usize) -> Vec<Record> {
        let start = parse_timestamp("2024-01-01").unwrap();
        (0..n)
            .map(|i| Record::new(start + chrono::Duration::days(i as i64), Some(i as f64 + 1.0)))
            .collect()
    }

    fn firsts(pairs: &[WindowPair<'_>]) -> Vec<(f64, f64)> {
        pairs
            .iter()
            .map(|p| (p.input[0].value.unwrap(), p.output[0].value.unwrap()))
            .collect()
    }

    #[test]
    fn frontend_takes_pairs_from_the_start() {
        let data = daily(12);
        let pairs = sample_windows(&data, 2, 2, Sampling::Frontend, None);
        assert_eq!(firsts(&pairs), vec![(1.0, 3.0), (5.0, 7.0)]);
    }

    #[test]
    fn backend_ends_at_the_last_record() {
        let data = daily(12);
        let pairs = sample_windows(&data, 2, 2, Sampling::Backend, None);
        assert_eq!(firsts(&pairs), vec![(5.0, 7.0), (9.0, 11.0)]);
        assert_eq!(pairs[1].output[1].value, Some(12.0));
    }

    #[test]
    fn backend_caps_pairs_at_what_fits() {
        let data = daily(6);
        let pairs = sample_windows(&data, 2, 2, Sampling::Backend, None);
        assert_eq!(firsts(&pairs), vec![(3.0, 5.0)]);
        assert_eq!(pairs[0].output[1].value, Some(6.0));

        let odd = daily(7);
        let pairs = sample_windows(&odd, 2, 3, Sampling::Backend, None);
        assert_eq!(firsts(&pairs), vec![(4.0, 6.0)]);
    }

    #[test]
    fn uniform_spreads_or_steps() {
        let data = daily(12);
        let spread = sample_windows(&data, 2, 2, Sampling::Uniform { step: None }, None);
        assert_eq!(firsts(&spread), vec![(1.0, 3.0), (9.0, 11.0)]);

        let stepped = sample_windows(&data, 2, 3, Sampling::Uniform { step: Some(2) }, None);
        assert_eq!(firsts(&stepped), vec![(1.0, 3.0), (3.0, 5.0), (5.0, 7.0)]);
    }

    #[test]
    fn random_is_reproducible_with_a_seed_and_sorted() {
        let data = daily(30);
        let a = sample_windows(&data, 3, 4, Sampling::Random, Some(7));
        let b = sample_windows(&data, 3, 4, Sampling::Random, Some(7));
        assert_eq!(firsts(&a), firsts(&b));
        assert_eq!(a.len(), 4);
        let starts: Vec<f64> = firsts(&a).into_iter().map(|(s, _)| s).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn short_series_yield_no_pairs() {
        let data = daily(3);
        for sampling in [
            Sampling::Frontend,
            Sampling::Backend,
            Sampling::Random,
            Sampling::Uniform { step: None },
        ] {
            assert!(sample_windows(&data, 2, 2, sampling, Some(1)).is_empty());
        }
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("Backend".parse::<Sampling>().unwrap(), Sampling::Backend);
        assert_eq!(
            "uniform:3".parse::<Sampling>().unwrap(),
            Sampling::Uniform { step: Some(3) }
        );
        assert!("uniform:0".parse::<Sampling>().is_err());
        assert_eq!(Sampling::Uniform { step: Some(3) }.to_string(), "uniform:3");
    }
}
