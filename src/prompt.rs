//! Forecast prompt generation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TsCastError};
use crate::formatting::{format_series, EncodeOptions, TsFormat, TsType, DEFAULT_DECIMALS};
use crate::sampling::{sample_windows, Sampling};
use crate::statistics::Statistics;
use crate::table::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptType {
    ZeroShot,
    FewShot,
    Cot,
    CotFew,
}

impl PromptType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ZeroShot => "zero-shot",
            Self::FewShot => "few-shot",
            Self::Cot => "cot",
            Self::CotFew => "cot-few",
        }
    }

    pub fn uses_examples(self) -> bool {
        matches!(self, Self::FewShot | Self::CotFew)
    }

    pub fn uses_reasoning(self) -> bool {
        matches!(self, Self::Cot | Self::CotFew)
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptType {
    type Err = TsCastError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "zero-shot" | "zeroshot" => Ok(Self::ZeroShot),
            "few-shot" | "fewshot" => Ok(Self::FewShot),
            "cot" => Ok(Self::Cot),
            "cot-few" | "cot-few-shot" => Ok(Self::CotFew),
            other => Err(TsCastError::validation(format!("unknown prompt type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub prompt_type: PromptType,
    pub ts_format: TsFormat,
    pub ts_type: TsType,
    pub periods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptParams {
    pub decimals: u32,
    /// Number of worked examples in few-shot prompts.
    pub examples: usize,
    pub sampling: Sampling,
    /// Example window length; defaults to the forecast horizon.
    pub window: Option<usize>,
    pub seed: Option<u64>,
    pub include_statistics: bool,
}

impl Default for PromptParams {
    fn default() -> Self {
        Self {
            decimals: DEFAULT_DECIMALS,
            examples: 2,
            sampling: Sampling::Backend,
            window: None,
            seed: None,
            include_statistics: true,
        }
    }
}

const ROLE: &str = "You are a specialist in statistical modeling and machine learning, with expertise in time series forecasting.";

const REASONING_STEPS: &str = "Reason step by step before answering:
1. Describe the overall trend of the series (growth, decline or stability).
2. Look for recurring patterns and seasonality at the sampling frequency of the data.
3. Note outliers or level shifts and decide whether they should influence the forecast.
4. Project the next values so they continue the patterns you identified.
Write your reasoning first, then give the final answer inside <out></out>.";

/// Builds the full prompt for forecasting `spec.periods` values after `train`.
pub fn generate(train: &[Record], spec: &PromptSpec, params: &PromptParams) -> Result<String> {
    if spec.periods == 0 {
        return Err(TsCastError::validation("periods must be greater than zero"));
    }
    if train.is_empty() {
        return Err(TsCastError::validation("training segment is empty"));
    }

    let opts = EncodeOptions {
        decimals: params.decimals,
    };
    let render = |records: &[Record]| format_series(records, spec.ts_format, spec.ts_type, &opts);

    let mut sections: Vec<String> = vec![
        ROLE.to_string(),
        format!(
            "Objective:\nPredict the next {} values of the series based on its history ({} periods).",
            spec.periods,
            train.len()
        ),
        format!(
            "Data encoding:\nThe series is written as {}. Values are {}. A missing observation is written as `{}`.",
            spec.ts_format.describe(),
            spec.ts_type.describe(),
            crate::formatting::encode_value(None, spec.ts_type, &opts)
        ),
    ];

    if params.include_statistics {
        sections.push(statistics_section(&Statistics::from_values(
            &train.iter().map(|r| r.value).collect::<Vec<_>>(),
        )));
    }

    if spec.prompt_type.uses_examples() {
        sections.push(examples_section(train, spec, params, &render)?);
    }

    if spec.prompt_type.uses_reasoning() {
        sections.push(REASONING_STEPS.to_string());
    }

    let answer_rule = if spec.prompt_type.uses_reasoning() {
        "Inside <out></out> write only the predicted values, without text, comments or code."
    } else {
        "Produce only the predicted values, without text, comments or code."
    };
    sections.push(format!(
        "Rules:\n1. The forecast must start immediately after the last observed point.\n2. Return exactly {} values using the same layout and value encoding as the series.\n3. {}\n4. Delimit the output exclusively with <out></out>.",
        spec.periods, answer_rule
    ));

    let example_len = spec.periods.min(train.len());
    sections.push(format!(
        "Output example (shape only):\n<out>\n{}\n</out>",
        render(&train[..example_len])
    ));
    sections.push(format!("Series data:\n{}", render(train)));
    sections.push(format!(
        "Forecast the next {} values and return them inside <out></out>.",
        spec.periods
    ));

    let prompt = sections.join("\n\n");
    info!(
        component = "prompt",
        event = "prompt.generate.finish",
        prompt_type = spec.prompt_type.as_str(),
        ts_format = spec.ts_format.as_str(),
        ts_type = spec.ts_type.as_str(),
        periods = spec.periods,
        train_points = train.len(),
        chars = prompt.len()
    );
    Ok(prompt)
}

fn statistics_section(stats: &Statistics) -> String {
    let show = |value: Option<f64>| match value {
        Some(v) => format!("{v:.4}"),
        None => "n/a".to_string(),
    };
    format!(
        "Statistical context:\n- Mean: {}\n- Median: {}\n- Standard deviation: {}\n- Minimum: {}\n- Maximum: {}\n- First quartile (Q1): {}\n- Third quartile (Q3): {}\n- Missing observations: {} ({:.2}%)",
        show(stats.mean),
        show(stats.median),
        show(stats.std),
        show(stats.min),
        show(stats.max),
        show(stats.first_quartile),
        show(stats.third_quartile),
        stats.missing_count,
        stats.missing_percentage
    )
}

fn examples_section(
    train: &[Record],
    spec: &PromptSpec,
    params: &PromptParams,
    render: &dyn Fn(&[Record]) -> String,
) -> Result<String> {
    let window = params.window.unwrap_or(spec.periods);
    let pairs = sample_windows(train, window, params.examples, params.sampling, params.seed);
    if pairs.is_empty() {
        return Err(TsCastError::validation(format!(
            "{} prompts need at least {} training points for {} example(s) of window {}, got {}",
            spec.prompt_type,
            2 * window,
            params.examples,
            window,
            train.len()
        )));
    }

    let mut section = String::from("Examples:");
    for (idx, pair) in pairs.iter().enumerate() {
        section.push_str(&format!(
            "\n\nExample {}\nInput:\n{}\nOutput:\n<out>\n{}\n</out>",
            idx + 1,
            render(pair.input),
            render(pair.output)
        ));
    }
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::parse_timestamp;

    fn hourly(values: &[f64]) -> Vec<Record> {
        let start = parse_timestamp("2016-07-01 00:00:00").unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Record::new(start + chrono::Duration::hours(i as i64), Some(*v)))
            .collect()
    }

    fn spec(prompt_type: PromptType, periods: usize) -> PromptSpec {
        PromptSpec {
            prompt_type,
            ts_format: TsFormat::Array,
            ts_type: TsType::Numeric,
            periods,
        }
    }

    #[test]
    fn zero_shot_embeds_series_count_and_delimiter() {
        let train = hourly(&[10.0, 11.5, 12.0, 13.0]);
        let prompt =
            generate(&train, &spec(PromptType::ZeroShot, 2), &PromptParams::default()).unwrap();
        assert!(prompt.contains("[10.0, 11.5, 12.0, 13.0]"));
        assert!(prompt.contains("exactly 2 values"));
        assert!(prompt.contains("<out></out>"));
        assert!(prompt.contains("- Mean: 11.6250"));
        assert!(!prompt.contains("Example 1"));
        assert!(!prompt.contains("step by step"));
    }

    #[test]
    fn statistics_can_be_left_out() {
        let train = hourly(&[1.0, 2.0]);
        let params = PromptParams {
            include_statistics: false,
            ..PromptParams::default()
        };
        let prompt = generate(&train, &spec(PromptType::ZeroShot, 1), &params).unwrap();
        assert!(!prompt.contains("Mean:"));
    }

    #[test]
    fn few_shot_includes_sampled_examples() {
        let train = hourly(&(1..=12).map(f64::from).collect::<Vec<_>>());
        let prompt =
            generate(&train, &spec(PromptType::FewShot, 2), &PromptParams::default()).unwrap();
        assert!(
            prompt.contains("Example 1\nInput:\n[5.0, 6.0]\nOutput:\n<out>\n[7.0, 8.0]\n</out>")
        );
        assert!(prompt.contains("Example 2\nInput:\n[9.0, 10.0]"));
    }

    #[test]
    fn few_shot_on_a_short_series_uses_the_pairs_that_fit() {
        let train = hourly(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let prompt =
            generate(&train, &spec(PromptType::FewShot, 2), &PromptParams::default()).unwrap();
        assert!(
            prompt.contains("Example 1\nInput:\n[3.0, 4.0]\nOutput:\n<out>\n[5.0, 6.0]\n</out>")
        );
        assert!(!prompt.contains("Example 2"));
    }

    #[test]
    fn cot_few_combines_examples_and_reasoning() {
        let train = hourly(&(1..=8).map(f64::from).collect::<Vec<_>>());
        let prompt =
            generate(&train, &spec(PromptType::CotFew, 2), &PromptParams::default()).unwrap();
        assert!(prompt.contains("Example 1"));
        assert!(prompt.contains("step by step"));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let train = hourly(&[1.0, 2.0, 3.0]);
        let params = PromptParams::default();
        assert!(matches!(
            generate(&train, &spec(PromptType::ZeroShot, 0), &params),
            Err(TsCastError::Validation(_))
        ));
        assert!(matches!(
            generate(&[], &spec(PromptType::ZeroShot, 1), &params),
            Err(TsCastError::Validation(_))
        ));
        assert!(matches!(
            generate(&train, &spec(PromptType::FewShot, 2), &params),
            Err(TsCastError::Validation(_))
        ));
    }

    #[test]
    fn generation_is_deterministic() {
        let train = hourly(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0]);
        let spec = PromptSpec {
            prompt_type: PromptType::Cot,
            ts_format: TsFormat::Markdown,
            ts_type: TsType::Textual,
            periods: 3,
        };
        let a = generate(&train, &spec, &PromptParams::default()).unwrap();
        let b = generate(&train, &spec, &PromptParams::default()).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("|2016-07-01 00:00:00|3 . 0|"));
    }

    #[test]
    fn prompt_type_names_parse() {
        assert_eq!("ZERO_SHOT".parse::<PromptType>().unwrap(), PromptType::ZeroShot);
        assert_eq!("cot_few".parse::<PromptType>().unwrap(), PromptType::CotFew);
        assert!("chain".parse::<PromptType>().is_err());
    }
}
