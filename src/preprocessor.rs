//! Standardize raw tables, fill the time grid and cut train/validation segments.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TsCastError};
use crate::table::{format_timestamp, parse_timestamp, Frequency, RawTable, Record, TimeSeriesTable};

const MAX_REPORTED_GAP_RANGES: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    #[default]
    First,
    Last,
    Sum,
    Mean,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
            Self::Sum => "sum",
            Self::Mean => "mean",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = TsCastError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "sum" => Ok(Self::Sum),
            "mean" | "avg" => Ok(Self::Mean),
            other => Err(TsCastError::validation(format!(
                "unknown duplicate policy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub date_col: String,
    pub value_col: String,
    pub duplicates: DuplicatePolicy,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            date_col: "date".to_string(),
            value_col: "value".to_string(),
            duplicates: DuplicatePolicy::First,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub frequency: Frequency,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl NormalizeRequest {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            start: None,
            end: None,
        }
    }
}

/// Coverage of the observed rows against the requested grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub expected_points: u64,
    pub present_points: u64,
    pub missing_points: u64,
    pub excluded_points: u64,
    pub total_gap_ranges: u64,
    /// Inclusive ranges, capped at the first 256.
    pub gap_ranges: Vec<(NaiveDateTime, NaiveDateTime)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSpec {
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub periods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSegments {
    pub train: Vec<Record>,
    pub validation: Vec<Option<f64>>,
}

impl SplitSegments {
    /// Validation values as plain numbers; a missing entry is an error.
    pub fn validation_values(&self) -> Result<Vec<f64>> {
        self.validation
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                value.ok_or_else(|| {
                    TsCastError::validation(format!(
                        "validation value {idx} is missing; impute before splitting"
                    ))
                })
            })
            .collect()
    }
}

pub fn standardize(raw: &RawTable, cfg: &PreprocessingConfig) -> Result<TimeSeriesTable> {
    let date_idx = raw
        .column_index(&cfg.date_col)
        .ok_or_else(|| TsCastError::validation(format!("column '{}' not found", cfg.date_col)))?;
    let value_idx = raw
        .column_index(&cfg.value_col)
        .ok_or_else(|| TsCastError::validation(format!("column '{}' not found", cfg.value_col)))?;

    let mut records = Vec::with_capacity(raw.len());
    for (row_idx, row) in raw.rows().iter().enumerate() {
        let date_raw = row[date_idx].as_deref().unwrap_or_default();
        let timestamp = parse_timestamp(date_raw).ok_or_else(|| {
            TsCastError::validation(format!("row {row_idx}: unparsable date '{date_raw}'"))
        })?;
        let value = parse_value(row[value_idx].as_deref())
            .map_err(|msg| TsCastError::validation(format!("row {row_idx}: {msg}")))?;
        records.push(Record::new(timestamp, value));
    }

    // Stable sort keeps input order inside each duplicate group.
    records.sort_by_key(|record| record.timestamp);
    let input_rows = records.len();
    let deduped = resolve_duplicates(records, cfg.duplicates);
    let duplicates_resolved = input_rows - deduped.len();

    if duplicates_resolved > 0 {
        warn!(
            component = "preprocessor",
            event = "preprocess.standardize.duplicates",
            policy = cfg.duplicates.as_str(),
            duplicates_resolved
        );
    }
    info!(
        component = "preprocessor",
        event = "preprocess.standardize.finish",
        date_col = %cfg.date_col,
        value_col = %cfg.value_col,
        input_rows,
        output_rows = deduped.len()
    );

    Ok(TimeSeriesTable::from_sorted(deduped, None))
}

pub fn normalize(table: &TimeSeriesTable, req: &NormalizeRequest) -> Result<TimeSeriesTable> {
    normalize_with_report(table, req).map(|(table, _)| table)
}

pub fn normalize_with_report(
    table: &TimeSeriesTable,
    req: &NormalizeRequest,
) -> Result<(TimeSeriesTable, GapReport)> {
    let start = req.start.or(table.first_timestamp());
    let end = req.end.or(table.last_timestamp());
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            if !table.is_empty() {
                return Err(TsCastError::validation("normalize bounds are undefined"));
            }
            let empty = TimeSeriesTable::from_sorted(Vec::new(), Some(req.frequency));
            return Ok((empty, empty_report()));
        }
    };

    let grid = req.frequency.grid(start, end)?;
    let mut out = Vec::with_capacity(grid.len());
    let mut excluded_points = 0u64;
    let mut records = table.records().iter().peekable();

    for ts in &grid {
        while let Some(record) = records.peek() {
            if record.timestamp >= *ts {
                break;
            }
            if record.timestamp >= start {
                return Err(off_grid_error(record.timestamp, req.frequency));
            }
            excluded_points += 1;
            records.next();
        }

        match records.peek() {
            Some(record) if record.timestamp == *ts => {
                out.push(**record);
                records.next();
            }
            _ => out.push(Record::new(*ts, None)),
        }
    }

    for record in records {
        if record.timestamp <= end {
            return Err(off_grid_error(record.timestamp, req.frequency));
        }
        excluded_points += 1;
    }

    let report = gap_report(&out, excluded_points);
    if report.missing_points > 0 {
        warn!(
            component = "preprocessor",
            event = "preprocess.normalize.gap_detected",
            frequency = %req.frequency,
            missing_points = report.missing_points,
            total_gap_ranges = report.total_gap_ranges,
            reported_gap_ranges = report.gap_ranges.len()
        );
    }
    info!(
        component = "preprocessor",
        event = "preprocess.normalize.finish",
        frequency = %req.frequency,
        start = %format_timestamp(start),
        end = %format_timestamp(end),
        expected_points = report.expected_points,
        present_points = report.present_points,
        excluded_points = report.excluded_points
    );

    Ok((TimeSeriesTable::from_sorted(out, Some(req.frequency)), report))
}

pub fn split(table: &TimeSeriesTable, spec: &SplitSpec) -> Result<SplitSegments> {
    if spec.periods == 0 {
        return Err(TsCastError::validation("periods must be > 0"));
    }
    if spec.start_date > spec.end_date {
        return Err(TsCastError::validation(format!(
            "split start {} is after end {}",
            format_timestamp(spec.start_date),
            format_timestamp(spec.end_date)
        )));
    }

    let train: Vec<Record> = table
        .records()
        .iter()
        .filter(|r| r.timestamp >= spec.start_date && r.timestamp <= spec.end_date)
        .copied()
        .collect();
    if train.is_empty() {
        return Err(TsCastError::validation(format!(
            "no records between {} and {}",
            format_timestamp(spec.start_date),
            format_timestamp(spec.end_date)
        )));
    }

    let after: Vec<Option<f64>> = table
        .records()
        .iter()
        .filter(|r| r.timestamp > spec.end_date)
        .map(|r| r.value)
        .collect();
    if after.len() < spec.periods {
        return Err(TsCastError::InsufficientData {
            requested: spec.periods,
            available: after.len(),
        });
    }

    let validation = after[..spec.periods].to_vec();
    info!(
        component = "preprocessor",
        event = "preprocess.split.finish",
        train_rows = train.len(),
        validation_rows = validation.len()
    );

    Ok(SplitSegments { train, validation })
}

fn parse_value(raw: Option<&str>) -> std::result::Result<Option<f64>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if is_missing_token(trimmed) {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(format!("non-numeric value '{trimmed}'")),
    }
}

pub(crate) fn is_missing_token(raw: &str) -> bool {
    raw.is_empty()
        || matches!(
            raw.to_ascii_lowercase().as_str(),
            "nan" | "null" | "none" | "na" | "n/a"
        )
}

fn resolve_duplicates(records: Vec<Record>, policy: DuplicatePolicy) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::with_capacity(records.len());
    let mut group: Vec<Option<f64>> = Vec::new();

    let mut iter = records.into_iter().peekable();
    while let Some(record) = iter.next() {
        group.push(record.value);
        let group_ends = iter
            .peek()
            .map(|next| next.timestamp != record.timestamp)
            .unwrap_or(true);
        if group_ends {
            out.push(Record::new(record.timestamp, combine(&group, policy)));
            group.clear();
        }
    }
    out
}

fn combine(group: &[Option<f64>], policy: DuplicatePolicy) -> Option<f64> {
    match policy {
        DuplicatePolicy::First => group.first().copied().flatten(),
        DuplicatePolicy::Last => group.last().copied().flatten(),
        DuplicatePolicy::Sum | DuplicatePolicy::Mean => {
            let known: Vec<f64> = group.iter().flatten().copied().collect();
            if known.is_empty() {
                return None;
            }
            let sum = known.iter().sum::<f64>();
            match policy {
                DuplicatePolicy::Sum => Some(sum),
                _ => Some(sum / known.len() as f64),
            }
        }
    }
}

fn off_grid_error(ts: NaiveDateTime, frequency: Frequency) -> TsCastError {
    TsCastError::validation(format!(
        "record at {} is not on the {frequency} grid",
        format_timestamp(ts)
    ))
}

fn empty_report() -> GapReport {
    GapReport {
        expected_points: 0,
        present_points: 0,
        missing_points: 0,
        excluded_points: 0,
        total_gap_ranges: 0,
        gap_ranges: Vec::new(),
    }
}

fn gap_report(records: &[Record], excluded_points: u64) -> GapReport {
    let mut full = Vec::new();
    let mut open: Option<(NaiveDateTime, NaiveDateTime)> = None;
    for record in records {
        if record.is_missing() {
            open = match open {
                Some((start, _)) => Some((start, record.timestamp)),
                None => Some((record.timestamp, record.timestamp)),
            };
        } else if let Some(range) = open.take() {
            full.push(range);
        }
    }
    if let Some(range) = open {
        full.push(range);
    }

    let missing_points = records.iter().filter(|r| r.is_missing()).count() as u64;
    let expected_points = records.len() as u64;
    let total_gap_ranges = full.len() as u64;

    GapReport {
        expected_points,
        present_points: expected_points - missing_points,
        missing_points,
        excluded_points,
        total_gap_ranges,
        gap_ranges: full.into_iter().take(MAX_REPORTED_GAP_RANGES).collect(),
    }
}
