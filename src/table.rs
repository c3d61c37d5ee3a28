//! Canonical in-memory time series and the loosely-typed table it is built from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TsCastError};

const TIMESTAMP_RENDER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_GRID_POINTS: usize = 10_000_000;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// One observation. `value == None` is the missing sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

impl Record {
    pub fn new(timestamp: NaiveDateTime, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

/// Fixed time step of a regular series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Seconds(u32),
    Minutes(u32),
    Hours(u32),
    Days(u32),
    Weeks(u32),
    Months(u32),
}

impl Frequency {
    /// Timestamp `steps` grid steps after `anchor`.
    ///
    /// Month steps are always computed from the anchor so that day-of-month
    /// clamping (Jan 31 -> Feb 28) does not drift the rest of the grid.
    pub fn nth_after(self, anchor: NaiveDateTime, steps: u32) -> Option<NaiveDateTime> {
        let steps = i64::from(steps);
        match self {
            Self::Seconds(n) => anchor.checked_add_signed(ChronoDuration::try_seconds(
                steps.checked_mul(i64::from(n))?,
            )?),
            Self::Minutes(n) => anchor.checked_add_signed(ChronoDuration::try_minutes(
                steps.checked_mul(i64::from(n))?,
            )?),
            Self::Hours(n) => anchor.checked_add_signed(ChronoDuration::try_hours(
                steps.checked_mul(i64::from(n))?,
            )?),
            Self::Days(n) => anchor.checked_add_signed(ChronoDuration::try_days(
                steps.checked_mul(i64::from(n))?,
            )?),
            Self::Weeks(n) => anchor.checked_add_signed(ChronoDuration::try_weeks(
                steps.checked_mul(i64::from(n))?,
            )?),
            Self::Months(n) => {
                let total = u32::try_from(steps.checked_mul(i64::from(n))?).ok()?;
                anchor.checked_add_months(Months::new(total))
            }
        }
    }

    /// Every grid timestamp in `[start, end]`, anchored at `start`.
    pub fn grid(self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<NaiveDateTime>> {
        self.validate()?;
        if end < start {
            return Err(TsCastError::validation(format!(
                "grid end {} precedes start {}",
                format_timestamp(end),
                format_timestamp(start)
            )));
        }

        let mut out = Vec::new();
        let mut step = 0u32;
        while let Some(ts) = self.nth_after(start, step) {
            if ts > end {
                break;
            }
            if out.len() >= MAX_GRID_POINTS {
                return Err(TsCastError::validation(format!(
                    "time grid exceeds {MAX_GRID_POINTS} points"
                )));
            }
            out.push(ts);
            step = step
                .checked_add(1)
                .ok_or_else(|| TsCastError::validation("time grid step overflow"))?;
        }
        Ok(out)
    }

    fn multiplier(self) -> u32 {
        match self {
            Self::Seconds(n)
            | Self::Minutes(n)
            | Self::Hours(n)
            | Self::Days(n)
            | Self::Weeks(n)
            | Self::Months(n) => n,
        }
    }

    fn validate(self) -> Result<()> {
        if self.multiplier() == 0 {
            return Err(TsCastError::validation("frequency multiplier must be > 0"));
        }
        Ok(())
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n, unit) = match *self {
            Self::Seconds(n) => (n, "s"),
            Self::Minutes(n) => (n, "min"),
            Self::Hours(n) => (n, "h"),
            Self::Days(n) => (n, "D"),
            Self::Weeks(n) => (n, "W"),
            Self::Months(n) => (n, "MS"),
        };
        if n == 1 {
            write!(f, "{unit}")
        } else {
            write!(f, "{n}{unit}")
        }
    }
}

impl FromStr for Frequency {
    type Err = TsCastError;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let split_at = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TsCastError::validation(format!("invalid frequency: {raw}")))?;
        let (digits, unit) = trimmed.split_at(split_at);
        let n = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| TsCastError::validation(format!("invalid frequency: {raw}")))?
        };

        let freq = match unit {
            "s" | "S" | "sec" => Self::Seconds(n),
            "min" | "T" | "m" => Self::Minutes(n),
            "h" | "H" => Self::Hours(n),
            "D" | "d" => Self::Days(n),
            "W" | "w" => Self::Weeks(n),
            "M" | "MS" | "ME" => Self::Months(n),
            _ => return Err(TsCastError::validation(format!("invalid frequency: {raw}"))),
        };
        freq.validate()?;
        Ok(freq)
    }
}

/// Ordered, timestamp-unique series. Every pipeline stage returns a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesTable {
    records: Vec<Record>,
    frequency: Option<Frequency>,
}

impl TimeSeriesTable {
    /// Builds a table, rejecting unsorted or duplicated timestamps.
    pub fn new(records: Vec<Record>) -> Result<Self> {
        for pair in records.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(TsCastError::validation(format!(
                    "timestamps must be strictly increasing: {} then {}",
                    format_timestamp(pair[0].timestamp),
                    format_timestamp(pair[1].timestamp)
                )));
            }
        }
        Ok(Self {
            records,
            frequency: None,
        })
    }

    pub(crate) fn from_sorted(records: Vec<Record>, frequency: Option<Frequency>) -> Self {
        Self { records, frequency }
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn frequency(&self) -> Option<Frequency> {
        self.frequency
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.value).collect()
    }

    pub fn missing_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_missing()).count()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.records.first().map(|r| r.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.records.last().map(|r| r.timestamp)
    }

    pub(crate) fn map_values(&self, values: Vec<Option<f64>>) -> Self {
        let records = self
            .records
            .iter()
            .zip(values)
            .map(|(record, value)| Record::new(record.timestamp, value))
            .collect();
        Self::from_sorted(records, self.frequency)
    }
}

/// Loosely-typed tabular input: named columns and optional string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(TsCastError::validation(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    // Year-month bounds such as "2020-01".
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_RENDER_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).expect("valid timestamp")
    }

    #[test]
    fn parses_common_timestamp_shapes() {
        let expected = NaiveDate::from_ymd_opt(2016, 7, 1)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        assert_eq!(ts("2016-07-01 03:00:00"), expected);
        assert_eq!(ts("2016-07-01T03:00:00"), expected);
        assert_eq!(ts("2016-07-01 03:00"), expected);
        assert_eq!(ts("2016-07-01T03:00:00Z"), expected);
        assert_eq!(ts("2016-07-01"), expected - ChronoDuration::hours(3));
        assert_eq!(ts("2016-07"), ts("2016-07-01"));
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn frequency_aliases_parse_and_render() {
        assert_eq!("h".parse::<Frequency>().unwrap(), Frequency::Hours(1));
        assert_eq!("H".parse::<Frequency>().unwrap(), Frequency::Hours(1));
        assert_eq!("15min".parse::<Frequency>().unwrap(), Frequency::Minutes(15));
        assert_eq!("D".parse::<Frequency>().unwrap(), Frequency::Days(1));
        assert_eq!("MS".parse::<Frequency>().unwrap(), Frequency::Months(1));
        assert_eq!(Frequency::Minutes(15).to_string(), "15min");
        assert_eq!(Frequency::Hours(1).to_string(), "h");
        assert!("0h".parse::<Frequency>().is_err());
        assert!("fortnight".parse::<Frequency>().is_err());
        assert!("12".parse::<Frequency>().is_err());
    }

    #[test]
    fn hourly_grid_is_inclusive() {
        let grid = Frequency::Hours(1)
            .grid(ts("2016-07-01 00:00"), ts("2016-07-01 05:00"))
            .unwrap();
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[5], ts("2016-07-01 05:00"));
    }

    #[test]
    fn month_grid_does_not_drift_after_short_month() {
        let grid = Frequency::Months(1)
            .grid(ts("2024-01-31"), ts("2024-04-30"))
            .unwrap();
        assert_eq!(
            grid,
            vec![
                ts("2024-01-31"),
                ts("2024-02-29"),
                ts("2024-03-31"),
                ts("2024-04-30")
            ]
        );
    }

    #[test]
    fn table_rejects_duplicate_or_unsorted_timestamps() {
        let a = Record::new(ts("2024-01-01"), Some(1.0));
        let b = Record::new(ts("2024-01-02"), Some(2.0));
        assert!(TimeSeriesTable::new(vec![a, b]).is_ok());
        assert!(TimeSeriesTable::new(vec![b, a]).is_err());
        assert!(TimeSeriesTable::new(vec![a, a]).is_err());
    }

    #[test]
    fn raw_table_rejects_ragged_rows() {
        let mut raw = RawTable::new(vec!["date".into(), "value".into()]);
        assert!(raw.push_row(vec![Some("2024-01-01".into())]).is_err());
        raw.push_row(vec![Some("2024-01-01".into()), None]).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw.column_index("value"), Some(1));
    }
}
