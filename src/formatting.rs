//! Textual codec: series -> text fragments, and model responses -> numbers.
//!
//! Serialization is driven by two fixed tables. `TsType` selects a value
//! codec (how one number becomes a token and back) and `TsFormat` selects a
//! layout codec (how tokens are laid out and later located in free text).
//! Every supported `(TsFormat, TsType)` pair is the composition of one entry
//! from each table, so both directions always exist.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TsCastError};
use crate::preprocessor::is_missing_token;
use crate::table::{format_timestamp, parse_timestamp, Record};

pub const DEFAULT_DECIMALS: u32 = 6;
const MAX_DECIMALS: u32 = 15;
const MISSING_TOKEN: &str = "nan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TsFormat {
    Array,
    Structured,
    Plain,
    Csv,
    Tsv,
    Custom,
    Json,
    Markdown,
    Context,
    Symbol,
}

impl TsFormat {
    pub const ALL: [TsFormat; 10] = [
        Self::Array,
        Self::Structured,
        Self::Plain,
        Self::Csv,
        Self::Tsv,
        Self::Custom,
        Self::Json,
        Self::Markdown,
        Self::Context,
        Self::Symbol,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Structured => "structured",
            Self::Plain => "plain",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Custom => "custom",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Context => "context",
            Self::Symbol => "symbol",
        }
    }

    /// One-line description of the layout, used in prompt instructions.
    pub fn describe(self) -> &'static str {
        layout_codec(self).description
    }
}

impl fmt::Display for TsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TsFormat {
    type Err = TsCastError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "array" => Ok(Self::Array),
            "structured" | "structured-line" => Ok(Self::Structured),
            "plain" => Ok(Self::Plain),
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "custom" => Ok(Self::Custom),
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            "context" => Ok(Self::Context),
            "symbol" => Ok(Self::Symbol),
            other => Err(TsCastError::validation(format!("unknown ts_format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TsType {
    /// Decimal literal, e.g. `-3.5`.
    Numeric,
    /// Digit-separated characters, e.g. `- 3 . 5`.
    Textual,
}

impl TsType {
    pub const ALL: [TsType; 2] = [Self::Numeric, Self::Textual];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Textual => "textual",
        }
    }

    pub fn describe(self) -> &'static str {
        value_codec(self).description
    }
}

impl fmt::Display for TsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TsType {
    type Err = TsCastError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "numeric" | "numeric-decimal" | "decimal" => Ok(Self::Numeric),
            "textual" | "digit-separated" | "digits" => Ok(Self::Textual),
            other => Err(TsCastError::validation(format!("unknown ts_type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeOptions {
    /// Values are rounded to this many fractional digits before rendering.
    pub decimals: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            decimals: DEFAULT_DECIMALS,
        }
    }
}

/// Result of decoding a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSeries {
    /// Decoded values in response order; `None` where the response wrote a
    /// missing marker.
    pub values: Vec<Option<f64>>,
    /// Value cells that could not be decoded and were dropped.
    pub skipped: usize,
    /// The format-specific reader recovered no number and the response was
    /// re-read as a numeric array.
    pub used_fallback: bool,
}

impl ParsedSeries {
    pub fn recovered(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_degraded(&self) -> bool {
        self.skipped > 0 || self.used_fallback || self.recovered() < self.values.len()
    }

    /// The leading `periods` values as plain numbers.
    ///
    /// Extra trailing values are ignored. Fewer than `periods` values, or a
    /// missing marker among them, is a `PartialParse` error.
    pub fn forecast(&self, periods: usize) -> Result<Vec<f64>> {
        let head = &self.values[..periods.min(self.values.len())];
        let usable: Vec<f64> = head.iter().flatten().copied().collect();
        if usable.len() < periods {
            return Err(TsCastError::PartialParse {
                expected: periods,
                recovered: usable.len(),
                skipped: self.skipped,
            });
        }
        Ok(usable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Decoded {
    Value(f64),
    Missing,
    Invalid,
}

struct ValueCodec {
    description: &'static str,
    encode: fn(Option<f64>, u32) -> String,
    decode: fn(&str) -> Decoded,
}

#[derive(Debug, Clone)]
struct EncodedRow {
    timestamp: String,
    value: String,
    /// The token is a bare JSON number (numeric type, known value).
    json_number: bool,
    direction: &'static str,
}

struct LayoutCodec {
    description: &'static str,
    render: fn(&[EncodedRow]) -> String,
    /// Value cells located in the response, in order.
    read: fn(&str) -> Vec<String>,
}

static NUMERIC: ValueCodec = ValueCodec {
    description: "plain decimal numbers such as 12.5 or -3.0",
    encode: encode_numeric,
    decode: decode_numeric,
};

static TEXTUAL: ValueCodec = ValueCodec {
    description: "numbers written digit by digit separated by single spaces, such as 1 2 . 5 or - 3 . 0",
    encode: encode_textual,
    decode: decode_textual,
};

static ARRAY: LayoutCodec = LayoutCodec {
    description: "a single bracketed, comma-separated list such as [v1, v2, v3]",
    render: render_array,
    read: read_array,
};

static STRUCTURED: LayoutCodec = LayoutCodec {
    description: "one line per period formatted as `YYYY-MM-DD HH:MM:SS: value`",
    render: render_structured,
    read: read_structured,
};

static PLAIN: LayoutCodec = LayoutCodec {
    description: "one line per period formatted as `Date: YYYY-MM-DD HH:MM:SS, Value: value`",
    render: render_plain,
    read: read_plain,
};

static CSV: LayoutCodec = LayoutCodec {
    description: "CSV with the header `Date,Value` and one `date,value` row per period",
    render: render_csv,
    read: read_csv,
};

static TSV: LayoutCodec = LayoutCodec {
    description: "tab-separated rows with the header `Date<TAB>Value`",
    render: render_tsv,
    read: read_tsv,
};

static CUSTOM: LayoutCodec = LayoutCodec {
    description: "pipe-separated rows with the header `Date|Value`",
    render: render_custom,
    read: read_custom,
};

static JSON: LayoutCodec = LayoutCodec {
    description: "a JSON array of objects with the keys \"Date\" and \"Value\"",
    render: render_json,
    read: read_json,
};

static MARKDOWN: LayoutCodec = LayoutCodec {
    description: "a Markdown table with the columns |Date|Value|",
    render: render_markdown,
    read: read_markdown,
};

static CONTEXT: LayoutCodec = LayoutCodec {
    description: "CSV with the header `Date,Value` where each value is wrapped in brackets: `date,[value]`",
    render: render_context,
    read: read_context,
};

static SYMBOL: LayoutCodec = LayoutCodec {
    description: "CSV with the header `Date,Value,DirectionIndicator` where the indicator is → (flat), ↑ (up) or ↓ (down)",
    render: render_symbol,
    read: read_csv,
};

fn value_codec(ts_type: TsType) -> &'static ValueCodec {
    match ts_type {
        TsType::Numeric => &NUMERIC,
        TsType::Textual => &TEXTUAL,
    }
}

fn layout_codec(ts_format: TsFormat) -> &'static LayoutCodec {
    match ts_format {
        TsFormat::Array => &ARRAY,
        TsFormat::Structured => &STRUCTURED,
        TsFormat::Plain => &PLAIN,
        TsFormat::Csv => &CSV,
        TsFormat::Tsv => &TSV,
        TsFormat::Custom => &CUSTOM,
        TsFormat::Json => &JSON,
        TsFormat::Markdown => &MARKDOWN,
        TsFormat::Context => &CONTEXT,
        TsFormat::Symbol => &SYMBOL,
    }
}

pub fn encode_value(value: Option<f64>, ts_type: TsType, opts: &EncodeOptions) -> String {
    (value_codec(ts_type).encode)(value, opts.decimals.min(MAX_DECIMALS))
}

/// Inverse of [`encode_value`]. `Ok(None)` is a missing marker.
pub fn decode_value(token: &str, ts_type: TsType) -> Result<Option<f64>> {
    match (value_codec(ts_type).decode)(token) {
        Decoded::Value(v) => Ok(Some(v)),
        Decoded::Missing => Ok(None),
        Decoded::Invalid => Err(TsCastError::validation(format!(
            "cannot decode '{token}' as {ts_type}"
        ))),
    }
}

/// Renders records in the given layout. Array ignores timestamps.
pub fn format_series(
    records: &[Record],
    ts_format: TsFormat,
    ts_type: TsType,
    opts: &EncodeOptions,
) -> String {
    let codec = value_codec(ts_type);
    let decimals = opts.decimals.min(MAX_DECIMALS);
    let rows: Vec<EncodedRow> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| EncodedRow {
            timestamp: format_timestamp(record.timestamp),
            value: (codec.encode)(record.value, decimals),
            json_number: ts_type == TsType::Numeric && record.value.is_some(),
            direction: direction(idx.checked_sub(1).map(|i| records[i].value), record.value),
        })
        .collect();
    (layout_codec(ts_format).render)(&rows)
}

/// Decodes a model response.
///
/// `<think>` blocks are discarded and, when present, only the last
/// `<out>...</out>` span is read. If the layout reader recovers no number
/// the span is re-read as a numeric array. Undecodable cells are skipped
/// and counted; the call fails only when no number is recovered.
pub fn parse_response(
    response: &str,
    ts_format: TsFormat,
    ts_type: TsType,
) -> Result<ParsedSeries> {
    let cleaned = strip_think_blocks(response);
    let span = output_span(&cleaned);

    let mut cells = (layout_codec(ts_format).read)(span);
    let mut parsed = decode_cells(&cells, value_codec(ts_type).decode);
    if parsed.recovered() == 0 && !(ts_format == TsFormat::Array && ts_type == TsType::Numeric) {
        let array_cells = read_array(span);
        let mut fallback = decode_cells(&array_cells, decode_numeric);
        if fallback.recovered() > 0 || cells.is_empty() {
            fallback.used_fallback = true;
            cells = array_cells;
            parsed = fallback;
        }
    }

    let skipped = parsed.skipped;
    let recovered = parsed.recovered();
    if recovered == 0 {
        warn!(
            component = "codec",
            event = "codec.parse.empty",
            ts_format = ts_format.as_str(),
            ts_type = ts_type.as_str(),
            cells = cells.len(),
            skipped
        );
        return Err(TsCastError::PartialParse {
            expected: cells.len(),
            recovered: 0,
            skipped,
        });
    }

    if parsed.is_degraded() {
        warn!(
            component = "codec",
            event = "codec.parse.degraded",
            ts_format = ts_format.as_str(),
            ts_type = ts_type.as_str(),
            recovered,
            skipped,
            missing = parsed.values.len() - recovered,
            used_fallback = parsed.used_fallback
        );
    }
    info!(
        component = "codec",
        event = "codec.parse.finish",
        ts_format = ts_format.as_str(),
        ts_type = ts_type.as_str(),
        recovered
    );

    Ok(parsed)
}

fn decode_cells(cells: &[String], decode: fn(&str) -> Decoded) -> ParsedSeries {
    let mut values = Vec::with_capacity(cells.len());
    let mut skipped = 0usize;
    for cell in cells {
        match decode(cell) {
            Decoded::Value(v) => values.push(Some(v)),
            Decoded::Missing => values.push(None),
            Decoded::Invalid => {
                debug!(
                    component = "codec",
                    event = "codec.parse.token_skipped",
                    token = %cell
                );
                skipped += 1;
            }
        }
    }
    ParsedSeries {
        values,
        skipped,
        used_fallback: false,
    }
}

fn encode_numeric(value: Option<f64>, decimals: u32) -> String {
    let Some(value) = value else {
        return MISSING_TOKEN.to_string();
    };
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    let rounded = if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    };
    // Normalizes -0.0 so it renders as "0.0".
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:?}")
}

fn decode_numeric(token: &str) -> Decoded {
    let stripped = strip_decoration(token);
    if is_missing_token(stripped) {
        return if stripped.is_empty() {
            Decoded::Invalid
        } else {
            Decoded::Missing
        };
    }
    match stripped.parse::<f64>() {
        Ok(v) if v.is_finite() => Decoded::Value(v),
        _ => Decoded::Invalid,
    }
}

fn encode_textual(value: Option<f64>, decimals: u32) -> String {
    let numeric = encode_numeric(value, decimals);
    let chars: Vec<String> = numeric.chars().map(String::from).collect();
    chars.join(" ")
}

fn decode_textual(token: &str) -> Decoded {
    let joined: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    decode_numeric(&joined)
}

fn strip_decoration(token: &str) -> &str {
    token.trim().trim_matches(|c: char| {
        !(c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '.')
    })
}

fn direction(previous: Option<Option<f64>>, current: Option<f64>) -> &'static str {
    match (previous.flatten(), current) {
        (Some(prev), Some(cur)) if cur > prev => "↑",
        (Some(prev), Some(cur)) if cur < prev => "↓",
        _ => "→",
    }
}

fn render_array(rows: &[EncodedRow]) -> String {
    let values: Vec<&str> = rows.iter().map(|r| r.value.as_str()).collect();
    format!("[{}]", values.join(", "))
}

fn render_lines(
    header: Option<&str>,
    rows: &[EncodedRow],
    line: impl Fn(&EncodedRow) -> String,
) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(rows.len() + 2);
    if let Some(header) = header {
        lines.push(header.to_string());
    }
    lines.extend(rows.iter().map(line));
    lines.join("\n")
}

fn render_structured(rows: &[EncodedRow]) -> String {
    render_lines(None, rows, |r| format!("{}: {}", r.timestamp, r.value))
}

fn render_plain(rows: &[EncodedRow]) -> String {
    render_lines(None, rows, |r| format!("Date: {}, Value: {}", r.timestamp, r.value))
}

fn render_csv(rows: &[EncodedRow]) -> String {
    render_lines(Some("Date,Value"), rows, |r| format!("{},{}", r.timestamp, r.value))
}

fn render_tsv(rows: &[EncodedRow]) -> String {
    render_lines(Some("Date\tValue"), rows, |r| format!("{}\t{}", r.timestamp, r.value))
}

fn render_custom(rows: &[EncodedRow]) -> String {
    render_lines(Some("Date|Value"), rows, |r| format!("{}|{}", r.timestamp, r.value))
}

fn render_json(rows: &[EncodedRow]) -> String {
    let objects: Vec<String> = rows
        .iter()
        .map(|r| {
            let value = if r.json_number {
                r.value.clone()
            } else {
                format!("\"{}\"", r.value)
            };
            format!("{{\"Date\": \"{}\", \"Value\": {}}}", r.timestamp, value)
        })
        .collect();
    format!("[{}]", objects.join(", "))
}

fn render_markdown(rows: &[EncodedRow]) -> String {
    render_lines(Some("|Date|Value|\n|---|---|"), rows, |r| {
        format!("|{}|{}|", r.timestamp, r.value)
    })
}

fn render_context(rows: &[EncodedRow]) -> String {
    render_lines(Some("Date,Value"), rows, |r| format!("{},[{}]", r.timestamp, r.value))
}

fn render_symbol(rows: &[EncodedRow]) -> String {
    render_lines(Some("Date,Value,DirectionIndicator"), rows, |r| {
        format!("{},{},{}", r.timestamp, r.value, r.direction)
    })
}

/// Cells of the most number-like bracketed group; the later group wins ties.
fn read_array(span: &str) -> Vec<String> {
    let mut best: Option<(usize, Vec<String>)> = None;
    let mut rest = span;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let (inner, next) = match after.find(']') {
            Some(close) => (&after[..close], &after[close + 1..]),
            None => (after, ""),
        };
        let cells = split_cells(inner);
        let score = cells.iter().filter(|cell| looks_numeric(cell)).count();
        if best.as_ref().map_or(true, |(top, _)| score >= *top) {
            best = Some((score, cells));
        }
        rest = next;
    }

    match best {
        Some((_, cells)) => cells,
        None => split_cells(span),
    }
}

fn split_cells(inner: &str) -> Vec<String> {
    inner
        .split([',', '\n'])
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}

fn looks_numeric(cell: &str) -> bool {
    !matches!(decode_numeric(cell), Decoded::Invalid)
        || !matches!(decode_textual(cell), Decoded::Invalid)
}

/// Value cell of every line whose first cell is a timestamp.
fn read_delimited(span: &str, delimiter: char) -> Vec<String> {
    span.lines()
        .filter_map(|line| {
            let mut cells = line.split(delimiter);
            let date = cells.next()?;
            let value = cells.next()?;
            parse_timestamp(date.trim())?;
            Some(value.trim().to_string())
        })
        .collect()
}

fn read_csv(span: &str) -> Vec<String> {
    read_delimited(span, ',')
}

fn read_tsv(span: &str) -> Vec<String> {
    read_delimited(span, '\t')
}

fn read_custom(span: &str) -> Vec<String> {
    read_delimited(span, '|')
}

fn read_context(span: &str) -> Vec<String> {
    read_delimited(span, ',')
        .into_iter()
        .map(|cell| cell.trim_matches(|c| c == '[' || c == ']').to_string())
        .collect()
}

fn read_markdown(span: &str) -> Vec<String> {
    span.lines()
        .filter_map(|line| {
            let row = line.trim().trim_matches('|');
            let mut cells = row.split('|');
            let date = cells.next()?;
            let value = cells.next()?;
            parse_timestamp(date.trim())?;
            Some(value.trim().to_string())
        })
        .collect()
}

fn read_structured(span: &str) -> Vec<String> {
    span.lines()
        .filter_map(|line| {
            let (date, value) = line.rsplit_once(':')?;
            parse_timestamp(date.trim())?;
            Some(value.trim().to_string())
        })
        .collect()
}

fn read_plain(span: &str) -> Vec<String> {
    let pattern = plain_row_pattern();
    span.lines()
        .filter_map(|line| {
            let captures = pattern.captures(line.trim())?;
            parse_timestamp(captures.get(1)?.as_str().trim())?;
            Some(captures.get(2)?.as_str().trim().to_string())
        })
        .collect()
}

fn read_json(span: &str) -> Vec<String> {
    if let (Some(open), Some(close)) = (span.find('['), span.rfind(']')) {
        if open < close {
            if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(&span[open..=close]) {
                return items.iter().map(json_value_cell).collect();
            }
        }
    }

    // Not valid JSON: pick out `"Value": x` pairs lexically.
    json_value_pattern()
        .captures_iter(span)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str().trim_matches('"').to_string()))
        .collect()
}

/// `{"Value": x}` objects and bare scalars both yield a cell.
fn json_value_cell(item: &serde_json::Value) -> String {
    let value = match item {
        serde_json::Value::Object(object) => object.get("Value"),
        scalar => Some(scalar),
    };
    match value {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) => MISSING_TOKEN.to_string(),
        // An element without a usable value still counts as a located cell.
        _ => String::new(),
    }
}

fn plain_row_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Date:\s*([^,]+),\s*Value:\s*(.*)$").expect("plain row pattern is valid")
    })
}

fn json_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#""Value"\s*:\s*("[^"]*"|[^,}\s\]]+)"#).expect("json value pattern is valid")
    })
}

fn think_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern is valid"))
}

pub(crate) fn strip_think_blocks(response: &str) -> String {
    think_block_pattern()
        .replace_all(response, "")
        .trim()
        .to_string()
}

fn output_span(text: &str) -> &str {
    let Some(open) = text.rfind("<out>") else {
        return text;
    };
    let rest = &text[open + "<out>".len()..];
    match rest.find("</out>") {
        Some(close) => &rest[..close],
        None => rest,
    }
}
