//! File loading and saving for series data.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{Result, TsCastError};
use crate::table::{format_timestamp, RawTable, TimeSeriesTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Delimited(u8),
    JsonRecords,
}

fn file_kind(path: &Path) -> Result<FileKind> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => Ok(FileKind::Delimited(b',')),
        "tsv" => Ok(FileKind::Delimited(b'\t')),
        "json" => Ok(FileKind::JsonRecords),
        _ => Err(TsCastError::validation(format!(
            "unsupported file extension: '{ext}' ({})",
            path.display()
        ))),
    }
}

/// Reads a headered CSV/TSV file or a JSON array of flat objects.
///
/// Empty cells and JSON nulls become `None`. JSON columns are ordered by
/// first appearance across the records.
pub fn load_data(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    let table = match file_kind(path)? {
        FileKind::Delimited(delimiter) => load_delimited(path, delimiter)?,
        FileKind::JsonRecords => load_json_records(path)?,
    };
    info!(
        component = "loader",
        event = "loader.load.finish",
        path = %path.display(),
        columns = table.columns().len(),
        rows = table.len()
    );
    Ok(table)
}

fn load_delimited(path: &Path, delimiter: u8) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut table = RawTable::new(columns);
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
            .collect();
        table.push_row(row)?;
    }
    Ok(table)
}

fn load_json_records(path: &Path) -> Result<RawTable> {
    let reader = BufReader::new(File::open(path)?);
    let document: serde_json::Value = serde_json::from_reader(reader)?;
    let Some(items) = document.as_array() else {
        return Err(TsCastError::validation(
            "JSON input must be an array of record objects",
        ));
    };

    let mut objects = Vec::with_capacity(items.len());
    let mut columns: Vec<String> = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(object) = item.as_object() else {
            return Err(TsCastError::validation(format!(
                "JSON record {idx} is not an object"
            )));
        };
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        objects.push(object);
    }

    let mut table = RawTable::new(columns.clone());
    for (idx, object) in objects.into_iter().enumerate() {
        let row = columns
            .iter()
            .map(|column| json_cell(object.get(column), idx, column))
            .collect::<Result<Vec<_>>>()?;
        table.push_row(row)?;
    }
    Ok(table)
}

fn json_cell(
    value: Option<&serde_json::Value>,
    idx: usize,
    column: &str,
) -> Result<Option<String>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok((!s.is_empty()).then(|| s.clone())),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(TsCastError::validation(format!(
            "JSON record {idx} has a nested value in column '{column}'"
        ))),
    }
}

#[derive(Serialize)]
struct SavedRecord {
    date: String,
    value: Option<f64>,
}

/// Writes `date,value` rows (`.csv`) or `[{"date", "value"}]` records
/// (`.json`). Missing values are written as an empty cell or `null`.
pub fn save_data(table: &TimeSeriesTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let records: Vec<SavedRecord> = table
        .records()
        .iter()
        .map(|record| SavedRecord {
            date: format_timestamp(record.timestamp),
            value: record.value,
        })
        .collect();

    if has_extension(path, "csv") {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &records {
            writer.serialize(record)?;
        }
        writer.flush()?;
    } else if has_extension(path, "json") {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.flush()?;
    } else {
        return Err(TsCastError::validation(format!(
            "unsupported file extension for saving: {}",
            path.display()
        )));
    }

    info!(
        component = "loader",
        event = "loader.save.finish",
        path = %path.display(),
        rows = records.len()
    );
    Ok(())
}

fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::{standardize, PreprocessingConfig};
    use crate::table::{parse_timestamp, Record};

    #[test]
    fn csv_load_keeps_headers_and_blank_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.csv");
        std::fs::write(
            &path,
            "date,value\n2016-07-01 00:00:00,1.5\n2016-07-01 01:00:00,\n",
        )
        .unwrap();

        let raw = load_data(&path).unwrap();
        assert_eq!(raw.columns(), &["date".to_string(), "value".to_string()]);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.rows()[0][1].as_deref(), Some("1.5"));
        assert_eq!(raw.rows()[1][1], None);
    }

    #[test]
    fn tsv_and_json_records_load() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = dir.path().join("series.tsv");
        std::fs::write(&tsv, "date\tvalue\n2020-01-01\t3\n").unwrap();
        assert_eq!(load_data(&tsv).unwrap().rows()[0][1].as_deref(), Some("3"));

        let json = dir.path().join("series.json");
        std::fs::write(
            &json,
            r#"[{"date": "2020-01-01", "value": 3.5}, {"date": "2020-01-02", "value": null}]"#,
        )
        .unwrap();
        let raw = load_data(&json).unwrap();
        let value_idx = raw.column_index("value").unwrap();
        assert_eq!(raw.rows()[0][value_idx].as_deref(), Some("3.5"));
        assert_eq!(raw.rows()[1][value_idx], None);
    }

    #[test]
    fn unsupported_extensions_are_validation_errors() {
        for name in ["data.xlsx", "data.parquet", "data"] {
            let err = load_data(name).unwrap_err();
            assert!(matches!(err, TsCastError::Validation(_)), "{name}");
            assert!(err.to_string().contains("unsupported file extension"));
        }
    }

    #[test]
    fn saved_files_load_back_into_the_same_series() {
        let start = parse_timestamp("2016-07-01 00:00:00").unwrap();
        let table = TimeSeriesTable::new(vec![
            Record::new(start, Some(1.25)),
            Record::new(start + chrono::Duration::hours(1), None),
            Record::new(start + chrono::Duration::hours(2), Some(-4.0)),
        ])
        .unwrap();
        let dir = tempfile::tempdir().unwrap();

        for name in ["out.csv", "out.json"] {
            let path = dir.path().join(name);
            save_data(&table, &path).unwrap();
            let loaded = load_data(&path).unwrap();
            let restored = standardize(&loaded, &PreprocessingConfig::default()).unwrap();
            assert_eq!(restored.records(), table.records(), "{name}");
        }

        assert!(save_data(&table, dir.path().join("out.tsv")).is_err());
    }
}
