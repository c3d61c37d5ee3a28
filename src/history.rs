//! SQLite store of experiment results.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Result, TsCastError};
use crate::pipeline::ExperimentRecord;
use crate::table::{format_timestamp, parse_timestamp};

/// Hex SHA-256 of the prompt text, used to group runs of the same prompt.
pub fn prompt_fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub model: Option<String>,
    pub dataset: Option<String>,
    pub prompt_fingerprint: Option<String>,
    pub limit: Option<usize>,
}

pub struct HistoryStore {
    conn: Connection,
}

const SELECT_COLUMNS: &str = "
    id, created_at, model, temperature, dataset, start_date, end_date, periods,
    prompt, prompt_fingerprint, prompt_type, ts_format, ts_type, y_val, y_pred,
    smape, mae, rmse, prompt_tokens, response_tokens, response_time_seconds,
    parse_skipped, used_fallback, val_stats, pred_stats
";

impl HistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        let store = Self::from_connection(conn)?;
        info!(
            component = "history",
            event = "history.open",
            path = %path.display()
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS experiments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                model TEXT NOT NULL,
                temperature REAL NOT NULL,
                dataset TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                periods INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                prompt_fingerprint TEXT NOT NULL,
                prompt_type TEXT NOT NULL,
                ts_format TEXT NOT NULL,
                ts_type TEXT NOT NULL,
                y_val TEXT NOT NULL,
                y_pred TEXT NOT NULL,
                smape REAL NOT NULL,
                mae REAL NOT NULL,
                rmse REAL NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                response_tokens INTEGER NOT NULL,
                response_time_seconds REAL NOT NULL,
                parse_skipped INTEGER NOT NULL,
                used_fallback INTEGER NOT NULL,
                val_stats TEXT NOT NULL,
                pred_stats TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_experiments_dataset_smape
                ON experiments(dataset, smape);
            CREATE INDEX IF NOT EXISTS idx_experiments_fingerprint
                ON experiments(prompt_fingerprint);
            ",
        )?;
        Ok(Self { conn })
    }

    /// Stores `record` and returns its row id. `record.id` is ignored.
    pub fn insert(&self, record: &ExperimentRecord) -> Result<i64> {
        self.conn.execute(
            "
            INSERT INTO experiments (
                created_at, model, temperature, dataset, start_date, end_date, periods,
                prompt, prompt_fingerprint, prompt_type, ts_format, ts_type, y_val, y_pred,
                smape, mae, rmse, prompt_tokens, response_tokens, response_time_seconds,
                parse_skipped, used_fallback, val_stats, pred_stats
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
            )
            ",
            params![
                record.created_at.to_rfc3339(),
                record.model,
                record.temperature,
                record.dataset,
                format_timestamp(record.start_date),
                format_timestamp(record.end_date),
                record.periods as i64,
                record.prompt,
                record.prompt_fingerprint,
                record.prompt_type.as_str(),
                record.ts_format.as_str(),
                record.ts_type.as_str(),
                serde_json::to_string(&record.y_val)?,
                serde_json::to_string(&record.y_pred)?,
                record.metrics.smape,
                record.metrics.mae,
                record.metrics.rmse,
                record.prompt_tokens as i64,
                record.response_tokens as i64,
                record.response_time_seconds,
                record.parse_skipped as i64,
                record.used_fallback,
                serde_json::to_string(&record.val_stats)?,
                serde_json::to_string(&record.pred_stats)?,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            component = "history",
            event = "history.insert",
            id,
            dataset = %record.dataset,
            model = %record.model,
            smape = record.metrics.smape
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<ExperimentRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM experiments WHERE id = ?1");
        let stored = self
            .conn
            .query_row(&sql, params![id], StoredRow::from_row)
            .optional()?;
        stored.map(StoredRow::into_record).transpose()
    }

    /// Newest first.
    pub fn list(&self, filter: &HistoryFilter) -> Result<Vec<ExperimentRecord>> {
        let limit = filter.limit.map_or(-1, |limit| limit as i64);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM experiments
             WHERE (?1 IS NULL OR model = ?1)
               AND (?2 IS NULL OR dataset = ?2)
               AND (?3 IS NULL OR prompt_fingerprint = ?3)
             ORDER BY id DESC
             LIMIT ?4"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![
            filter.model,
            filter.dataset,
            filter.prompt_fingerprint,
            limit
        ])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(StoredRow::from_row(row)?.into_record()?);
        }
        Ok(records)
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM experiments WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Lowest-sMAPE record, optionally restricted to one dataset. Ties go to
    /// the earliest insert.
    pub fn best_by_smape(&self, dataset: Option<&str>) -> Result<Option<ExperimentRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM experiments
             WHERE (?1 IS NULL OR dataset = ?1)
             ORDER BY smape ASC, id ASC
             LIMIT 1"
        );
        let stored = self
            .conn
            .query_row(&sql, params![dataset], StoredRow::from_row)
            .optional()?;
        stored.map(StoredRow::into_record).transpose()
    }
}

/// Column values as stored; decoded into an `ExperimentRecord` outside the
/// rusqlite row callback so that decode failures keep their own error kind.
struct StoredRow {
    id: i64,
    created_at: String,
    model: String,
    temperature: f64,
    dataset: String,
    start_date: String,
    end_date: String,
    periods: i64,
    prompt: String,
    prompt_fingerprint: String,
    prompt_type: String,
    ts_format: String,
    ts_type: String,
    y_val: String,
    y_pred: String,
    smape: f64,
    mae: f64,
    rmse: f64,
    prompt_tokens: i64,
    response_tokens: i64,
    response_time_seconds: f64,
    parse_skipped: i64,
    used_fallback: bool,
    val_stats: String,
    pred_stats: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            model: row.get(2)?,
            temperature: row.get(3)?,
            dataset: row.get(4)?,
            start_date: row.get(5)?,
            end_date: row.get(6)?,
            periods: row.get(7)?,
            prompt: row.get(8)?,
            prompt_fingerprint: row.get(9)?,
            prompt_type: row.get(10)?,
            ts_format: row.get(11)?,
            ts_type: row.get(12)?,
            y_val: row.get(13)?,
            y_pred: row.get(14)?,
            smape: row.get(15)?,
            mae: row.get(16)?,
            rmse: row.get(17)?,
            prompt_tokens: row.get(18)?,
            response_tokens: row.get(19)?,
            response_time_seconds: row.get(20)?,
            parse_skipped: row.get(21)?,
            used_fallback: row.get(22)?,
            val_stats: row.get(23)?,
            pred_stats: row.get(24)?,
        })
    }

    fn into_record(self) -> Result<ExperimentRecord> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| {
                TsCastError::validation(format!("row {}: bad created_at: {err}", self.id))
            })?
            .with_timezone(&Utc);
        let stored_date = |raw: &str| {
            parse_timestamp(raw).ok_or_else(|| {
                TsCastError::validation(format!("row {}: bad stored date '{raw}'", self.id))
            })
        };

        Ok(ExperimentRecord {
            id: Some(self.id),
            created_at,
            start_date: stored_date(&self.start_date)?,
            end_date: stored_date(&self.end_date)?,
            model: self.model,
            temperature: self.temperature,
            dataset: self.dataset,
            periods: self.periods.max(0) as usize,
            prompt: self.prompt,
            prompt_fingerprint: self.prompt_fingerprint,
            prompt_type: self.prompt_type.parse()?,
            ts_format: self.ts_format.parse()?,
            ts_type: self.ts_type.parse()?,
            y_val: serde_json::from_str(&self.y_val)?,
            y_pred: serde_json::from_str(&self.y_pred)?,
            metrics: crate::metrics::ForecastMetrics {
                smape: self.smape,
                mae: self.mae,
                rmse: self.rmse,
            },
            prompt_tokens: self.prompt_tokens.max(0) as u64,
            response_tokens: self.response_tokens.max(0) as u64,
            response_time_seconds: self.response_time_seconds,
            parse_skipped: self.parse_skipped.max(0) as usize,
            used_fallback: self.used_fallback,
            val_stats: serde_json::from_str(&self.val_stats)?,
            pred_stats: serde_json::from_str(&self.pred_stats)?,
        })
    }
}
