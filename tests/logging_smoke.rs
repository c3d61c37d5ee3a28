use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;
use tscast::{
    log_run_finish, log_run_start, normalize, parse_response, parse_timestamp, run_experiment,
    ExperimentConfig, Frequency, LoggingConfig, ModelProvider, NormalizeRequest, Prediction,
    RawTable, Record, SplitSpec, TimeSeriesTable, TsFormat, TsType,
};

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

struct EchoProvider;

impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn predict(
        &self,
        _prompt: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> tscast::Result<Prediction> {
        Ok(Prediction {
            response_text: "<out>[4.0, oops, 5.0]</out>".to_string(),
            prompt_tokens: 42,
            response_tokens: 7,
            elapsed_seconds: 0.05,
        })
    }
}

fn hourly_raw(values: &[&str]) -> RawTable {
    let mut raw = RawTable::new(vec!["date".into(), "value".into()]);
    for (hour, value) in values.iter().enumerate() {
        raw.push_row(vec![
            Some(format!("2016-07-01 {hour:02}:00:00")),
            (!value.is_empty()).then(|| value.to_string()),
        ])
        .expect("row width matches");
    }
    raw
}

fn experiment() -> ExperimentConfig {
    ExperimentConfig::new(
        "etth",
        Frequency::Hours(1),
        SplitSpec {
            start_date: parse_timestamp("2016-07-01 00:00:00").expect("valid date"),
            end_date: parse_timestamp("2016-07-01 03:00:00").expect("valid date"),
            periods: 2,
        },
    )
}

#[test]
fn normalize_reports_gaps_as_warning_events() {
    let start = parse_timestamp("2016-07-01 00:00:00").expect("valid date");
    let table = TimeSeriesTable::new(vec![
        Record::new(start, Some(1.0)),
        Record::new(start + chrono::Duration::hours(3), Some(4.0)),
    ])
    .expect("sorted records");

    let logs = capture_logs(Level::INFO, || {
        let request = NormalizeRequest::new(Frequency::Hours(1));
        let normalized = normalize(&table, &request).expect("normalize succeeds");
        assert_eq!(normalized.len(), 4);
    });

    assert!(logs.contains("\"event\":\"preprocess.normalize.gap_detected\""));
    assert!(logs.contains("\"event\":\"preprocess.normalize.finish\""));
}

#[test]
fn degraded_parse_is_logged_with_skip_counts() {
    let logs = capture_logs(Level::DEBUG, || {
        let parsed = parse_response("[1.0, two, 3.0]", TsFormat::Array, TsType::Numeric)
            .expect("two values recovered");
        assert_eq!(parsed.skipped, 1);
    });

    assert!(logs.contains("\"event\":\"codec.parse.token_skipped\""));
    assert!(logs.contains("\"event\":\"codec.parse.degraded\""));
    assert!(logs.contains("\"skipped\":1"));
}

#[test]
fn experiment_emits_stage_events() {
    let raw = hourly_raw(&["1", "2", "", "4", "5", "6"]);
    let logs = capture_logs(Level::INFO, || {
        let record = run_experiment(&raw, &experiment(), &EchoProvider).expect("experiment runs");
        assert_eq!(record.parse_skipped, 1);
    });

    for event in [
        "pipeline.experiment.start",
        "preprocess.standardize.finish",
        "preprocess.normalize.finish",
        "preprocess.split.finish",
        "prompt.generate.finish",
        "codec.parse.degraded",
        "pipeline.experiment.finish",
    ] {
        assert!(logs.contains(&format!("\"event\":\"{event}\"")), "missing {event}");
    }
}

#[test]
fn run_lifecycle_helpers_emit_baseline_events() {
    let raw = hourly_raw(&["1", "2", "3", "4", "5", "6"]);
    let record = run_experiment(&raw, &experiment(), &EchoProvider).expect("experiment runs");

    let logs = capture_logs(Level::INFO, || {
        log_run_start(&LoggingConfig::default(), &experiment(), Path::new("data/etth.csv"));
        log_run_finish(&record, Some(7));
    });

    assert!(logs.contains("\"event\":\"run.start\""));
    assert!(logs.contains("\"event\":\"run.finish\""));
    assert!(logs.contains("\"stored_id\":7"));
    assert!(logs.contains("\"event\":\"run.degraded_parse\""));
}
