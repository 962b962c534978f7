use crate::mqtt::Publisher;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout_at, Duration, Instant};
use waste_core::console;

const UNIT_OUTPUT_BUFFER: usize = 64;

/// Starts one unit of work writing its output lines into the given sender.
pub type UnitFactory = Box<dyn Fn(mpsc::Sender<String>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    pub unit_timeout: Duration,
    pub cycle_pause: Duration,
}

#[derive(Debug, Default)]
pub struct UnitOutput {
    pub lines: Vec<String>,
    pub timed_out: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub kept: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out: bool,
}

/// `None` for lines that are not records at all, such as cycle markers.
fn parse_record(line: &str) -> Option<Result<Map<String, Value>, serde_json::Error>> {
    if !line.starts_with('{') {
        return None;
    }
    Some(serde_json::from_str(line))
}

pub struct Supervisor<P> {
    publisher: P,
    topic: String,
    timing: SupervisorTiming,
    factory: UnitFactory,
}

impl<P: Publisher> Supervisor<P> {
    pub fn new(publisher: P, topic: String, timing: SupervisorTiming, factory: UnitFactory) -> Self {
        Self {
            publisher,
            topic,
            timing,
            factory,
        }
    }

    pub fn into_publisher(self) -> P {
        self.publisher
    }

    /// Runs one unit of work until it finishes or its deadline passes.
    /// Lines not received by the deadline are lost with the aborted task.
    pub async fn collect_unit(&self) -> UnitOutput {
        let (tx, mut rx) = mpsc::channel(UNIT_OUTPUT_BUFFER);
        let deadline = Instant::now() + self.timing.unit_timeout;
        let task = tokio::spawn((self.factory)(tx));

        let mut output = UnitOutput::default();
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(line)) => output.lines.push(line),
                Ok(None) => break,
                Err(_) => {
                    output.timed_out = true;
                    break;
                }
            }
        }
        task.abort();
        output
    }

    pub async fn run_unit(&self) -> UnitReport {
        let output = self.collect_unit().await;
        let mut report = UnitReport {
            timed_out: output.timed_out,
            ..UnitReport::default()
        };

        for line in output.lines.iter().flat_map(|chunk| chunk.lines()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            report.kept += 1;
            let record = match parse_record(line) {
                None => {
                    tracing::debug!(line, "skipping non-record output");
                    report.skipped += 1;
                    continue;
                }
                Some(Err(err)) => {
                    tracing::warn!(error=%err, line, "dropping malformed record");
                    report.skipped += 1;
                    continue;
                }
                Some(Ok(record)) => record,
            };

            match self
                .publisher
                .publish(&self.topic, line.as_bytes().to_vec())
                .await
            {
                Ok(()) => {
                    report.published += 1;
                    log_published(&record);
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(error=%err, topic=%self.topic, "failed to publish record");
                }
            }
        }
        report
    }

    /// Never returns; callers race it against a shutdown signal.
    pub async fn run(&self) {
        loop {
            let report = self.run_unit().await;
            if report.timed_out {
                tracing::info!(
                    kept = report.kept,
                    published = report.published,
                    skipped = report.skipped,
                    failed = report.failed,
                    "generation cycle cut off at deadline"
                );
            } else {
                tracing::info!(
                    kept = report.kept,
                    published = report.published,
                    skipped = report.skipped,
                    failed = report.failed,
                    "generation cycle finished"
                );
            }
            sleep(self.timing.cycle_pause).await;
        }
    }
}

fn log_published(record: &Map<String, Value>) {
    let device_id = record.get("device_id").and_then(Value::as_str);
    let fill = record.get("fill_percentage").and_then(Value::as_f64);
    let temperature = record.get("temperature").and_then(Value::as_f64);
    match (device_id, fill, temperature) {
        (Some(device_id), Some(fill), Some(temperature)) => {
            tracing::info!("{}", console::status_line(device_id, fill, temperature));
        }
        _ => tracing::debug!("published record without status fields"),
    }
}
