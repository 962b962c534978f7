use crate::influx::{PointWriter, StoreError};
use crate::point::Point;
use chrono::Utc;
use std::future::Future;
use waste_core::console;
use waste_core::{InvalidReading, Reading};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload does not match the reading schema: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("reading failed validation: {0}")]
    Schema(#[from] InvalidReading),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Invoked by the listener once per inbound publish, possibly concurrently.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), IngestError>> + Send;
}

pub fn decode_reading(payload: &[u8]) -> Result<Reading, IngestError> {
    let text = std::str::from_utf8(payload)?;
    let reading: Reading = serde_json::from_str(text)?;
    reading.validate()?;
    Ok(reading)
}

/// Turns each reading into exactly one point; no batching, no dedup.
pub struct IngestHandler<W> {
    writer: W,
    measurement: String,
}

impl<W: PointWriter> IngestHandler<W> {
    pub fn new(writer: W, measurement: String) -> Self {
        Self {
            writer,
            measurement,
        }
    }
}

impl<W: PointWriter> MessageHandler for IngestHandler<W> {
    async fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), IngestError> {
        let reading = decode_reading(payload)?;
        let point = Point::from_reading(&self.measurement, &reading, Utc::now());
        self.writer.write(&point).await?;
        tracing::info!(
            topic,
            device_id=%reading.device_id,
            status=%reading.status,
            "{}",
            console::reading_status_line(&reading)
        );
        Ok(())
    }
}
