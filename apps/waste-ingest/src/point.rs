use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use waste_core::Reading;

pub const DEFAULT_MEASUREMENT: &str = "waste_containers";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

/// One time-series point in InfluxDB terms. Tags are kept sorted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp_ns: i64,
}

impl Point {
    /// The point is stamped with `ingested_at`, not the reading's own
    /// generation time.
    pub fn from_reading(measurement: &str, reading: &Reading, ingested_at: DateTime<Utc>) -> Self {
        let timestamp_ns = ingested_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| ingested_at.timestamp_micros().saturating_mul(1_000));
        Self {
            measurement: measurement.to_string(),
            tags: vec![
                ("device_id", reading.device_id.clone()),
                ("status", reading.status.as_str().to_string()),
                ("zone", reading.zone.clone()),
            ],
            fields: vec![
                ("current_level", FieldValue::Integer(i64::from(reading.current_level))),
                ("fill_percentage", FieldValue::Float(reading.fill_percentage)),
                ("temperature", FieldValue::Float(reading.temperature)),
                ("capacity", FieldValue::Integer(i64::from(reading.capacity))),
                ("latitude", FieldValue::Float(reading.latitude)),
                ("longitude", FieldValue::Float(reading.longitude)),
            ],
            timestamp_ns,
        }
    }

    #[cfg(test)]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(line, ",{}={}", key, escape(value, &[',', '=', ' ']));
        }
        for (idx, (key, value)) in self.fields.iter().enumerate() {
            line.push(if idx == 0 { ' ' } else { ',' });
            let _ = match value {
                FieldValue::Integer(v) => write!(line, "{key}={v}i"),
                FieldValue::Float(v) => write!(line, "{key}={v}"),
            };
        }
        let _ = write!(line, " {}", self.timestamp_ns);
        line
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '\\' || special.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
