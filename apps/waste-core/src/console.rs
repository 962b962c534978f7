use crate::reading::{Reading, Status};

/// Human-readable one-liner for operators watching the logs.
pub fn status_line(device_id: &str, fill_percentage: f64, temperature: f64) -> String {
    let status = Status::from_fill_percentage(fill_percentage);
    format!(
        "{} {device_id}: {fill_percentage}% full - {temperature}°C",
        status.indicator()
    )
}

pub fn reading_status_line(reading: &Reading) -> String {
    status_line(&reading.device_id, reading.fill_percentage, reading.temperature)
}
