use crate::device::{Device, DeviceRegistry};
use crate::reading::{fill_percentage, round2, Reading, Status};
use chrono::{DateTime, Local, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

/// Non-record line emitted after every full pass over the registry.
pub const CYCLE_MARKER: &str = "--- cycle complete ---";

const BASE_LEVEL: std::ops::RangeInclusive<u32> = 10..=80;
const PEAK_INCREMENT: std::ops::RangeInclusive<u32> = 10..=30;
const BASE_TEMPERATURE: std::ops::RangeInclusive<f64> = 18.0..=35.0;
const ORGANIC_HEATING: std::ops::RangeInclusive<f64> = 2.0..=8.0;
const ORGANIC_HEATING_FILL: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub device_delay: Duration,
    pub cycle_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            device_delay: Duration::from_secs(2),
            cycle_delay: Duration::from_secs(30),
        }
    }
}

/// Collection peaks: 08:00-10:59 and 17:00-19:59 local time.
pub fn is_peak_hour(hour: u32) -> bool {
    matches!(hour, 8..=10 | 17..=19)
}

pub struct ReadingGenerator<R = StdRng> {
    registry: DeviceRegistry,
    pacing: Pacing,
    rng: R,
}

impl ReadingGenerator<StdRng> {
    pub fn new(registry: DeviceRegistry, pacing: Pacing) -> Self {
        Self::with_rng(registry, pacing, StdRng::from_entropy())
    }
}

impl<R: Rng> ReadingGenerator<R> {
    pub fn with_rng(registry: DeviceRegistry, pacing: Pacing, rng: R) -> Self {
        Self {
            registry,
            pacing,
            rng,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn generate(&mut self, device: &Device, now: DateTime<Utc>, local_hour: u32) -> Reading {
        let mut base_level = self.rng.gen_range(BASE_LEVEL);
        if is_peak_hour(local_hour) {
            base_level += self.rng.gen_range(PEAK_INCREMENT);
        }
        let current_level = base_level.min(device.capacity);
        let fill = fill_percentage(current_level, device.capacity);

        let mut temperature = self.rng.gen_range(BASE_TEMPERATURE);
        if fill > ORGANIC_HEATING_FILL {
            temperature += self.rng.gen_range(ORGANIC_HEATING);
        }

        Reading {
            device_id: device.id.clone(),
            zone: device.zone.clone(),
            current_level,
            fill_percentage: fill,
            temperature: round2(temperature),
            capacity: device.capacity,
            latitude: device.latitude,
            longitude: device.longitude,
            timestamp: now,
            status: Status::from_fill_percentage(fill),
        }
    }

    pub fn next_reading(&mut self, device: &Device) -> Reading {
        let now = Local::now();
        self.generate(device, now.with_timezone(&Utc), now.hour())
    }

    /// Emits serialized readings into `sink` forever, device by device.
    /// Returns once the receiving side is gone.
    pub async fn run(mut self, sink: mpsc::Sender<String>) {
        let registry = self.registry.clone();
        loop {
            for device in registry.devices() {
                let reading = self.next_reading(device);
                match serde_json::to_string(&reading) {
                    Ok(line) => {
                        if sink.send(line).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error=%err, device_id=%device.id, "failed to serialize reading");
                    }
                }
                sleep(self.pacing.device_delay).await;
            }
            if sink.send(CYCLE_MARKER.to_string()).await.is_err() {
                return;
            }
            sleep(self.pacing.cycle_delay).await;
        }
    }
}
