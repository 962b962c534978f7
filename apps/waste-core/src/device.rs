use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Static descriptor of a monitored container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub zone: String,
    pub capacity: u32,
    pub latitude: f64,
    pub longitude: f64,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        zone: impl Into<String>,
        capacity: u32,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            id: id.into(),
            zone: zone.into(),
            capacity,
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("device registry is empty")]
    Empty,
    #[error("duplicate device id {0:?}")]
    DuplicateId(String),
    #[error("device {0:?} has an empty id or zone")]
    BlankField(String),
    #[error("device {0:?} has zero capacity")]
    ZeroCapacity(String),
}

/// Read-only, cheaply cloneable list of devices shared by every generator run.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Arc<[Device]>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Result<Self, RegistryError> {
        if devices.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::with_capacity(devices.len());
        for device in &devices {
            if device.id.trim().is_empty() || device.zone.trim().is_empty() {
                return Err(RegistryError::BlankField(device.id.clone()));
            }
            if device.capacity == 0 {
                return Err(RegistryError::ZeroCapacity(device.id.clone()));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(RegistryError::DuplicateId(device.id.clone()));
            }
        }
        Ok(Self {
            devices: devices.into(),
        })
    }

    /// The three-container scenario used when no registry is configured.
    pub fn reference() -> Self {
        Self {
            devices: vec![
                Device::new("cont-001", "zone_center", 100, 32.5149, -117.0382),
                Device::new("cont-002", "zone_north", 120, 32.5249, -117.0282),
                Device::new("cont-003", "zone_south", 80, 32.5049, -117.0482),
            ]
            .into(),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id == id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
