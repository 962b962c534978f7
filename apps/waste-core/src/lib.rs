//! Shared building blocks for the waste-container telemetry pipeline: the
//! device registry, the wire `Reading`, the synthetic generator and the
//! configuration/tracing plumbing used by every binary.

pub mod config;
pub mod console;
pub mod device;
pub mod generator;
pub mod logging;
pub mod reading;

pub use device::{Device, DeviceRegistry, RegistryError};
pub use generator::{Pacing, ReadingGenerator, CYCLE_MARKER};
pub use reading::{InvalidReading, Reading, Status};
