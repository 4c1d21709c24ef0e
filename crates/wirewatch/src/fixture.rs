//! File-backed bus used in place of a physical adapter

use std::path::PathBuf;
use tracing::trace;
use wirewatch_core::{BusAccessError, BusDirectory, DeviceHandle, StaticBus};

/// Reads a TOML device list on every enumeration, so editing the file
/// simulates devices being plugged in or pulled. A missing file reads as a
/// bus fault.
#[derive(Debug, Clone)]
pub struct FileBus {
    path: PathBuf,
}

impl FileBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BusDirectory for FileBus {
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, BusAccessError> {
        let bus = StaticBus::from_file(&self.path)?;
        trace!(path = %self.path.display(), devices = bus.devices().len(), "Read bus fixture");
        Ok(bus.devices().to_vec())
    }
}
