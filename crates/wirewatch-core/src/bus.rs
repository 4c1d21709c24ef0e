//! Bus directory interface and device handles
//!
//! The bus adapter itself (locking, enumeration, speed negotiation) lives
//! outside this workspace. Everything here talks to it through
//! [`BusDirectory`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Error reported by a bus adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusAccessError {
    #[error("Bus adapter unavailable: {0}")]
    Unavailable(String),
    #[error("Bus I/O failed: {0}")]
    Io(String),
    #[error("Invalid bus fixture: {0}")]
    Fixture(String),
}

/// Error parsing a textual device address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid device address {0:?}: expected 16 hex digits")]
pub struct AddressParseError(pub String);

/// 64-bit 1-Wire ROM identifier
///
/// Stored in bus order: byte 0 is the family code, byte 7 the CRC. The
/// textual form is printed CRC first, which is how adapter tooling shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusAddress(pub [u8; 8]);

impl BusAddress {
    /// Create an address from raw bytes in bus order
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Device family code
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode_upper(reversed))
    }
}

impl FromStr for BusAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 16 {
            return Err(AddressParseError(s.to_string()));
        }
        let decoded = hex::decode(trimmed).map_err(|_| AddressParseError(s.to_string()))?;
        let mut bytes: [u8; 8] = decoded
            .try_into()
            .map_err(|_| AddressParseError(s.to_string()))?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for BusAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BusAddress> for String {
    fn from(address: BusAddress) -> Self {
        address.to_string()
    }
}

/// A device enumerated on the bus
///
/// Handles are immutable once enumerated and compare by address only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub address: BusAddress,
    /// Capability tags, e.g. "switch", "level-sensor", "humidity"
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
}

impl DeviceHandle {
    pub fn new<I, S>(address: BusAddress, description: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            address,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceHandle {}

/// Narrow view of the bus adapter used by the topology parser and the
/// presence monitor.
///
/// Implementations are blocking and own their exclusive-access discipline.
pub trait BusDirectory: Send + Sync {
    /// Enumerate the devices currently present on the bus
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, BusAccessError>;

    /// Capability tags supported by a device
    fn device_capabilities(
        &self,
        handle: &DeviceHandle,
    ) -> Result<BTreeSet<String>, BusAccessError> {
        Ok(handle.capabilities.clone())
    }
}

impl<B: BusDirectory + ?Sized> BusDirectory for std::sync::Arc<B> {
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, BusAccessError> {
        (**self).list_devices()
    }

    fn device_capabilities(
        &self,
        handle: &DeviceHandle,
    ) -> Result<BTreeSet<String>, BusAccessError> {
        (**self).device_capabilities(handle)
    }
}

/// TOML layout of a bus fixture file
#[derive(Debug, Default, Deserialize)]
struct BusFixture {
    #[serde(default)]
    device: Vec<DeviceHandle>,
}

/// In-memory bus over a fixed device list
#[derive(Debug, Clone, Default)]
pub struct StaticBus {
    devices: Vec<DeviceHandle>,
}

impl StaticBus {
    pub fn new(devices: Vec<DeviceHandle>) -> Self {
        Self { devices }
    }

    /// Parse a fixture of `[[device]]` tables
    pub fn from_toml(content: &str) -> Result<Self, BusAccessError> {
        let fixture: BusFixture =
            toml::from_str(content).map_err(|e| BusAccessError::Fixture(e.to_string()))?;
        Ok(Self::new(fixture.device))
    }

    /// Load a fixture from disk
    pub fn from_file(path: &Path) -> Result<Self, BusAccessError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BusAccessError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }
}

impl BusDirectory for StaticBus {
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, BusAccessError> {
        Ok(self.devices.clone())
    }
}
