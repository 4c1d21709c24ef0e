//! Wirewatch Core - Bus directory interface, topology model, and topology parsing
//!
//! This crate provides the synchronous half of Wirewatch:
//! - The narrow [`BusDirectory`] view of an external 1-Wire adapter
//! - The immutable cluster/device [`TopologyModel`]
//! - XML topology parsing with full, cluster-only, and filtered device views
//! - Capability filters for binding logical roles to devices

pub mod bus;
pub mod filter;
pub mod parser;
pub mod topology;

pub use bus::{AddressParseError, BusAccessError, BusAddress, BusDirectory, DeviceHandle, StaticBus};
pub use filter::{DeviceFilter, HumidityFilter, LevelSensorFilter, SwitchFilter, TypeFilter};
pub use parser::{Clusters, Devices, TopologyParser};
pub use topology::{
    Cluster, ClusterChild, ClusterId, DeviceType, EntryId, TopologyError, TopologyModel,
    TopologyWarning, TypedDevice,
};
