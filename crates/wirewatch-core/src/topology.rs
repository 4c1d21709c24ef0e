//! Cluster tree and typed device index built from a topology document

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::bus::{BusAccessError, BusAddress};
use crate::filter::DeviceFilter;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Malformed topology document: {0}")]
    Malformed(String),
    #[error("Device {device:?} declares unknown type {declared:?}")]
    UnknownDeviceType { device: String, declared: String },
    #[error("{referrer} references unknown cluster {target:?}")]
    UnresolvedReference { referrer: String, target: String },
    #[error("Cluster {cluster:?} is part of a parent reference cycle")]
    CyclicReference { cluster: String },
    #[error("Cluster name {0:?} is declared more than once")]
    DuplicateCluster(String),
    #[error("Invalid {attribute} {value:?} on {element}")]
    InvalidAttribute {
        element: String,
        attribute: &'static str,
        value: String,
    },
    #[error("Device {device:?} at {address} is not present on the bus")]
    UnresolvedDevice { device: String, address: BusAddress },
    #[error("Device {device:?} at {address} does not support type {declared}")]
    UnsupportedType {
        device: String,
        address: BusAddress,
        declared: DeviceType,
    },
    #[error("Bus query failed: {0}")]
    Bus(#[from] BusAccessError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No device with description {0:?}")]
    RoleNotFound(String),
}

/// Non-fatal problems found while building a model
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TopologyWarning {
    #[error("Description {description:?} is used by devices {first} and {duplicate}; lookups use {first}")]
    DuplicateDescription {
        description: String,
        first: EntryId,
        duplicate: EntryId,
    },
}

/// Declared role of a device entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    Switch,
    LevelSensor,
    HumiditySensor,
    TemperatureSensor,
    ContactSensor,
    EventSensor,
    A2dSensor,
    D2aActuator,
}

impl DeviceType {
    pub const ALL: [DeviceType; 8] = [
        DeviceType::Switch,
        DeviceType::LevelSensor,
        DeviceType::HumiditySensor,
        DeviceType::TemperatureSensor,
        DeviceType::ContactSensor,
        DeviceType::EventSensor,
        DeviceType::A2dSensor,
        DeviceType::D2aActuator,
    ];

    /// Type name as written in topology documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::LevelSensor => "level-sensor",
            Self::HumiditySensor => "humidity-sensor",
            Self::TemperatureSensor => "temperature-sensor",
            Self::ContactSensor => "contact-sensor",
            Self::EventSensor => "event-sensor",
            Self::A2dSensor => "a2d-sensor",
            Self::D2aActuator => "d2a-actuator",
        }
    }

    /// Capability tag a bus device must report to back this type
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::LevelSensor => "level-sensor",
            Self::HumiditySensor => "humidity",
            Self::TemperatureSensor => "temperature",
            Self::ContactSensor => "contact",
            Self::EventSensor => "event",
            Self::A2dSensor => "a2d",
            Self::D2aActuator => "d2a",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| s.to_string())
    }
}

/// Index of a cluster within its model, in document order (root is 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClusterId(pub usize);

/// Index of a device entry within its model, in document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(pub usize);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterChild {
    Cluster(ClusterId),
    Device(EntryId),
}

/// Named grouping node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub description: String,
    /// Container cluster; `None` only for the root
    pub parent: Option<ClusterId>,
    /// Child devices and clusters in document order
    pub children: Vec<ClusterChild>,
}

impl Cluster {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Logical device entry bound to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypedDevice {
    pub id: EntryId,
    pub description: String,
    pub device_type: DeviceType,
    /// Channel or sub-address on multi-channel parts
    pub channel: Option<u8>,
    /// Bus address the entry resolves to, when declared
    pub address: Option<BusAddress>,
    /// Owning cluster
    pub cluster: ClusterId,
}

/// Immutable topology: the cluster tree plus device indexes
#[derive(Debug, Clone, Serialize)]
pub struct TopologyModel {
    clusters: Vec<Cluster>,
    devices: Vec<TypedDevice>,
    #[serde(skip)]
    by_description: HashMap<String, EntryId>,
    #[serde(skip)]
    by_type: HashMap<DeviceType, Vec<EntryId>>,
    warnings: Vec<TopologyWarning>,
}

impl TopologyModel {
    /// Build the indexes over an already-resolved tree.
    ///
    /// `clusters` must hold the root at index 0 and `devices` must be in
    /// document order with ids equal to their positions.
    pub(crate) fn new(clusters: Vec<Cluster>, devices: Vec<TypedDevice>) -> Self {
        let mut by_description: HashMap<String, EntryId> = HashMap::new();
        let mut by_type: HashMap<DeviceType, Vec<EntryId>> = HashMap::new();
        let mut warnings = Vec::new();

        for device in &devices {
            by_type.entry(device.device_type).or_default().push(device.id);

            if let Some(&first) = by_description.get(&device.description) {
                warn!(
                    description = %device.description,
                    first = %first,
                    duplicate = %device.id,
                    "Duplicate device description, keeping first in document order"
                );
                warnings.push(TopologyWarning::DuplicateDescription {
                    description: device.description.clone(),
                    first,
                    duplicate: device.id,
                });
            } else {
                by_description.insert(device.description.clone(), device.id);
            }
        }

        Self {
            clusters,
            devices,
            by_description,
            by_type,
            warnings,
        }
    }

    /// The document's top-level cluster
    pub fn root(&self) -> &Cluster {
        &self.clusters[0]
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id.0)
    }

    pub fn device(&self, id: EntryId) -> Option<&TypedDevice> {
        self.devices.get(id.0)
    }

    /// All clusters in document order
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// All devices in document order
    pub fn devices(&self) -> &[TypedDevice] {
        &self.devices
    }

    pub fn warnings(&self) -> &[TopologyWarning] {
        &self.warnings
    }

    pub fn find_cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Look up a device by exact description; duplicates resolve to the
    /// first in document order
    pub fn find_by_description(&self, text: &str) -> Option<&TypedDevice> {
        self.by_description
            .get(text)
            .and_then(|id| self.devices.get(id.0))
    }

    /// Devices declared with the given type, in document order
    pub fn devices_of_type(&self, device_type: DeviceType) -> impl Iterator<Item = &TypedDevice> {
        self.by_type
            .get(&device_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.devices.get(id.0))
    }

    /// Devices accepted by a filter, in document order
    pub fn devices_matching<'a, F>(&'a self, filter: &'a F) -> impl Iterator<Item = &'a TypedDevice>
    where
        F: DeviceFilter + ?Sized,
    {
        self.devices.iter().filter(move |d| filter.matches(d))
    }

    pub fn cluster_of(&self, device: &TypedDevice) -> &Cluster {
        &self.clusters[device.cluster.0]
    }

    pub fn parent_of(&self, cluster: &Cluster) -> Option<&Cluster> {
        cluster.parent.and_then(|id| self.clusters.get(id.0))
    }

    /// Direct sub-clusters in document order
    pub fn child_clusters<'a>(&'a self, cluster: &'a Cluster) -> impl Iterator<Item = &'a Cluster> {
        cluster.children.iter().filter_map(|child| match child {
            ClusterChild::Cluster(id) => self.clusters.get(id.0),
            ClusterChild::Device(_) => None,
        })
    }

    /// Every device in the subtree rooted at `cluster`, depth first
    pub fn devices_in<'a>(&'a self, cluster: &'a Cluster) -> SubtreeDevices<'a> {
        SubtreeDevices {
            model: self,
            stack: vec![cluster.children.iter()],
        }
    }

    /// Cluster names from the root down, joined with '/'
    pub fn path_of(&self, cluster: &Cluster) -> String {
        let mut names = vec![cluster.name.as_str()];
        let mut current = cluster;
        while let Some(parent) = self.parent_of(current) {
            names.push(parent.name.as_str());
            current = parent;
        }
        names.reverse();
        names.join("/")
    }

    /// Bind logical role names to devices by exact description
    pub fn bind_roles<'a, S: AsRef<str>>(
        &'a self,
        roles: &[S],
    ) -> Result<Vec<&'a TypedDevice>, TopologyError> {
        roles
            .iter()
            .map(|role| {
                let role = role.as_ref();
                self.find_by_description(role)
                    .ok_or_else(|| TopologyError::RoleNotFound(role.to_string()))
            })
            .collect()
    }
}

/// Depth-first walk over the devices below a cluster
pub struct SubtreeDevices<'a> {
    model: &'a TopologyModel,
    stack: Vec<std::slice::Iter<'a, ClusterChild>>,
}

impl<'a> Iterator for SubtreeDevices<'a> {
    type Item = &'a TypedDevice;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(ClusterChild::Device(id)) => {
                    if let Some(device) = self.model.devices.get(id.0) {
                        return Some(device);
                    }
                }
                Some(ClusterChild::Cluster(id)) => {
                    if let Some(cluster) = self.model.clusters.get(id.0) {
                        self.stack.push(cluster.children.iter());
                    }
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}
