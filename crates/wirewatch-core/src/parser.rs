//! Topology document parsing
//!
//! A topology document is XML whose root element is the root cluster:
//!
//! ```xml
//! <cluster name="House" description="Whole house">
//!   <cluster name="Panel" description="Front panel">
//!     <device description="LED1" type="switch" channel="0" address="5F0000001234AB29"/>
//!     <device description="Push-Button 1" type="level-sensor" channel="0"/>
//!   </cluster>
//!   <cluster name="Lights" parent="Panel"/>
//!   <device description="Cellar humidity" type="humidity-sensor" cluster="Panel"/>
//! </cluster>
//! ```
//!
//! Nested elements belong to the enclosing cluster unless a `parent`
//! (clusters) or `cluster` (devices) attribute names another one.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::bus::{BusAddress, BusDirectory, DeviceHandle};
use crate::filter::DeviceFilter;
use crate::topology::{
    Cluster, ClusterChild, ClusterId, DeviceType, EntryId, TopologyError, TopologyModel,
    TypedDevice,
};

const ROOT_ELEMENT: &[u8] = b"cluster";

/// Deepest element nesting accepted in a topology document
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Deserialize)]
struct ClusterElement {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@description", default)]
    description: Option<String>,
    #[serde(rename = "@parent", default)]
    parent: Option<String>,
    #[serde(rename = "$value", default)]
    children: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct DeviceElement {
    #[serde(rename = "@description")]
    description: String,
    #[serde(rename = "@type")]
    device_type: String,
    #[serde(rename = "@channel", default)]
    channel: Option<String>,
    #[serde(rename = "@address", default)]
    address: Option<String>,
    #[serde(rename = "@cluster", default)]
    cluster: Option<String>,
}

#[derive(Debug, Deserialize)]
enum Element {
    #[serde(rename = "cluster")]
    Cluster(ClusterElement),
    #[serde(rename = "device")]
    Device(DeviceElement),
}

/// Document element flattened in document order
enum Flat {
    Cluster {
        name: String,
        description: String,
        parent_ref: Option<String>,
        enclosing: Option<ClusterId>,
    },
    Device {
        element: DeviceElement,
        enclosing: ClusterId,
    },
}

/// Device element whose owning cluster is resolved but whose attributes are
/// still raw text
struct PendingDevice {
    id: EntryId,
    element: DeviceElement,
    cluster: ClusterId,
}

/// Cluster tree with parents and children resolved
struct Layout {
    clusters: Vec<Cluster>,
    devices: Vec<PendingDevice>,
}

/// Parses topology documents, optionally checking device entries against a
/// live bus
#[derive(Clone, Default)]
pub struct TopologyParser {
    bus: Option<Arc<dyn BusDirectory>>,
}

impl std::fmt::Debug for TopologyParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyParser")
            .field("bus", &self.bus.is_some())
            .finish()
    }
}

impl TopologyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every device that declares an address against `bus`
    pub fn with_bus(bus: Arc<dyn BusDirectory>) -> Self {
        Self { bus: Some(bus) }
    }

    /// Parse a full document into a model
    pub fn parse(&self, xml: &str) -> Result<TopologyModel, TopologyError> {
        let layout = build_layout(xml)?;
        let resolver = self.resolver()?;
        let devices = layout
            .devices
            .into_iter()
            .map(|pending| resolve_device(pending, &layout.clusters, resolver.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            clusters = layout.clusters.len(),
            devices = devices.len(),
            "Parsed topology document"
        );
        Ok(TopologyModel::new(layout.clusters, devices))
    }

    /// Parse a document from disk
    pub fn parse_file(&self, path: &Path) -> Result<TopologyModel, TopologyError> {
        let content = std::fs::read_to_string(path)?;
        self.parse(&content)
    }

    /// Clusters in document order, without building the device index.
    ///
    /// Every call re-parses `xml`.
    pub fn clusters(&self, xml: &str) -> Result<Clusters, TopologyError> {
        let layout = build_layout(xml)?;
        Ok(Clusters {
            inner: layout.clusters.into_iter(),
        })
    }

    /// Devices across all clusters in document order.
    ///
    /// Structural errors are reported up front; per-device errors (unknown
    /// type, bad attribute, bus mismatch) are yielded as they are reached.
    pub fn devices(&self, xml: &str) -> Result<Devices, TopologyError> {
        let layout = build_layout(xml)?;
        let resolver = self.resolver()?;
        Ok(Devices {
            clusters: layout.clusters,
            pending: layout.devices.into_iter(),
            resolver,
        })
    }

    /// Devices for which `filter` matches, in document order
    pub fn devices_matching<F>(
        &self,
        xml: &str,
        filter: F,
    ) -> Result<impl Iterator<Item = Result<TypedDevice, TopologyError>>, TopologyError>
    where
        F: DeviceFilter,
    {
        let devices = self.devices(xml)?;
        Ok(devices.filter(move |result| match result {
            Ok(device) => filter.matches(device),
            Err(_) => true,
        }))
    }

    fn resolver(&self) -> Result<Option<BusResolver>, TopologyError> {
        self.bus.as_ref().map(BusResolver::new).transpose()
    }
}

/// Lazy cluster sequence returned by [`TopologyParser::clusters`]
pub struct Clusters {
    inner: std::vec::IntoIter<Cluster>,
}

impl Iterator for Clusters {
    type Item = Cluster;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Lazy device sequence returned by [`TopologyParser::devices`]
pub struct Devices {
    clusters: Vec<Cluster>,
    pending: std::vec::IntoIter<PendingDevice>,
    resolver: Option<BusResolver>,
}

impl Iterator for Devices {
    type Item = Result<TypedDevice, TopologyError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pending = self.pending.next()?;
        Some(resolve_device(pending, &self.clusters, self.resolver.as_ref()))
    }
}

/// Snapshot of the bus taken once per parse
struct BusResolver {
    bus: Arc<dyn BusDirectory>,
    present: HashMap<BusAddress, DeviceHandle>,
}

impl BusResolver {
    fn new(bus: &Arc<dyn BusDirectory>) -> Result<Self, TopologyError> {
        let present = bus
            .list_devices()?
            .into_iter()
            .map(|handle| (handle.address, handle))
            .collect::<HashMap<_, _>>();
        trace!(devices = present.len(), "Bus snapshot for topology resolution");
        Ok(Self {
            bus: Arc::clone(bus),
            present,
        })
    }

    fn check(&self, device: &TypedDevice, address: BusAddress) -> Result<(), TopologyError> {
        let handle = self
            .present
            .get(&address)
            .ok_or_else(|| TopologyError::UnresolvedDevice {
                device: device.description.clone(),
                address,
            })?;
        let capabilities = self.bus.device_capabilities(handle)?;
        if !capabilities.contains(device.device_type.capability()) {
            return Err(TopologyError::UnsupportedType {
                device: device.description.clone(),
                address,
                declared: device.device_type,
            });
        }
        Ok(())
    }
}

/// Scan the whole document before deserializing: exactly one root element,
/// a cluster, nested at most `MAX_DEPTH` elements deep, with only
/// whitespace, comments and processing instructions around it
fn check_root(xml: &str) -> Result<(), TopologyError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut root_closed = false;
    loop {
        let event = reader
            .read_event()
            .map_err(|e| TopologyError::Malformed(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) if depth == 0 => {
                if root_closed {
                    return Err(TopologyError::Malformed(format!(
                        "unexpected <{}> after the root element",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                if e.name().as_ref() != ROOT_ELEMENT {
                    return Err(TopologyError::Malformed(format!(
                        "root element must be <cluster>, found <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                if matches!(event, Event::Start(_)) {
                    depth = 1;
                } else {
                    root_closed = true;
                }
            }
            Event::Start(_) => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(TopologyError::Malformed(format!(
                        "nesting deeper than {} elements",
                        MAX_DEPTH
                    )));
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    return Err(TopologyError::Malformed(
                        "unmatched closing tag after the root element".to_string(),
                    ));
                }
                depth -= 1;
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Eof => {
                if depth > 0 {
                    return Err(TopologyError::Malformed(
                        "document ends inside the root element".to_string(),
                    ));
                }
                if !root_closed {
                    return Err(TopologyError::Malformed("document is empty".to_string()));
                }
                return Ok(());
            }
            // Content inside the root is left to the deserializer
            _ if depth > 0 => {}
            Event::Text(e) => {
                if !e.iter().all(u8::is_ascii_whitespace) {
                    return Err(TopologyError::Malformed(
                        "text outside the root element".to_string(),
                    ));
                }
            }
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
            _ => {
                return Err(TopologyError::Malformed(
                    "unexpected content outside the root element".to_string(),
                ));
            }
        }
    }
}

fn build_layout(xml: &str) -> Result<Layout, TopologyError> {
    check_root(xml)?;
    let root: ClusterElement =
        quick_xml::de::from_str(xml).map_err(|e| TopologyError::Malformed(e.to_string()))?;

    let mut flat = Vec::new();
    flatten(root, None, &mut 0, &mut flat);

    // Name index over every cluster, ids in document order
    let mut names: HashMap<String, ClusterId> = HashMap::new();
    let mut next_cluster = 0;
    for item in &flat {
        if let Flat::Cluster { name, .. } = item {
            if names.insert(name.clone(), ClusterId(next_cluster)).is_some() {
                return Err(TopologyError::DuplicateCluster(name.clone()));
            }
            next_cluster += 1;
        }
    }

    let lookup = |referrer: String, target: &str| {
        names
            .get(target)
            .copied()
            .ok_or_else(|| TopologyError::UnresolvedReference {
                referrer,
                target: target.to_string(),
            })
    };

    let mut clusters: Vec<Cluster> = Vec::with_capacity(next_cluster);
    let mut devices: Vec<PendingDevice> = Vec::new();
    // Document-ordered (parent, child) edges
    let mut edges: Vec<(ClusterId, ClusterChild)> = Vec::with_capacity(flat.len());

    for item in flat {
        match item {
            Flat::Cluster {
                name,
                description,
                parent_ref,
                enclosing,
            } => {
                let id = ClusterId(clusters.len());
                let parent = match (parent_ref, enclosing) {
                    (Some(target), None) => {
                        return Err(TopologyError::InvalidAttribute {
                            element: format!("root cluster {:?}", name),
                            attribute: "parent",
                            value: target,
                        });
                    }
                    (Some(target), Some(_)) => {
                        Some(lookup(format!("Cluster {:?}", name), &target)?)
                    }
                    (None, enclosing) => enclosing,
                };
                if let Some(parent) = parent {
                    edges.push((parent, ClusterChild::Cluster(id)));
                }
                clusters.push(Cluster {
                    id,
                    name,
                    description,
                    parent,
                    children: Vec::new(),
                });
            }
            Flat::Device { element, enclosing } => {
                let cluster = match &element.cluster {
                    Some(target) => lookup(format!("Device {:?}", element.description), target)?,
                    None => enclosing,
                };
                let id = EntryId(devices.len());
                edges.push((cluster, ClusterChild::Device(id)));
                devices.push(PendingDevice {
                    id,
                    element,
                    cluster,
                });
            }
        }
    }

    check_acyclic(&clusters)?;

    for (parent, child) in edges {
        clusters[parent.0].children.push(child);
    }

    Ok(Layout { clusters, devices })
}

fn flatten(
    element: ClusterElement,
    enclosing: Option<ClusterId>,
    next_id: &mut usize,
    out: &mut Vec<Flat>,
) {
    // Ids follow this pre-order walk, matching the name index
    let own_id = ClusterId(*next_id);
    *next_id += 1;
    out.push(Flat::Cluster {
        name: element.name,
        description: element.description.unwrap_or_default(),
        parent_ref: element.parent,
        enclosing,
    });
    for child in element.children {
        match child {
            Element::Cluster(cluster) => flatten(cluster, Some(own_id), next_id, out),
            Element::Device(device) => out.push(Flat::Device {
                element: device,
                enclosing: own_id,
            }),
        }
    }
}

/// Every cluster must reach the root by following parents
fn check_acyclic(clusters: &[Cluster]) -> Result<(), TopologyError> {
    for cluster in clusters {
        let mut current = cluster.parent;
        let mut steps = 0;
        while let Some(id) = current {
            steps += 1;
            if steps > clusters.len() {
                return Err(TopologyError::CyclicReference {
                    cluster: cluster.name.clone(),
                });
            }
            current = clusters[id.0].parent;
        }
    }
    Ok(())
}

fn resolve_device(
    pending: PendingDevice,
    clusters: &[Cluster],
    resolver: Option<&BusResolver>,
) -> Result<TypedDevice, TopologyError> {
    let PendingDevice {
        id,
        element,
        cluster,
    } = pending;
    let owner = &clusters[cluster.0].name;

    let device_type: DeviceType =
        element
            .device_type
            .parse()
            .map_err(|declared| TopologyError::UnknownDeviceType {
                device: element.description.clone(),
                declared,
            })?;

    let channel = element
        .channel
        .as_deref()
        .map(|raw| {
            raw.trim()
                .parse::<u8>()
                .map_err(|_| TopologyError::InvalidAttribute {
                    element: format!("device {:?} in cluster {:?}", element.description, owner),
                    attribute: "channel",
                    value: raw.to_string(),
                })
        })
        .transpose()?;

    let address = element
        .address
        .as_deref()
        .map(|raw| {
            raw.parse::<BusAddress>()
                .map_err(|_| TopologyError::InvalidAttribute {
                    element: format!("device {:?} in cluster {:?}", element.description, owner),
                    attribute: "address",
                    value: raw.to_string(),
                })
        })
        .transpose()?;

    let device = TypedDevice {
        id,
        description: element.description,
        device_type,
        channel,
        address,
        cluster,
    };

    if let (Some(resolver), Some(address)) = (resolver, device.address) {
        resolver.check(&device, address)?;
    }

    trace!(
        device = %device.description,
        device_type = %device.device_type,
        cluster = %owner,
        "Resolved device entry"
    );
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::StaticBus;
    use crate::filter::{HumidityFilter, LevelSensorFilter, SwitchFilter};
    use std::collections::HashSet;

    const PANEL: &str = r#"<?xml version='1.0'?>
<cluster name="House" description="Whole house">
    <cluster name="Panel" description="Panel">
        <device description="LED1" type="switch" channel="0" address="5F0000001234AB29"/>
        <device description="Push-Button 1" type="level-sensor" channel="0" address="5F0000001234AB29"/>
        <device description="LED2" type="switch" channel="1"/>
    </cluster>
    <cluster name="Cellar" description="Basement">
        <device description="Cellar humidity" type="humidity-sensor" address="2A00000000123426"/>
    </cluster>
    <cluster name="Lights" description="Extra lights" parent="Panel"/>
    <device description="Porch light" type="switch" cluster="Lights"/>
</cluster>"#;

    fn bus() -> Arc<dyn BusDirectory> {
        Arc::new(
            StaticBus::from_toml(
                r#"
[[device]]
address = "5F0000001234AB29"
description = "DS2406"
capabilities = ["switch", "level-sensor"]

[[device]]
address = "2A00000000123426"
description = "DS2438"
capabilities = ["humidity", "temperature"]
"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_panel_scenario() {
        let model = TopologyParser::new().parse(PANEL).unwrap();

        let led = model.find_by_description("LED1").unwrap();
        assert_eq!(led.device_type, DeviceType::Switch);
        assert_eq!(led.channel, Some(0));
        assert_eq!(model.cluster_of(led).description, "Panel");

        let button = model.find_by_description("Push-Button 1").unwrap();
        assert_eq!(button.device_type, DeviceType::LevelSensor);
        assert!(model.find_by_description("LED9").is_none());
        assert!(model.warnings().is_empty());
    }

    #[test]
    fn test_parent_and_cluster_references() {
        let model = TopologyParser::new().parse(PANEL).unwrap();

        let lights = model.find_cluster("Lights").unwrap();
        assert_eq!(model.parent_of(lights).unwrap().name, "Panel");
        assert_eq!(model.path_of(lights), "House/Panel/Lights");

        let panel = model.find_cluster("Panel").unwrap();
        let sub: Vec<_> = model.child_clusters(panel).map(|c| c.name.as_str()).collect();
        assert_eq!(sub, vec!["Lights"]);

        let root_children: Vec<_> = model
            .child_clusters(model.root())
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(root_children, vec!["Panel", "Cellar"]);

        let porch = model.find_by_description("Porch light").unwrap();
        assert_eq!(model.cluster_of(porch).name, "Lights");

        let in_panel: Vec<_> = model
            .devices_in(panel)
            .map(|d| d.description.as_str())
            .collect();
        assert_eq!(in_panel, vec!["LED1", "Push-Button 1", "LED2", "Porch light"]);
    }

    #[test]
    fn test_forward_parent_reference() {
        let xml = r#"<cluster name="Root">
    <cluster name="Early" parent="Late"/>
    <cluster name="Late"/>
</cluster>"#;
        let model = TopologyParser::new().parse(xml).unwrap();
        let early = model.find_cluster("Early").unwrap();
        assert_eq!(model.parent_of(early).unwrap().name, "Late");
    }

    #[test]
    fn test_streamed_devices_match_tree() {
        let parser = TopologyParser::new();
        let model = parser.parse(PANEL).unwrap();
        let streamed: Vec<TypedDevice> = parser
            .devices(PANEL)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(streamed.as_slice(), model.devices());

        let from_tree: HashSet<EntryId> = model.devices_in(model.root()).map(|d| d.id).collect();
        let from_stream: HashSet<EntryId> = streamed.iter().map(|d| d.id).collect();
        assert_eq!(from_tree, from_stream);
        assert_eq!(from_tree.len(), streamed.len());

        let ids: Vec<usize> = streamed.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, (0..streamed.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_filtered_devices_equal_filtered_stream() {
        let parser = TopologyParser::new();

        fn check<F: DeviceFilter + Copy>(parser: &TopologyParser, filter: F) {
            let filtered: Vec<TypedDevice> = parser
                .devices_matching(PANEL, filter)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            let manual: Vec<TypedDevice> = parser
                .devices(PANEL)
                .unwrap()
                .map(Result::unwrap)
                .filter(|d| filter.matches(d))
                .collect();
            assert_eq!(filtered, manual);
        }

        check(&parser, SwitchFilter);
        check(&parser, LevelSensorFilter);
        check(&parser, HumidityFilter);

        let switches: Vec<String> = parser
            .devices_matching(PANEL, SwitchFilter)
            .unwrap()
            .map(|d| d.unwrap().description)
            .collect();
        assert_eq!(switches, vec!["LED1", "LED2", "Porch light"]);
    }

    #[test]
    fn test_clusters_idempotent() {
        let parser = TopologyParser::new();
        let first: Vec<Cluster> = parser.clusters(PANEL).unwrap().collect();
        let second: Vec<Cluster> = parser.clusters(PANEL).unwrap().collect();
        assert_eq!(first, second);

        let names: Vec<_> = first.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["House", "Panel", "Cellar", "Lights"]);
        assert_eq!(first, parser.parse(PANEL).unwrap().clusters());
    }

    #[test]
    fn test_unknown_type_fails_parse() {
        let xml = r#"<cluster name="Root">
    <device description="Good" type="switch"/>
    <device description="Thermostat" type="thermostat"/>
</cluster>"#;
        let err = TopologyParser::new().parse(xml).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::UnknownDeviceType { ref device, ref declared }
                if device == "Thermostat" && declared == "thermostat"
        ));

        // The stream yields the good entry before reporting the bad one
        let mut devices = TopologyParser::new().devices(xml).unwrap();
        assert!(devices.next().unwrap().is_ok());
        assert!(devices.next().unwrap().is_err());
    }

    #[test]
    fn test_malformed_documents() {
        let parser = TopologyParser::new();
        assert!(matches!(
            parser.parse("<cluster name=\"Root\"><device"),
            Err(TopologyError::Malformed(_))
        ));
        assert!(matches!(
            parser.parse("<topology name=\"Root\"/>"),
            Err(TopologyError::Malformed(_))
        ));
        assert!(matches!(parser.parse(""), Err(TopologyError::Malformed(_))));
        assert!(matches!(
            parser.parse("<cluster name=\"Root\"><sensor name=\"x\"/></cluster>"),
            Err(TopologyError::Malformed(_))
        ));
    }

    #[test]
    fn test_content_after_root_rejected() {
        let parser = TopologyParser::new();
        let rejected = [
            r#"<cluster name="A"><device description="x" type="switch"/></cluster><cluster name="B"><device description="y" type="switch"/></cluster>"#,
            r#"<cluster name="A"/><device description="x" type="thermostat"/>"#,
            "<cluster name=\"A\"/>junk",
            "<cluster name=\"A\"></cluster></cluster>",
        ];
        for xml in rejected {
            assert!(
                matches!(parser.parse(xml), Err(TopologyError::Malformed(_))),
                "accepted {}",
                xml
            );
            assert!(matches!(parser.clusters(xml), Err(TopologyError::Malformed(_))));
        }

        let surrounded = "<?xml version=\"1.0\"?>\n<!-- panel -->\n<cluster name=\"A\"/>\n<!-- end -->\n";
        assert_eq!(parser.parse(surrounded).unwrap().clusters().len(), 1);
    }

    #[test]
    fn test_nesting_depth_limit() {
        let nested = |n: usize| {
            let mut xml = String::new();
            for i in 0..n {
                xml.push_str(&format!("<cluster name=\"c{}\">", i));
            }
            xml.push_str(&"</cluster>".repeat(n));
            xml
        };
        let parser = TopologyParser::new();

        assert_eq!(parser.parse(&nested(MAX_DEPTH)).unwrap().clusters().len(), MAX_DEPTH);
        match parser.parse(&nested(400)) {
            Err(TopologyError::Malformed(message)) => assert!(message.contains("nesting")),
            other => panic!("expected nesting error, got {:?}", other.map(|m| m.clusters().len())),
        }
    }

    #[test]
    fn test_reference_errors() {
        let parser = TopologyParser::new();

        let missing_parent = r#"<cluster name="Root"><cluster name="A" parent="Nowhere"/></cluster>"#;
        assert!(matches!(
            parser.parse(missing_parent),
            Err(TopologyError::UnresolvedReference { ref target, .. }) if target == "Nowhere"
        ));

        let missing_cluster =
            r#"<cluster name="Root"><device description="X" type="switch" cluster="Ghost"/></cluster>"#;
        assert!(matches!(
            parser.parse(missing_cluster),
            Err(TopologyError::UnresolvedReference { ref target, .. }) if target == "Ghost"
        ));

        let cycle = r#"<cluster name="Root">
    <cluster name="A" parent="B"/>
    <cluster name="B" parent="A"/>
</cluster>"#;
        assert!(matches!(
            parser.parse(cycle),
            Err(TopologyError::CyclicReference { .. })
        ));

        let duplicate = r#"<cluster name="Root"><cluster name="A"/><cluster name="A"/></cluster>"#;
        assert!(matches!(
            parser.parse(duplicate),
            Err(TopologyError::DuplicateCluster(ref n)) if n == "A"
        ));

        let root_parent = r#"<cluster name="Root" parent="Root"/>"#;
        assert!(matches!(
            parser.parse(root_parent),
            Err(TopologyError::InvalidAttribute { attribute: "parent", .. })
        ));
    }

    #[test]
    fn test_invalid_attributes() {
        let parser = TopologyParser::new();
        let channel = r#"<cluster name="Root"><device description="X" type="switch" channel="300"/></cluster>"#;
        assert!(matches!(
            parser.parse(channel),
            Err(TopologyError::InvalidAttribute { attribute: "channel", .. })
        ));

        let address = r#"<cluster name="Root"><device description="X" type="switch" address="12"/></cluster>"#;
        assert!(matches!(
            parser.parse(address),
            Err(TopologyError::InvalidAttribute { attribute: "address", .. })
        ));
    }

    #[test]
    fn test_duplicate_description_warning() {
        let xml = r#"<cluster name="Root">
    <cluster name="A"><device description="LED1" type="switch" channel="0"/></cluster>
    <cluster name="B"><device description="LED1" type="level-sensor"/></cluster>
</cluster>"#;
        let model = TopologyParser::new().parse(xml).unwrap();
        let led = model.find_by_description("LED1").unwrap();
        assert_eq!(model.cluster_of(led).name, "A");
        assert_eq!(model.warnings().len(), 1);
    }

    #[test]
    fn test_bus_resolution() {
        let parser = TopologyParser::with_bus(bus());
        let model = parser.parse(PANEL).unwrap();
        assert_eq!(model.devices().len(), 5);

        let absent = r#"<cluster name="Root">
    <device description="Ghost" type="switch" address="0100000000000099"/>
</cluster>"#;
        assert!(matches!(
            parser.parse(absent),
            Err(TopologyError::UnresolvedDevice { ref device, .. }) if device == "Ghost"
        ));

        let wrong_type = r#"<cluster name="Root">
    <device description="Not a switch" type="switch" address="2A00000000123426"/>
</cluster>"#;
        assert!(matches!(
            parser.parse(wrong_type),
            Err(TopologyError::UnsupportedType { declared: DeviceType::Switch, .. })
        ));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.xml");
        std::fs::write(&path, PANEL).unwrap();

        let model = TopologyParser::new().parse_file(&path).unwrap();
        assert_eq!(model.clusters().len(), 4);

        let missing = TopologyParser::new().parse_file(&dir.path().join("missing.xml"));
        assert!(matches!(missing, Err(TopologyError::Io(_))));
    }
}
