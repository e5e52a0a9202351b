//! Layered layout for the network diagram: core gateway, then subnets, then
//! devices hanging off their parent device or subnet.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::model::{ConnectionType, Dataset, DeviceType, IpAddress};

pub const CANVAS_WIDTH: f64 = 800.0;
pub const CANVAS_HEIGHT: f64 = 500.0;
pub const CORE_ID: &str = "CORE_ROUTER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Core,
    Subnet,
    Device,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub layer: usize,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyLink {
    pub source: String,
    pub target: String,
    pub connection_type: ConnectionType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    pub width: f64,
    pub height: f64,
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
}

/// Where a device attaches when its parent link is missing or cyclic.
fn fallback_parent(ip: &IpAddress, data: &Dataset) -> String {
    if data.subnets.iter().any(|s| s.id == ip.subnet_id) {
        ip.subnet_id.clone()
    } else {
        CORE_ID.to_string()
    }
}

/// Breadth-first depth of every node reachable from the core.
fn layers(order: &[String], parent: &HashMap<String, String>) -> HashMap<String, usize> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in order {
        if let Some(p) = parent.get(id) {
            children.entry(p.as_str()).or_default().push(id.as_str());
        }
    }

    let mut depth = HashMap::from([(CORE_ID.to_string(), 0)]);
    let mut queue = VecDeque::from([CORE_ID]);
    while let Some(node) = queue.pop_front() {
        let next = depth[node] + 1;
        for &child in children.get(node).into_iter().flatten() {
            if !depth.contains_key(child) {
                depth.insert(child.to_string(), next);
                queue.push_back(child);
            }
        }
    }
    depth
}

pub fn build_topology(data: &Dataset) -> Topology {
    let mut order: Vec<String> = vec![CORE_ID.to_string()];
    let mut parent: HashMap<String, String> = HashMap::new();

    for subnet in &data.subnets {
        order.push(subnet.id.clone());
        parent.insert(subnet.id.clone(), CORE_ID.to_string());
    }
    for ip in &data.ip_addresses {
        order.push(ip.id.clone());
        let target = ip
            .parent_device_id
            .as_deref()
            .filter(|p| *p != ip.id && data.ip_addresses.iter().any(|other| other.id == *p))
            .map(str::to_string)
            .unwrap_or_else(|| fallback_parent(ip, data));
        parent.insert(ip.id.clone(), target);
    }

    // Devices stuck in a parent cycle are unreachable from the core. Break
    // each cycle at its first member by re-homing it on its subnet.
    let depth = loop {
        let depth = layers(&order, &parent);
        match data.ip_addresses.iter().find(|ip| !depth.contains_key(&ip.id)) {
            Some(ip) => {
                let home = fallback_parent(ip, data);
                // Already re-homed and still unreachable (id clash): use the core.
                let home = if parent.get(&ip.id) == Some(&home) {
                    CORE_ID.to_string()
                } else {
                    home
                };
                parent.insert(ip.id.clone(), home);
            }
            None => break depth,
        }
    };

    let max_layer = depth.values().copied().max().unwrap_or(0);
    let mut per_layer: HashMap<usize, Vec<&str>> = HashMap::new();
    for id in &order {
        per_layer.entry(depth[id]).or_default().push(id.as_str());
    }
    let position = |id: &str| -> (f64, f64) {
        let layer = depth[id];
        let row = &per_layer[&layer];
        let index = row.iter().position(|n| *n == id).unwrap_or(0);
        let x = CANVAS_WIDTH * (index + 1) as f64 / (row.len() + 1) as f64;
        let y = CANVAS_HEIGHT * (layer + 1) as f64 / (max_layer + 2) as f64;
        (x, y)
    };

    let mut nodes = Vec::with_capacity(order.len());
    let (x, y) = position(CORE_ID);
    nodes.push(TopologyNode {
        id: CORE_ID.to_string(),
        label: "Core Gateway".to_string(),
        kind: NodeKind::Core,
        layer: 0,
        x,
        y,
        address: None,
        device_type: Some(DeviceType::Router),
        online: None,
    });
    for subnet in &data.subnets {
        let (x, y) = position(subnet.id.as_str());
        nodes.push(TopologyNode {
            id: subnet.id.clone(),
            label: subnet.name.clone(),
            kind: NodeKind::Subnet,
            layer: depth[&subnet.id],
            x,
            y,
            address: Some(subnet.cidr.clone()),
            device_type: None,
            online: None,
        });
    }
    for ip in &data.ip_addresses {
        let (x, y) = position(ip.id.as_str());
        nodes.push(TopologyNode {
            id: ip.id.clone(),
            label: if ip.hostname.is_empty() {
                ip.address.clone()
            } else {
                ip.hostname.clone()
            },
            kind: NodeKind::Device,
            layer: depth[&ip.id],
            x,
            y,
            address: Some(ip.address.clone()),
            device_type: ip.device_type,
            online: ip.is_online,
        });
    }

    let mut links: Vec<TopologyLink> = data
        .subnets
        .iter()
        .map(|s| TopologyLink {
            source: CORE_ID.to_string(),
            target: s.id.clone(),
            connection_type: ConnectionType::Wired,
        })
        .collect();
    links.extend(data.ip_addresses.iter().map(|ip| TopologyLink {
        source: parent[&ip.id].clone(),
        target: ip.id.clone(),
        connection_type: ip.connection_type.unwrap_or_default(),
    }));

    Topology {
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        nodes,
        links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_dataset;

    fn node<'a>(t: &'a Topology, id: &str) -> &'a TopologyNode {
        t.nodes.iter().find(|n| n.id == id).unwrap()
    }

    fn link_source<'a>(t: &'a Topology, target: &str) -> &'a str {
        &t.links.iter().find(|l| l.target == target).unwrap().source
    }

    #[test]
    fn test_layers_follow_parent_links() {
        let t = build_topology(&sample_dataset());
        assert_eq!(node(&t, CORE_ID).layer, 0);
        assert_eq!(node(&t, "lan").layer, 1);
        assert_eq!(node(&t, "gw").layer, 2);
        assert_eq!(node(&t, "nas").layer, 3);

        assert_eq!(link_source(&t, "lan"), CORE_ID);
        assert_eq!(link_source(&t, "gw"), "lan");
        assert_eq!(link_source(&t, "nas"), "gw");
        assert_eq!(t.links.len(), 3);
    }

    #[test]
    fn test_even_spacing_within_layer() {
        let mut data = sample_dataset();
        data.ip_addresses[1].parent_device_id = None;
        let t = build_topology(&data);

        // gw and nas share layer 2.
        assert_eq!(node(&t, "gw").x, 800.0 / 3.0);
        assert_eq!(node(&t, "nas").x, 1600.0 / 3.0);
        assert_eq!(node(&t, CORE_ID).x, 400.0);
        assert_eq!(node(&t, CORE_ID).y, 500.0 / 4.0);
        assert_eq!(node(&t, "gw").y, 500.0 * 3.0 / 4.0);
    }

    #[test]
    fn test_parent_cycle_is_broken() {
        let mut data = sample_dataset();
        data.ip_addresses[0].parent_device_id = Some("nas".into());
        let t = build_topology(&data);

        // gw is first in the cycle, so it goes back to its subnet.
        assert_eq!(link_source(&t, "gw"), "lan");
        assert_eq!(link_source(&t, "nas"), "gw");
        assert_eq!(node(&t, "nas").layer, 3);
    }

    #[test]
    fn test_unknown_parent_and_orphan_subnet() {
        let mut data = sample_dataset();
        data.ip_addresses[1].parent_device_id = Some("missing".into());
        data.ip_addresses[0].subnet_id = "gone".into();
        let t = build_topology(&data);

        assert_eq!(link_source(&t, "nas"), "lan");
        assert_eq!(link_source(&t, "gw"), CORE_ID);
        assert_eq!(node(&t, "gw").layer, 1);
    }

    #[test]
    fn test_connection_type_on_links() {
        let t = build_topology(&sample_dataset());
        let nas = t.links.iter().find(|l| l.target == "nas").unwrap();
        assert_eq!(nas.connection_type, ConnectionType::Wired);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["links"][2]["connectionType"], "wired");
        assert_eq!(json["width"], 800.0);
    }

    #[test]
    fn test_empty_dataset_has_only_core() {
        let t = build_topology(&Dataset::default());
        assert_eq!(t.nodes.len(), 1);
        assert!(t.links.is_empty());
        assert_eq!(node(&t, CORE_ID).y, 250.0);
    }
}
