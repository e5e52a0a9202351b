//! Wire shapes for every record the UI edits. Field names are camelCase on
//! the wire; missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub gateway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_description: Option<String>,
    pub description: String,
    pub used_ips: u64,
    pub total_ips: u64,
    pub dhcp_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_end: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpStatus {
    #[default]
    Active,
    Reserved,
    Static,
    Dhcp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Router,
    Switch,
    Firewall,
    Server,
    Desktop,
    Laptop,
    Phone,
    Iot,
    Printer,
    Camera,
    Ap,
    Nas,
    Vm,
    Container,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Wired,
    Wireless,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpAddress {
    pub id: String,
    pub address: String,
    pub subnet_id: String,
    pub hostname: String,
    pub mac: String,
    pub status: IpStatus,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    /// Device this one hangs off (switch, router, AP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NatProtocol {
    #[default]
    Tcp,
    Udp,
    Icmp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatRule {
    pub id: String,
    pub internal_ip: String,
    pub external_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_port: Option<u16>,
    pub protocol: NatProtocol,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WifiSecurity {
    #[default]
    #[serde(rename = "WPA2-PSK")]
    Wpa2Psk,
    #[serde(rename = "WPA3-SAE")]
    Wpa3Sae,
    Enterprise,
    Open,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WifiBand {
    #[serde(rename = "2.4GHz")]
    Ghz2_4,
    #[serde(rename = "5GHz")]
    Ghz5,
    #[serde(rename = "6GHz")]
    Ghz6,
    #[default]
    Dual,
    Tri,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WifiNetwork {
    pub id: String,
    pub ssid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub security: WifiSecurity,
    pub band: WifiBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<String>,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// VLAN view derived from subnets that share a `vlanId`. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vlan {
    pub id: String,
    pub vlan_number: u32,
    pub name: String,
    pub description: String,
    pub subnets: Vec<String>,
}
