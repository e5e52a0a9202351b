//! The documented network: subnets, addresses, NAT rules, WiFi networks and
//! applications, plus the record-level CRUD the HTTP layer builds on.

pub mod records;
pub mod vlan;

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use records::{
    Application, ConnectionType, DeviceType, IpAddress, IpStatus, NatProtocol, NatRule, Subnet,
    Vlan, WifiBand, WifiNetwork, WifiSecurity,
};
pub use vlan::derive_vlans;

/// Hosts assumed for a subnet whose CIDR cannot be parsed.
const DEFAULT_TOTAL_IPS: u64 = 254;
const MIN_WIFI_PASSWORD_LEN: usize = 8;

/// Everything the UI reads and writes in one piece.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dataset {
    pub subnets: Vec<Subnet>,
    pub ip_addresses: Vec<IpAddress>,
    pub nat_rules: Vec<NatRule>,
    pub wifi_networks: Vec<WifiNetwork>,
    pub applications: Vec<Application>,
}

/// `GET /api/data` shape: the stored dataset plus the derived VLAN list.
#[derive(Serialize)]
pub struct DatasetView<'a> {
    #[serde(flatten)]
    pub data: &'a Dataset,
    pub vlans: Vec<Vlan>,
}

impl Dataset {
    pub fn view(&self) -> DatasetView<'_> {
        DatasetView {
            data: self,
            vlans: derive_vlans(&self.subnets),
        }
    }

    pub fn insert<R: Record>(&mut self, mut record: R) -> Result<R, AppError> {
        if record.id().trim().is_empty() {
            record.set_id(new_id());
        }
        if R::collection(self).iter().any(|r| r.id() == record.id()) {
            return Err(AppError::Conflict(format!(
                "{} '{}' already exists",
                R::KIND,
                record.id()
            )));
        }
        record.validate(self)?;
        record.prepare();
        R::collection_mut(self).push(record.clone());
        R::reconcile(self);
        Ok(record)
    }

    pub fn update<R: Record>(&mut self, id: &str, mut record: R) -> Result<R, AppError> {
        record.set_id(id.to_string());
        let index = R::collection(self)
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| AppError::NotFound(format!("{} '{}' not found", R::KIND, id)))?;
        record.validate(self)?;
        record.prepare();
        R::collection_mut(self)[index] = record.clone();
        R::reconcile(self);
        Ok(record)
    }

    pub fn remove<R: Record>(&mut self, id: &str) -> Result<R, AppError> {
        let index = R::collection(self)
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| AppError::NotFound(format!("{} '{}' not found", R::KIND, id)))?;
        let removed = R::collection_mut(self).remove(index);
        R::reconcile(self);
        Ok(removed)
    }

    pub fn find<R: Record>(&self, id: &str) -> Option<&R> {
        R::collection(self).iter().find(|r| r.id() == id)
    }

    /// Recompute each subnet's `usedIps` from the addresses assigned to it.
    pub fn recount_usage(&mut self) {
        for subnet in &mut self.subnets {
            subnet.used_ips = self
                .ip_addresses
                .iter()
                .filter(|ip| ip.subnet_id == subnet.id)
                .count() as u64;
        }
    }

    /// Drop addresses whose subnet no longer exists.
    pub fn prune_orphans(&mut self) -> usize {
        let before = self.ip_addresses.len();
        let subnets = &self.subnets;
        self.ip_addresses
            .retain(|ip| subnets.iter().any(|s| s.id == ip.subnet_id));
        before - self.ip_addresses.len()
    }
}

/// A record kind stored in one of the dataset's collections.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + 'static {
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn collection(data: &Dataset) -> &Vec<Self>;
    fn collection_mut(data: &mut Dataset) -> &mut Vec<Self>;

    /// Form-level validation against the current dataset.
    fn validate(&self, data: &Dataset) -> Result<(), AppError>;

    /// Fill in derived fields before the record is stored.
    fn prepare(&mut self) {}

    /// Restore cross-collection invariants after the collection changed.
    fn reconcile(_data: &mut Dataset) {}
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn required(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

fn parse_address(field: &str, value: &str) -> Result<IpAddr, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("{} '{}' is not an IP address", field, value)))
}

/// Usable host addresses in a network (network and broadcast excluded for
/// IPv4 prefixes shorter than /31).
pub fn host_capacity(network: &IpNetwork) -> u64 {
    match network {
        IpNetwork::V4(v4) => {
            let host_bits = 32 - u32::from(v4.prefix());
            let size = 1u64 << host_bits;
            if v4.prefix() >= 31 { size } else { size - 2 }
        }
        IpNetwork::V6(v6) => {
            let host_bits = 128 - u32::from(v6.prefix());
            if host_bits >= 64 {
                u64::MAX
            } else {
                1u64 << host_bits
            }
        }
    }
}

impl Record for Subnet {
    const KIND: &'static str = "subnet";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn collection(data: &Dataset) -> &Vec<Self> {
        &data.subnets
    }

    fn collection_mut(data: &mut Dataset) -> &mut Vec<Self> {
        &mut data.subnets
    }

    fn validate(&self, _data: &Dataset) -> Result<(), AppError> {
        required("name", &self.name)?;
        required("cidr", &self.cidr)?;
        self.cidr
            .trim()
            .parse::<IpNetwork>()
            .map_err(|_| AppError::InvalidInput(format!("'{}' is not a valid CIDR", self.cidr)))?;
        if !self.gateway.trim().is_empty() {
            parse_address("gateway", &self.gateway)?;
        }
        if self.dhcp_enabled {
            for (field, value) in [("dhcpStart", &self.dhcp_start), ("dhcpEnd", &self.dhcp_end)] {
                if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                    parse_address(field, v)?;
                }
            }
        }
        Ok(())
    }

    fn prepare(&mut self) {
        self.cidr = self.cidr.trim().to_string();
        self.total_ips = self
            .cidr
            .parse::<IpNetwork>()
            .map(|net| host_capacity(&net))
            .unwrap_or(DEFAULT_TOTAL_IPS);
    }

    fn reconcile(data: &mut Dataset) {
        data.prune_orphans();
        data.recount_usage();
    }
}

impl Record for IpAddress {
    const KIND: &'static str = "ip address";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn collection(data: &Dataset) -> &Vec<Self> {
        &data.ip_addresses
    }

    fn collection_mut(data: &mut Dataset) -> &mut Vec<Self> {
        &mut data.ip_addresses
    }

    fn validate(&self, data: &Dataset) -> Result<(), AppError> {
        required("address", &self.address)?;
        required("hostname", &self.hostname)?;
        parse_address("address", &self.address)?;
        if !data.subnets.iter().any(|s| s.id == self.subnet_id) {
            return Err(AppError::Conflict(format!(
                "subnet '{}' does not exist",
                self.subnet_id
            )));
        }
        let duplicate = data.ip_addresses.iter().any(|ip| {
            ip.id != self.id
                && ip.subnet_id == self.subnet_id
                && ip.address.trim() == self.address.trim()
        });
        if duplicate {
            return Err(AppError::Conflict(format!(
                "{} is already recorded in this subnet",
                self.address
            )));
        }
        Ok(())
    }

    fn prepare(&mut self) {
        self.address = self.address.trim().to_string();
    }

    fn reconcile(data: &mut Dataset) {
        data.recount_usage();
    }
}

impl Record for NatRule {
    const KIND: &'static str = "NAT rule";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn collection(data: &Dataset) -> &Vec<Self> {
        &data.nat_rules
    }

    fn collection_mut(data: &mut Dataset) -> &mut Vec<Self> {
        &mut data.nat_rules
    }

    fn validate(&self, _data: &Dataset) -> Result<(), AppError> {
        required("internalIp", &self.internal_ip)?;
        required("externalIp", &self.external_ip)?;
        for (field, port) in [
            ("internalPort", self.internal_port),
            ("externalPort", self.external_port),
        ] {
            if port == Some(0) {
                return Err(AppError::InvalidInput(format!(
                    "{} must be between 1 and 65535",
                    field
                )));
            }
        }
        Ok(())
    }
}

impl Record for WifiNetwork {
    const KIND: &'static str = "WiFi network";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn collection(data: &Dataset) -> &Vec<Self> {
        &data.wifi_networks
    }

    fn collection_mut(data: &mut Dataset) -> &mut Vec<Self> {
        &mut data.wifi_networks
    }

    fn validate(&self, _data: &Dataset) -> Result<(), AppError> {
        required("ssid", &self.ssid)?;
        if self.security != WifiSecurity::Open {
            let len = self.password.as_deref().map_or(0, |p| p.chars().count());
            if len < MIN_WIFI_PASSWORD_LEN {
                return Err(AppError::InvalidInput(format!(
                    "password must be at least {} characters",
                    MIN_WIFI_PASSWORD_LEN
                )));
            }
        }
        Ok(())
    }
}

impl Record for Application {
    const KIND: &'static str = "application";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn collection(data: &Dataset) -> &Vec<Self> {
        &data.applications
    }

    fn collection_mut(data: &mut Dataset) -> &mut Vec<Self> {
        &mut data.applications
    }

    fn validate(&self, _data: &Dataset) -> Result<(), AppError> {
        required("name", &self.name)?;
        required("url", &self.url)
    }
}
