//! Reachability state for every documented address.

pub mod poller;

use std::collections::VecDeque;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::IpAddress;
use crate::notify::{AlertPayload, NotificationSettings};
use crate::scanner::Reachability;

/// Samples kept per device for the latency chart and uptime.
pub const HISTORY_LEN: usize = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
    Warning,
}

impl DeviceStatus {
    fn is_up(self) -> bool {
        self != DeviceStatus::Offline
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySample {
    /// `HH:MM`, UTC.
    pub time: String,
    pub latency: f64,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredDevice {
    /// Same id as the IP address record.
    pub id: String,
    pub ip_address: String,
    pub hostname: String,
    pub status: DeviceStatus,
    pub latency: f64,
    pub last_seen: Option<String>,
    pub uptime_percent: f64,
    pub check_interval: u64,
    pub enabled: bool,
    pub latency_history: VecDeque<LatencySample>,
}

impl MonitoredDevice {
    fn from_record(ip: &IpAddress, check_interval: u64) -> Self {
        let online = ip.is_online == Some(true);
        Self {
            id: ip.id.clone(),
            ip_address: ip.address.clone(),
            hostname: display_name(ip),
            status: if online {
                DeviceStatus::Online
            } else {
                DeviceStatus::Offline
            },
            latency: 0.0,
            last_seen: if online { ip.last_checked.clone() } else { None },
            uptime_percent: 100.0,
            check_interval,
            enabled: ip.monitor_enabled.unwrap_or(true),
            latency_history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    fn record_sample(&mut self, sample: LatencySample) {
        if self.latency_history.len() == HISTORY_LEN {
            self.latency_history.pop_front();
        }
        self.latency_history.push_back(sample);

        let up = self.latency_history.iter().filter(|s| s.online).count();
        self.uptime_percent = round1(up as f64 * 100.0 / self.latency_history.len() as f64);
    }
}

fn display_name(ip: &IpAddress) -> String {
    if ip.hostname.trim().is_empty() {
        "Unknown".to_string()
    } else {
        ip.hostname.clone()
    }
}

/// Compare parsed addresses so `2001:DB8:0:0::1` matches fping's
/// `2001:db8::1`.
fn same_address(reported: &str, stored: &str) -> bool {
    match (reported.trim().parse::<IpAddr>(), stored.trim().parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => reported.trim() == stored.trim(),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStats {
    pub total_devices: usize,
    pub online_devices: usize,
    pub offline_devices: usize,
    pub warning_devices: usize,
    /// Whole milliseconds across reachable devices.
    pub average_latency: f64,
    pub average_uptime: f64,
    pub alerts_sent: u64,
    pub last_check: Option<String>,
}

/// An alert raised by a state change, waiting to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAlert {
    pub device_id: String,
    pub payload: AlertPayload,
}

#[derive(Debug, Default)]
pub struct Monitor {
    devices: Vec<MonitoredDevice>,
    check_interval: u64,
    alerts_sent: u64,
    last_check: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn new(check_interval: u64) -> Self {
        Self {
            check_interval,
            ..Default::default()
        }
    }

    pub fn devices(&self) -> &[MonitoredDevice] {
        &self.devices
    }

    /// Mirror the dataset's addresses: add new ones, drop vanished ones and
    /// refresh names. Existing state and history are kept.
    pub fn sync(&mut self, addresses: &[IpAddress]) {
        self.devices
            .retain(|d| addresses.iter().any(|ip| ip.id == d.id));

        for ip in addresses {
            match self.devices.iter_mut().find(|d| d.id == ip.id) {
                Some(device) => {
                    if device.ip_address != ip.address {
                        device.latency_history.clear();
                        device.uptime_percent = 100.0;
                    }
                    device.ip_address = ip.address.clone();
                    device.hostname = display_name(ip);
                }
                None => self
                    .devices
                    .push(MonitoredDevice::from_record(ip, self.check_interval)),
            }
        }
    }

    /// Addresses of enabled devices, skipping ones that do not parse.
    pub fn targets(&self) -> Vec<IpAddr> {
        self.devices
            .iter()
            .filter(|d| d.enabled)
            .filter_map(|d| d.ip_address.trim().parse().ok())
            .collect()
    }

    /// Up or down for each enabled device, keyed by record id.
    pub fn reachability(&self) -> Vec<(String, bool)> {
        self.devices
            .iter()
            .filter(|d| d.enabled)
            .map(|d| (d.id.clone(), d.status.is_up()))
            .collect()
    }

    /// Fold one round of probe results into device state and return the
    /// alerts the transitions call for. Enabled devices missing from
    /// `results` count as unreachable.
    pub fn apply(
        &mut self,
        results: &[Reachability],
        settings: &NotificationSettings,
        now: DateTime<Utc>,
    ) -> Vec<PendingAlert> {
        let mut alerts = Vec::new();
        let time = now.format("%H:%M").to_string();

        for device in self.devices.iter_mut().filter(|d| d.enabled) {
            let probe = results
                .iter()
                .find(|r| same_address(&r.address, &device.ip_address));
            let (alive, latency) = match probe {
                Some(r) if r.alive => (true, r.latency_ms.unwrap_or(0.0)),
                _ => (false, 0.0),
            };

            let previous = device.status;
            device.status = if !alive {
                DeviceStatus::Offline
            } else if latency > settings.high_latency_threshold {
                DeviceStatus::Warning
            } else {
                DeviceStatus::Online
            };
            device.latency = latency;
            if alive {
                device.last_seen = Some(now.to_rfc3339());
            }
            device.record_sample(LatencySample {
                time: time.clone(),
                latency,
                online: alive,
            });

            let current = device.status;
            if current != previous {
                if current == DeviceStatus::Offline && settings.alert_on_offline {
                    alerts.push(PendingAlert {
                        device_id: device.id.clone(),
                        payload: AlertPayload::offline(&device.hostname, &device.ip_address),
                    });
                } else if previous == DeviceStatus::Offline
                    && current.is_up()
                    && settings.alert_on_back_online
                {
                    alerts.push(PendingAlert {
                        device_id: device.id.clone(),
                        payload: AlertPayload::back_online(&device.hostname, &device.ip_address),
                    });
                }
            }

            if settings.alert_on_high_latency
                && current.is_up()
                && latency > settings.high_latency_threshold
            {
                alerts.push(PendingAlert {
                    device_id: device.id.clone(),
                    payload: AlertPayload::high_latency(
                        &device.hostname,
                        &device.ip_address,
                        latency,
                    ),
                });
            }
        }

        self.last_check = Some(now);
        alerts
    }

    pub fn record_alerts_sent(&mut self, count: u64) {
        self.alerts_sent += count;
    }

    pub fn toggle(&mut self, id: &str) -> Result<MonitoredDevice, AppError> {
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::NotFound(format!("monitored device '{}' not found", id)))?;
        device.enabled = !device.enabled;
        Ok(device.clone())
    }

    /// Totals over enabled devices.
    pub fn stats(&self) -> MonitoringStats {
        let enabled: Vec<&MonitoredDevice> = self.devices.iter().filter(|d| d.enabled).collect();
        let count = |status| enabled.iter().filter(|d| d.status == status).count();

        let up: Vec<&&MonitoredDevice> = enabled.iter().filter(|d| d.status.is_up()).collect();
        let average_latency = if up.is_empty() {
            0.0
        } else {
            (up.iter().map(|d| d.latency).sum::<f64>() / up.len() as f64).round()
        };
        let average_uptime = if enabled.is_empty() {
            0.0
        } else {
            round1(enabled.iter().map(|d| d.uptime_percent).sum::<f64>() / enabled.len() as f64)
        };

        MonitoringStats {
            total_devices: enabled.len(),
            online_devices: count(DeviceStatus::Online),
            offline_devices: count(DeviceStatus::Offline),
            warning_devices: count(DeviceStatus::Warning),
            average_latency,
            average_uptime,
            alerts_sent: self.alerts_sent,
            last_check: self.last_check.map(|t| t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_dataset;
    use crate::notify::AlertType;

    fn up(addr: &str, latency: f64) -> Reachability {
        Reachability {
            address: addr.into(),
            alive: true,
            latency_ms: Some(latency),
        }
    }

    fn down(addr: &str) -> Reachability {
        Reachability {
            address: addr.into(),
            alive: false,
            latency_ms: None,
        }
    }

    fn monitor() -> Monitor {
        let mut monitor = Monitor::new(crate::config::DEFAULT_MONITOR_INTERVAL_SECS);
        monitor.sync(&sample_dataset().ip_addresses);
        monitor
    }

    fn status(monitor: &Monitor, id: &str) -> DeviceStatus {
        monitor.devices().iter().find(|d| d.id == id).unwrap().status
    }

    #[test]
    fn test_sync_seeds_initial_state() {
        let monitor = monitor();
        assert_eq!(monitor.devices().len(), 2);
        assert_eq!(status(&monitor, "gw"), DeviceStatus::Online);
        assert_eq!(status(&monitor, "nas"), DeviceStatus::Offline);
        assert!(monitor.devices().iter().all(|d| d.enabled));
        assert_eq!(monitor.devices()[0].check_interval, 30);
    }

    #[test]
    fn test_sync_drops_and_refreshes() {
        let mut monitor = monitor();
        let mut ips = sample_dataset().ip_addresses;
        ips.retain(|ip| ip.id == "nas");
        ips[0].hostname = "storage".into();

        monitor.sync(&ips);
        assert_eq!(monitor.devices().len(), 1);
        assert_eq!(monitor.devices()[0].hostname, "storage");
    }

    #[test]
    fn test_monitor_disabled_in_record() {
        let mut ips = sample_dataset().ip_addresses;
        ips[1].monitor_enabled = Some(false);
        let mut monitor = Monitor::new(30);
        monitor.sync(&ips);
        assert_eq!(monitor.targets(), vec!["192.168.1.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_transitions_raise_alerts() {
        let mut monitor = monitor();
        let settings = NotificationSettings::default();

        let alerts = monitor.apply(
            &[down("192.168.1.1"), up("192.168.1.20", 3.0)],
            &settings,
            Utc::now(),
        );
        assert_eq!(status(&monitor, "gw"), DeviceStatus::Offline);
        assert_eq!(status(&monitor, "nas"), DeviceStatus::Online);

        let kinds: Vec<(String, AlertType)> = alerts
            .iter()
            .map(|a| (a.device_id.clone(), a.payload.alert_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("gw".to_string(), AlertType::Offline),
                ("nas".to_string(), AlertType::Online),
            ]
        );

        // No change, no alerts.
        let again = monitor.apply(
            &[down("192.168.1.1"), up("192.168.1.20", 3.0)],
            &settings,
            Utc::now(),
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_alert_flags_respected() {
        let mut monitor = monitor();
        let settings = NotificationSettings {
            alert_on_offline: false,
            alert_on_back_online: false,
            ..Default::default()
        };
        let alerts = monitor.apply(&[up("192.168.1.20", 1.0)], &settings, Utc::now());
        assert!(alerts.is_empty());
        // gw had no result, so it is now offline.
        assert_eq!(status(&monitor, "gw"), DeviceStatus::Offline);
    }

    #[test]
    fn test_high_latency_is_warning() {
        let mut monitor = monitor();
        let settings = NotificationSettings {
            alert_on_high_latency: true,
            ..Default::default()
        };
        let alerts = monitor.apply(
            &[up("192.168.1.1", 450.0), up("192.168.1.20", 10.0)],
            &settings,
            Utc::now(),
        );
        assert_eq!(status(&monitor, "gw"), DeviceStatus::Warning);
        let slow: Vec<&PendingAlert> = alerts
            .iter()
            .filter(|a| a.payload.alert_type == AlertType::HighLatency)
            .collect();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].payload.latency, Some(450.0));
    }

    #[test]
    fn test_history_bounded_and_uptime() {
        let mut monitor = monitor();
        let settings = NotificationSettings::default();
        for _ in 0..(HISTORY_LEN + 10) {
            monitor.apply(&[up("192.168.1.1", 2.0)], &settings, Utc::now());
        }
        monitor.apply(&[down("192.168.1.1")], &settings, Utc::now());

        let gw = monitor.devices().iter().find(|d| d.id == "gw").unwrap();
        assert_eq!(gw.latency_history.len(), HISTORY_LEN);
        assert_eq!(gw.uptime_percent, 96.7);
        assert_eq!(gw.latency, 0.0);
        assert!(gw.last_seen.is_some());
    }

    #[test]
    fn test_non_canonical_ipv6_matches_fping_result() {
        let mut ips = sample_dataset().ip_addresses;
        ips.truncate(1);
        ips[0].address = "2001:DB8:0:0::1".into();
        let mut monitor = Monitor::new(30);
        monitor.sync(&ips);

        // fping reports the normalized form.
        let alerts = monitor.apply(
            &[up("2001:db8::1", 1.0)],
            &NotificationSettings::default(),
            Utc::now(),
        );
        assert_eq!(status(&monitor, "gw"), DeviceStatus::Online);
        assert!(alerts.is_empty());
        assert!(same_address("2001:db8::1", " 2001:0DB8::0001 "));
        assert!(!same_address("10.0.0.1", "10.0.0.10"));
    }

    #[test]
    fn test_toggle_excludes_from_probe_and_stats() {
        let mut monitor = monitor();
        let toggled = monitor.toggle("nas").unwrap();
        assert!(!toggled.enabled);
        assert_eq!(monitor.targets().len(), 1);
        assert_eq!(monitor.stats().total_devices, 1);

        assert_eq!(monitor.toggle("ghost").unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_stats() {
        let mut monitor = monitor();
        let settings = NotificationSettings::default();
        monitor.apply(
            &[up("192.168.1.1", 10.0), up("192.168.1.20", 21.0)],
            &settings,
            Utc::now(),
        );
        monitor.record_alerts_sent(1);

        let stats = monitor.stats();
        assert_eq!(stats.total_devices, 2);
        assert_eq!(stats.online_devices, 2);
        assert_eq!(stats.offline_devices, 0);
        assert_eq!(stats.average_latency, 16.0);
        assert_eq!(stats.average_uptime, 100.0);
        assert_eq!(stats.alerts_sent, 1);
        assert!(stats.last_check.is_some());
    }
}
