pub mod fping;

use std::net::IpAddr;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use fping::Fping;

use crate::error::AppError;

/// Reverse lookups in flight at once during a sweep.
const LOOKUP_CONCURRENCY: usize = 16;
/// Give up on a PTR record after this long and use the fallback name.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one monitoring probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reachability {
    pub address: String,
    pub alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

/// A host that answered a subnet sweep, shaped for the scan view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredHost {
    pub ip: String,
    #[serde(default = "online")]
    pub is_online: bool,
    #[serde(default)]
    pub hostname: String,
    /// fping cannot see layer 2, so this stays empty.
    #[serde(default)]
    pub mac: String,
}

fn online() -> bool {
    true
}

/// Sweep `cidr` and name each live host, via reverse DNS when `resolve` is
/// set.
pub async fn scan_hosts(
    fping: &Fping,
    cidr: &str,
    resolve: bool,
) -> Result<Vec<DiscoveredHost>, AppError> {
    let alive = fping.sweep(cidr).await?;

    let lookups = alive.into_iter().map(|ip| {
        async move {
            let name = if resolve { reverse_lookup(ip).await } else { None };
            DiscoveredHost {
                ip: ip.to_string(),
                is_online: true,
                hostname: name.unwrap_or_else(|| fallback_hostname(&ip)),
                mac: String::new(),
            }
        }
    });

    Ok(stream::iter(lookups)
        .buffered(LOOKUP_CONCURRENCY)
        .collect()
        .await)
}

async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
    let result = match tokio::time::timeout(LOOKUP_TIMEOUT, lookup).await {
        Ok(joined) => joined.ok()?,
        Err(_) => {
            debug!(%ip, "Reverse lookup timed out");
            return None;
        }
    };
    match result {
        // The resolver echoes the address back when there is no PTR record.
        Ok(name) if !name.is_empty() && name != ip.to_string() => Some(name),
        Ok(_) => None,
        Err(e) => {
            debug!(%ip, error = %e, "Reverse lookup failed");
            None
        }
    }
}

/// `host-<last octet>` for IPv4, `host-<last group>` for IPv6.
pub fn fallback_hostname(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("host-{}", v4.octets()[3]),
        IpAddr::V6(v6) => format!("host-{:x}", v6.segments()[7]),
    }
}
