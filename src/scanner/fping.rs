//! Thin wrapper around the `fping` executable. Arguments are passed as a
//! vector, never through a shell, and every address is parsed before use.

use std::collections::HashMap;
use std::net::IpAddr;
use std::process::Output;

use ipnetwork::IpNetwork;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Reachability;
use crate::error::AppError;

/// Largest sweep accepted: a /16 worth of addresses.
pub const MAX_SWEEP_HOST_BITS: u32 = 16;

/// Per-target timeout for monitoring probes.
const PROBE_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct Fping {
    binary: String,
    timeout_ms: u64,
}

impl Fping {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout_ms: PROBE_TIMEOUT_MS,
        }
    }

    fn sweep_args(network: &IpNetwork) -> Vec<String> {
        vec![
            "-g".to_string(),
            network.to_string(),
            "-a".to_string(),
            "-r".to_string(),
            "0".to_string(),
            "-q".to_string(),
        ]
    }

    fn probe_args(&self, targets: &[IpAddr]) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            "1".to_string(),
            "-t".to_string(),
            self.timeout_ms.to_string(),
        ];
        args.extend(targets.iter().map(IpAddr::to_string));
        args
    }

    async fn run(&self, args: &[String]) -> Result<Output, AppError> {
        debug!(binary = %self.binary, ?args, "Running fping");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Scan(format!("failed to run '{}': {}", self.binary, e)))?;

        // Exit 1 means some targets were unreachable; 3 and 4 are usage and
        // system errors.
        if let Some(code) = output.status.code()
            && code >= 3
        {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Scan(format!(
                "fping exited with status {}: {}",
                code,
                stderr.trim()
            )));
        }
        Ok(output)
    }

    /// Addresses in `cidr` that answered one echo request.
    pub async fn sweep(&self, cidr: &str) -> Result<Vec<IpAddr>, AppError> {
        let network = parse_sweep_network(cidr)?;
        let output = self.run(&Self::sweep_args(&network)).await?;
        let alive = parse_alive_hosts(&String::from_utf8_lossy(&output.stdout));
        debug!(cidr = %network, alive = alive.len(), "Sweep finished");
        Ok(alive)
    }

    /// One echo request per target. Targets absent from fping's output are
    /// reported unreachable.
    pub async fn probe(&self, targets: &[IpAddr]) -> Result<Vec<Reachability>, AppError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let output = self.run(&self.probe_args(targets)).await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let parsed = parse_probe_output(&text);
        if parsed.is_empty() {
            warn!("fping produced no parseable probe output");
        }

        Ok(targets
            .iter()
            .map(|addr| match parsed.get(addr) {
                Some(Some(latency)) => Reachability {
                    address: addr.to_string(),
                    alive: true,
                    latency_ms: Some(*latency),
                },
                _ => Reachability {
                    address: addr.to_string(),
                    alive: false,
                    latency_ms: None,
                },
            })
            .collect())
    }
}

impl Default for Fping {
    fn default() -> Self {
        Self::new("fping")
    }
}

/// Parse and bound a sweep target.
pub fn parse_sweep_network(cidr: &str) -> Result<IpNetwork, AppError> {
    let cidr = cidr.trim();
    if cidr.is_empty() {
        return Err(AppError::InvalidInput("CIDR required".to_string()));
    }
    let network: IpNetwork = cidr
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("'{}' is not a valid CIDR", cidr)))?;

    let host_bits = match network {
        IpNetwork::V4(n) => 32 - u32::from(n.prefix()),
        IpNetwork::V6(n) => 128 - u32::from(n.prefix()),
    };
    if host_bits > MAX_SWEEP_HOST_BITS {
        return Err(AppError::InvalidInput(format!(
            "{} is too large to scan; use a /{} or smaller",
            cidr,
            match network {
                IpNetwork::V4(_) => 32 - MAX_SWEEP_HOST_BITS,
                IpNetwork::V6(_) => 128 - MAX_SWEEP_HOST_BITS,
            }
        )));
    }
    Ok(network)
}

/// `fping -a -q` prints one alive address per line.
pub fn parse_alive_hosts(stdout: &str) -> Vec<IpAddr> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let token = line.split_whitespace().next()?;
            token.parse().ok()
        })
        .collect()
}

/// Map each address seen in fping `-c` output to its latency, or `None`
/// when it did not answer. Understands both the per-ping lines and the
/// summary lines.
pub fn parse_probe_output(text: &str) -> HashMap<IpAddr, Option<f64>> {
    let mut results: HashMap<IpAddr, Option<f64>> = HashMap::new();

    for line in text.lines() {
        let Some((addr, rest)) = line.split_once(" : ") else {
            continue;
        };
        let Ok(addr) = addr.trim().parse::<IpAddr>() else {
            continue;
        };
        let rest = rest.trim();

        let latency = if rest.starts_with('[') {
            parse_ping_line(rest)
        } else if rest.starts_with("xmt/rcv/%loss") {
            parse_summary_line(rest)
        } else {
            continue;
        };

        // A reply on any line wins over a timeout reported elsewhere.
        let entry = results.entry(addr).or_insert(None);
        if entry.is_none() {
            *entry = latency;
        }
    }

    results
}

/// `[0], 64 bytes, 0.52 ms (0.52 avg, 0% loss)`
fn parse_ping_line(rest: &str) -> Option<f64> {
    let after_bytes = &rest[rest.find("bytes,")? + "bytes,".len()..];
    let ms_idx = after_bytes.find(" ms")?;
    after_bytes[..ms_idx].trim().parse::<f64>().ok()
}

/// `xmt/rcv/%loss = 1/1/0%, min/avg/max = 0.52/0.52/0.52`
fn parse_summary_line(rest: &str) -> Option<f64> {
    let counts = rest.split_once('=')?.1.trim();
    let received: u32 = counts.split('/').nth(1)?.trim().parse().ok()?;
    if received == 0 {
        return None;
    }
    let avg = rest
        .split_once("min/avg/max =")
        .and_then(|(_, stats)| stats.trim().split('/').nth(1))
        .and_then(|avg| avg.trim().parse::<f64>().ok());
    // Some builds omit the timing block; treat the host as up with 0 ms.
    Some(avg.unwrap_or(0.0))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A stand-in `fping` that prints canned output and exits 0.
    #[cfg(unix)]
    pub(crate) fn fake_fping(dir: &tempfile::TempDir, stdout: &str, stderr: &str) -> Fping {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fping");
        let script = format!(
            "#!/bin/sh\ncat <<'OUT'\n{}\nOUT\ncat >&2 <<'ERR'\n{}\nERR\nexit 0\n",
            stdout.trim_end(),
            stderr.trim_end()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Fping::new(path.to_string_lossy().into_owned())
    }

    const SWEEP_OUTPUT: &str = "192.168.1.1\n192.168.1.20\n\n192.168.1.254\n";

    const PROBE_STDOUT: &str = "\
192.168.1.1  : [0], 64 bytes, 0.52 ms (0.52 avg, 0% loss)
192.168.1.20 : [0], 84 bytes, 12.8 ms (12.8 avg, 0% loss)
192.168.1.30 : [0], timed out (NaN avg, 100% loss)
";

    const PROBE_STDERR: &str = "\
192.168.1.1  : xmt/rcv/%loss = 1/1/0%, min/avg/max = 0.52/0.52/0.52
192.168.1.20 : xmt/rcv/%loss = 1/1/0%, min/avg/max = 12.8/12.8/12.8
192.168.1.30 : xmt/rcv/%loss = 1/0/100%
";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_alive_hosts() {
        let hosts = parse_alive_hosts(SWEEP_OUTPUT);
        assert_eq!(
            hosts,
            vec![ip("192.168.1.1"), ip("192.168.1.20"), ip("192.168.1.254")]
        );
    }

    #[test]
    fn test_parse_alive_hosts_ignores_noise() {
        let hosts = parse_alive_hosts("ICMP Host Unreachable from 10.0.0.1\n10.0.0.9\n");
        assert_eq!(hosts, vec![ip("10.0.0.9")]);
    }

    #[test]
    fn test_parse_per_ping_lines() {
        let parsed = parse_probe_output(PROBE_STDOUT);
        assert_eq!(parsed[&ip("192.168.1.1")], Some(0.52));
        assert_eq!(parsed[&ip("192.168.1.20")], Some(12.8));
        assert_eq!(parsed[&ip("192.168.1.30")], None);
    }

    #[test]
    fn test_parse_summary_lines_only() {
        let parsed = parse_probe_output(PROBE_STDERR);
        assert_eq!(parsed[&ip("192.168.1.1")], Some(0.52));
        assert_eq!(parsed[&ip("192.168.1.30")], None);
    }

    #[test]
    fn test_summary_without_timings_counts_as_alive() {
        let parsed = parse_probe_output("10.0.0.2 : xmt/rcv/%loss = 1/1/0%\n");
        assert_eq!(parsed[&ip("10.0.0.2")], Some(0.0));
    }

    #[test]
    fn test_combined_output() {
        let text = format!("{}\n{}", PROBE_STDOUT, PROBE_STDERR);
        let parsed = parse_probe_output(&text);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[&ip("192.168.1.20")], Some(12.8));
    }

    #[test]
    fn test_sweep_network_bounds() {
        assert!(parse_sweep_network("10.0.0.0/16").is_ok());
        assert!(parse_sweep_network("192.168.1.0/24").is_ok());
        assert_eq!(
            parse_sweep_network("10.0.0.0/8").unwrap_err().kind(),
            "InvalidInput"
        );
        assert_eq!(
            parse_sweep_network("10.0.0.0/24; rm -rf /")
                .unwrap_err()
                .kind(),
            "InvalidInput"
        );
        assert!(parse_sweep_network("").is_err());
    }

    #[test]
    fn test_argument_vectors() {
        let network = parse_sweep_network("192.168.1.0/24").unwrap();
        assert_eq!(
            Fping::sweep_args(&network),
            vec!["-g", "192.168.1.0/24", "-a", "-r", "0", "-q"]
        );

        let fping = Fping::default();
        assert_eq!(
            fping.probe_args(&[ip("10.0.0.1"), ip("10.0.0.2")]),
            vec!["-c", "1", "-t", "500", "10.0.0.1", "10.0.0.2"]
        );
    }

    #[tokio::test]
    async fn test_empty_probe_skips_process() {
        let fping = Fping::new("/nonexistent/fping");
        assert!(fping.probe(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_scan_error() {
        let fping = Fping::new("/nonexistent/fping");
        let err = fping.sweep("192.168.1.0/30").await.unwrap_err();
        assert_eq!(err.kind(), "Scan");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reachability_reads_stdout_and_stderr_of_fping() {
        let dir = tempfile::tempdir().unwrap();
        let fping = fake_fping(&dir, PROBE_STDOUT, PROBE_STDERR);

        let results = fping
            .probe(&[ip("192.168.1.1"), ip("192.168.1.30"), ip("192.168.1.99")])
            .await
            .unwrap();
        assert!(results[0].alive);
        assert_eq!(results[0].latency_ms, Some(0.52));
        assert!(!results[1].alive);
        assert!(!results[2].alive);
    }
}
