use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use hearth_core::config::{DEFAULT_DAEMON_PORT, DEFAULT_PREBOOT_PORT};
use hearth_trust::{TrustSnapshot, TrustStore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::peer_discovery::{DiscoveredHost, HostStatus};

pub const HELLO_ENDPOINT: &str = "/preboot/hello";
pub const TCP_PING_TIMEOUT: Duration = Duration::from_millis(250);
pub const HELLO_TIMEOUT: Duration = Duration::from_millis(900);

/// Best-effort TCP connect within `timeout`.
pub async fn tcp_ping(ip: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    )
}

/// `GET http://{host}:{port}/preboot/hello`; any 2xx counts as a node.
pub async fn hello_probe(client: &reqwest::Client, host: &str, port: u16, timeout: Duration) -> bool {
    let url = format!("http://{host}:{port}{HELLO_ENDPOINT}");
    match client.get(&url).timeout(timeout).send().await {
        Ok(response) => response.status().is_success(),
        Err(error) => {
            tracing::trace!(%url, %error, "hello probe failed");
            false
        }
    }
}

/// Single ICMP echo via the system `ping`; returns the round-trip in ms.
pub async fn ping_once(ip: &str, timeout: Duration) -> Option<u64> {
    let started = Instant::now();
    let mut command = Command::new("ping");
    if cfg!(target_os = "windows") {
        command.args(["-n", "1", "-w", timeout.as_millis().to_string().as_str(), ip]);
    } else {
        command.args(["-c", "1", ip]);
    }
    command.kill_on_drop(true);
    let status = tokio::time::timeout(timeout + Duration::from_millis(400), command.output())
        .await
        .ok()?
        .ok()?
        .status;
    status
        .success()
        .then(|| started.elapsed().as_millis().try_into().unwrap_or(u64::MAX))
}

fn ipv4_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").ok())
        .as_ref()
}

/// Every syntactically valid IPv4 address appearing in `text`, in order.
pub fn extract_ipv4s(text: &str) -> Vec<String> {
    let Some(pattern) = ipv4_pattern() else {
        return Vec::new();
    };
    pattern
        .find_iter(text)
        .map(|found| found.as_str())
        .filter(|candidate| candidate.parse::<Ipv4Addr>().is_ok())
        .map(str::to_string)
        .collect()
}

pub fn is_router_ip(ip: &str) -> bool {
    ip.ends_with(".1") || ip.ends_with(".254")
}

/// Neighbor-table addresses from `ip neigh` (Linux) and `arp -a`, deduplicated,
/// routers removed.
pub async fn neighbor_table_ips() -> Vec<String> {
    let mut commands: Vec<(&str, Vec<&str>)> = vec![("arp", vec!["-a"])];
    if cfg!(target_os = "linux") {
        commands.insert(0, ("ip", vec!["neigh"]));
    }
    let mut ips = Vec::new();
    for (program, args) in commands {
        let output = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output();
        if let Ok(Ok(output)) = tokio::time::timeout(Duration::from_secs(2), output).await {
            ips.extend(extract_ipv4s(&String::from_utf8_lossy(&output.stdout)));
        }
    }
    let mut seen = std::collections::HashSet::new();
    ips.retain(|ip| !is_router_ip(ip) && seen.insert(ip.clone()));
    ips
}

/// Reachability of one paired host on the preboot and daemon ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineHost {
    pub host_id: String,
    pub ip: String,
    pub online: bool,
    pub ports: BTreeMap<String, bool>,
}

/// Checks every paired host that has a known ip. Hosts are probed concurrently.
pub async fn trusted_hosts_online(trust: &dyn TrustStore) -> Vec<OnlineHost> {
    let pairings = trust.pairings().unwrap_or_else(|error| {
        tracing::warn!(%error, "failed to read pairings for online check");
        Vec::new()
    });
    let mut tasks = tokio::task::JoinSet::new();
    for (index, pairing) in pairings.into_iter().enumerate() {
        let Some(ip) = pairing.ip.filter(|ip| !ip.trim().is_empty()) else {
            continue;
        };
        let host_id = if pairing.host_id.trim().is_empty() {
            ip.clone()
        } else {
            pairing.host_id
        };
        tasks.spawn(async move {
            let (preboot, daemon) = tokio::join!(
                tcp_ping(&ip, DEFAULT_PREBOOT_PORT, TCP_PING_TIMEOUT),
                tcp_ping(&ip, DEFAULT_DAEMON_PORT, TCP_PING_TIMEOUT)
            );
            let ports = BTreeMap::from([
                (DEFAULT_PREBOOT_PORT.to_string(), preboot),
                (DEFAULT_DAEMON_PORT.to_string(), daemon),
            ]);
            (
                index,
                OnlineHost {
                    host_id,
                    ip,
                    online: preboot || daemon,
                    ports,
                },
            )
        });
    }
    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, host)| host).collect()
}

/// Splits a manual target (`ip`, `host:port`, or URL) into host and port.
pub fn parse_probe_target(target: &str) -> Result<(String, u16)> {
    let raw = target.trim();
    if raw.is_empty() {
        bail!("invalid_target");
    }
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = reqwest::Url::parse(&with_scheme).map_err(|_| anyhow::anyhow!("invalid_target"))?;
    let Some(host) = url.host_str().filter(|host| !host.is_empty()) else {
        bail!("invalid_target");
    };
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok((host, url.port().unwrap_or(DEFAULT_PREBOOT_PORT)))
}

/// Probes a manually entered host: `available` when its hello endpoint
/// answers, `offline` otherwise, `paired` when trusted.
pub async fn probe_remote_target(
    client: &reqwest::Client,
    target: &str,
    trust: &TrustSnapshot,
) -> Result<DiscoveredHost> {
    let (host, port) = parse_probe_target(target)?;
    let ip = resolve_ipv4(&host, port).await.unwrap_or_else(|| host.clone());
    tracing::info!(%host, port, "probing remote host");

    let started = Instant::now();
    let is_node = hello_probe(client, &ip, port, HELLO_TIMEOUT).await;
    let mut device = DiscoveredHost::annotated(&ip, Some(host.clone()), Some(host), is_node, trust);
    if is_node {
        device.latency_ms = Some(started.elapsed().as_millis().try_into().unwrap_or(u64::MAX));
    }
    if !device.pairing.paired {
        device.status = if is_node {
            HostStatus::Available
        } else {
            HostStatus::Offline
        };
    }
    Ok(device)
}

async fn resolve_ipv4(host: &str, port: u16) -> Option<String> {
    if host.parse::<IpAddr>().is_ok() {
        return Some(host.to_string());
    }
    let resolved = tokio::time::timeout(Duration::from_secs(1), tokio::net::lookup_host((host, port)))
        .await
        .ok()?
        .ok()?;
    resolved
        .map(|addr| addr.ip())
        .find(IpAddr::is_ipv4)
        .map(|ip| ip.to_string())
}
