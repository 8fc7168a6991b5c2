use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;

use anyhow::{Context, Result};
use hearth_core::{short_hex_id, write_text_atomic};
use serde::{Deserialize, Serialize};

const NODE_ID_FILE_NAME: &str = "node_id";

/// How this node presents itself to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub hostname: String,
    pub ip: Option<String>,
    pub preboot_port: u16,
    pub daemon_port: u16,
}

/// Builds the local identity, creating a persistent node id under `data_dir`
/// on first use.
pub fn local_identity(data_dir: &Path, preboot_port: u16, daemon_port: u16) -> Result<NodeIdentity> {
    Ok(NodeIdentity {
        node_id: load_or_create_node_id(data_dir)?,
        hostname: local_hostname(),
        ip: primary_lan_ip().map(|ip| ip.to_string()),
        preboot_port,
        daemon_port,
    })
}

pub fn load_or_create_node_id(data_dir: &Path) -> Result<String> {
    let path = data_dir.join(NODE_ID_FILE_NAME);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }
    let node_id = format!("hearth-{}{}", short_hex_id(), short_hex_id());
    write_text_atomic(&path, &format!("{node_id}\n"))
        .with_context(|| format!("failed to persist node id {}", path.display()))?;
    Ok(node_id)
}

pub fn local_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|raw| raw.trim().to_string())
        .find(|name| !name.is_empty())
        .or_else(|| {
            std::env::var("HOSTNAME")
                .ok()
                .filter(|name| !name.trim().is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Address of the interface that would route to the internet. No packet is sent.
pub fn primary_lan_ip() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
