use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use hearth_core::config::DiscoveryConfig;
use hearth_trust::{TrustSnapshot, TrustStore};
use serde::{Deserialize, Serialize};

use crate::datagram::Announcement;
use crate::udp_discovery::collect_announcements;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Available,
    Paired,
    Offline,
    Generic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingState {
    pub paired: bool,
    pub pending: bool,
}

/// A peer seen during one discovery pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub ip: String,
    pub hostname: Option<String>,
    pub host_id: String,
    pub is_node: bool,
    pub status: HostStatus,
    pub fingerprint: Option<String>,
    pub pairing: PairingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl DiscoveredHost {
    /// Builds a host record and applies trust annotation.
    pub fn annotated(
        ip: &str,
        hostname: Option<String>,
        host_id: Option<String>,
        is_node: bool,
        trust: &TrustSnapshot,
    ) -> Self {
        let host_id = host_id
            .filter(|value| !value.trim().is_empty())
            .or_else(|| hostname.clone().filter(|value| !value.trim().is_empty()))
            .unwrap_or_else(|| ip.to_string());
        let paired = trust.is_paired(&host_id, ip);
        Self {
            ip: ip.to_string(),
            fingerprint: if paired {
                trust.fingerprint(&host_id).map(str::to_string)
            } else {
                None
            },
            pairing: PairingState {
                paired,
                pending: !paired && trust.is_pending(&host_id),
            },
            status: if paired {
                HostStatus::Paired
            } else {
                HostStatus::Available
            },
            hostname,
            host_id,
            is_node,
            latency_ms: None,
        }
    }
}

/// Parameters of one UDP discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub targets: Vec<SocketAddr>,
    pub timeout: Duration,
    pub exclude_ips: HashSet<String>,
    pub exclude_ids: HashSet<String>,
    pub sender_id: Option<String>,
}

impl DiscoveryRequest {
    /// Broadcast request built from settings, excluding loopback addresses.
    pub fn broadcast(config: &DiscoveryConfig) -> Self {
        let targets = config
            .broadcast_address
            .parse::<IpAddr>()
            .map(|ip| vec![SocketAddr::new(ip, config.port)])
            .unwrap_or_default();
        Self {
            targets,
            timeout: Duration::from_millis(config.timeout_ms),
            exclude_ips: HashSet::from(["127.0.0.1".to_string(), "::1".to_string()]),
            exclude_ids: HashSet::new(),
            sender_id: None,
        }
    }

    /// Adds the probing node's own ip and id to the exclusion sets.
    pub fn excluding_self(mut self, ip: Option<&str>, node_id: &str) -> Self {
        if let Some(ip) = ip {
            self.exclude_ips.insert(ip.to_string());
        }
        self.exclude_ids.insert(node_id.to_string());
        self.sender_id = Some(node_id.to_string());
        self
    }
}

/// Turns raw announcements into annotated hosts.
///
/// Responders without an ip or matching an exclusion set are skipped; the
/// first announcement per ip wins; arrival order is preserved.
pub fn annotate_announcements(
    announcements: &[Announcement],
    trust: &TrustSnapshot,
    exclude_ips: &HashSet<String>,
    exclude_ids: &HashSet<String>,
) -> Vec<DiscoveredHost> {
    let mut seen_ips = HashSet::new();
    let mut hosts = Vec::new();
    for announcement in announcements {
        let Some(ip) = announcement
            .ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        else {
            continue;
        };
        let host = DiscoveredHost::annotated(
            ip,
            announcement.hostname.clone(),
            announcement.node_id.clone(),
            true,
            trust,
        );
        if exclude_ips.contains(&host.ip) || exclude_ids.contains(&host.host_id) {
            continue;
        }
        if !seen_ips.insert(host.ip.clone()) {
            continue;
        }
        hosts.push(host);
    }
    hosts
}

/// Runs one UDP discovery pass and annotates the responders against `trust`.
///
/// Never fails: trust-store or socket problems degrade to fewer results.
pub async fn discover(
    request: &DiscoveryRequest,
    trust: &dyn TrustStore,
    mut on_host: Option<&mut (dyn FnMut(&DiscoveredHost) + Send)>,
) -> Vec<DiscoveredHost> {
    let started = Instant::now();
    tracing::info!(targets = request.targets.len(), "udp discovery started");
    let snapshot = trust.snapshot().unwrap_or_else(|error| {
        tracing::warn!(%error, "trust snapshot unavailable; treating all peers as unpaired");
        TrustSnapshot::default()
    });

    let received =
        collect_announcements(&request.targets, request.timeout, request.sender_id.clone()).await;
    let announcements: Vec<Announcement> = received
        .into_iter()
        .map(|item| item.announcement)
        .collect();
    let hosts = annotate_announcements(
        &announcements,
        &snapshot,
        &request.exclude_ips,
        &request.exclude_ids,
    );

    for host in &hosts {
        tracing::info!(ip = %host.ip, host_id = %host.host_id, status = ?host.status, "node found");
        if let Some(callback) = on_host.as_mut() {
            callback(host);
        }
    }
    tracing::info!(
        count = hosts.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "udp discovery finished"
    );
    hosts
}

#[cfg(test)]
mod tests {
    use hearth_trust::{FileTrustStore, PairingRecord, TrustedHost};

    use super::*;
    use crate::identity::NodeIdentity;
    use crate::udp_discovery::start_responder;

    fn announcement(node_id: Option<&str>, hostname: Option<&str>, ip: Option<&str>) -> Announcement {
        Announcement {
            service: "hearth".into(),
            version: 1,
            node_id: node_id.map(str::to_string),
            hostname: hostname.map(str::to_string),
            ip: ip.map(str::to_string),
            ..Announcement::default()
        }
    }

    fn snapshot() -> TrustSnapshot {
        TrustSnapshot::new(
            vec![TrustedHost {
                host_id: "node-a".into(),
                fingerprint: Some("fp-a".into()),
                ip: None,
            }],
            vec![PairingRecord {
                host_id: "node-c".into(),
                ip: Some("10.0.0.30".into()),
                fingerprint: None,
                paired_at_unix_ms: 1,
            }],
            Vec::new(),
        )
    }

    #[test]
    fn unit_host_id_falls_back_to_hostname_then_ip() {
        let hosts = annotate_announcements(
            &[
                announcement(None, Some("box.lan"), Some("10.0.0.2")),
                announcement(None, None, Some("10.0.0.3")),
            ],
            &TrustSnapshot::default(),
            &HashSet::new(),
            &HashSet::new(),
        );
        assert_eq!(hosts[0].host_id, "box.lan");
        assert_eq!(hosts[1].host_id, "10.0.0.3");
        assert!(hosts.iter().all(|host| host.status == HostStatus::Available));
    }

    #[test]
    fn functional_trust_annotation_marks_paired_hosts() {
        let hosts = annotate_announcements(
            &[
                announcement(Some("node-a"), None, Some("10.0.0.10")),
                announcement(Some("node-b"), None, Some("10.0.0.20")),
                announcement(Some("renamed"), None, Some("10.0.0.30")),
            ],
            &snapshot(),
            &HashSet::new(),
            &HashSet::new(),
        );
        assert_eq!(hosts[0].status, HostStatus::Paired);
        assert_eq!(hosts[0].fingerprint.as_deref(), Some("fp-a"));
        assert_eq!(hosts[1].status, HostStatus::Available);
        assert!(!hosts[1].pairing.paired);
        assert_eq!(hosts[2].status, HostStatus::Paired);
        assert_eq!(hosts[2].fingerprint, None);
    }

    #[test]
    fn functional_exclusions_and_missing_ip_are_skipped() {
        let exclude_ips = HashSet::from(["10.0.0.5".to_string()]);
        let exclude_ids = HashSet::from(["self-node".to_string()]);
        let hosts = annotate_announcements(
            &[
                announcement(Some("peer"), None, Some("10.0.0.5")),
                announcement(Some("self-node"), None, Some("10.0.0.6")),
                announcement(Some("ghost"), None, None),
                announcement(Some("peer-2"), None, Some("10.0.0.7")),
            ],
            &TrustSnapshot::default(),
            &exclude_ips,
            &exclude_ids,
        );
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_id, "peer-2");
        assert!(hosts.iter().all(|host| host.ip != "10.0.0.5"));
    }

    #[test]
    fn regression_duplicate_ips_keep_first_arrival() {
        let hosts = annotate_announcements(
            &[
                announcement(Some("first"), None, Some("10.0.0.9")),
                announcement(Some("second"), None, Some("10.0.0.9")),
                announcement(Some("third"), None, Some("10.0.0.10")),
            ],
            &TrustSnapshot::default(),
            &HashSet::new(),
            &HashSet::new(),
        );
        let ips: Vec<&str> = hosts.iter().map(|host| host.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.9", "10.0.0.10"]);
        assert_eq!(hosts[0].host_id, "first");
    }

    fn identity(node_id: &str) -> NodeIdentity {
        NodeIdentity {
            node_id: node_id.to_string(),
            hostname: format!("{node_id}.lan"),
            ip: None,
            preboot_port: 7040,
            daemon_port: 7030,
        }
    }

    #[tokio::test]
    async fn integration_discover_finds_responder_and_honors_ip_exclusion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTrustStore::new(temp.path());
        let mut responder = start_responder(identity("peer-node"), "127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("responder");

        let request = DiscoveryRequest {
            targets: vec![responder.local_addr()],
            timeout: Duration::from_millis(300),
            exclude_ips: HashSet::new(),
            exclude_ids: HashSet::new(),
            sender_id: Some("prober".into()),
        };
        let mut seen = Vec::new();
        let mut callback = |host: &DiscoveredHost| seen.push(host.host_id.clone());
        let hosts = discover(&request, &store, Some(&mut callback)).await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_id, "peer-node");
        assert_eq!(hosts[0].ip, "127.0.0.1");
        assert_eq!(seen, vec!["peer-node".to_string()]);

        let excluded = DiscoveryRequest {
            exclude_ips: HashSet::from(["127.0.0.1".to_string()]),
            ..request
        };
        let hosts = discover(&excluded, &store, None).await;
        responder.shutdown().await;
        assert!(hosts.is_empty());
    }

    #[test]
    fn unit_broadcast_request_excludes_loopback_and_self() {
        let request = DiscoveryRequest::broadcast(&DiscoveryConfig::default())
            .excluding_self(Some("192.168.1.50"), "node-self");
        assert_eq!(request.targets, vec!["255.255.255.255:7041".parse().expect("addr")]);
        assert!(request.exclude_ips.contains("127.0.0.1"));
        assert!(request.exclude_ips.contains("192.168.1.50"));
        assert!(request.exclude_ids.contains("node-self"));
    }
}
