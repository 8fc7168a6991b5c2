//! Wire format of the LAN discovery exchange: one JSON object per datagram.

use serde::{Deserialize, Serialize};

pub const DISCOVERY_PROTOCOL_VERSION: u32 = 1;
pub const DISCOVERY_SERVICE: &str = "hearth";
pub const MAX_DATAGRAM_BYTES: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryDatagram {
    Probe {
        service: String,
        version: u32,
        nonce: String,
        #[serde(default)]
        sender_id: Option<String>,
    },
    Announce(Announcement),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub service: String,
    pub version: u32,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub preboot_port: Option<u16>,
    #[serde(default)]
    pub daemon_port: Option<u16>,
}

impl DiscoveryDatagram {
    pub fn probe(nonce: impl Into<String>, sender_id: Option<String>) -> Self {
        Self::Probe {
            service: DISCOVERY_SERVICE.to_string(),
            version: DISCOVERY_PROTOCOL_VERSION,
            nonce: nonce.into(),
            sender_id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parses a datagram; anything oversized, malformed, or from another
    /// service yields `None`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_DATAGRAM_BYTES {
            return None;
        }
        let parsed = serde_json::from_slice::<Self>(bytes).ok()?;
        let service = match &parsed {
            Self::Probe { service, .. } => service,
            Self::Announce(announcement) => &announcement.service,
        };
        (service == DISCOVERY_SERVICE).then_some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_probe_encodes_with_kind_tag() {
        let encoded = DiscoveryDatagram::probe("n-1", None).encode();
        let value: serde_json::Value = serde_json::from_slice(&encoded).expect("json");
        assert_eq!(value["kind"], "probe");
        assert_eq!(value["service"], "hearth");
        assert_eq!(value["nonce"], "n-1");
    }

    #[test]
    fn unit_decode_accepts_minimal_announce() {
        let raw = br#"{"kind":"announce","service":"hearth","version":1,"node_id":"node-a"}"#;
        let Some(DiscoveryDatagram::Announce(announcement)) = DiscoveryDatagram::decode(raw) else {
            panic!("expected announce");
        };
        assert_eq!(announcement.node_id.as_deref(), Some("node-a"));
        assert_eq!(announcement.ip, None);
    }

    #[test]
    fn regression_decode_drops_foreign_malformed_and_oversized_datagrams() {
        assert!(DiscoveryDatagram::decode(b"").is_none());
        assert!(DiscoveryDatagram::decode(b"not json").is_none());
        assert!(DiscoveryDatagram::decode(
            br#"{"kind":"announce","service":"other","version":1}"#
        )
        .is_none());
        let oversized = vec![b' '; MAX_DATAGRAM_BYTES + 1];
        assert!(DiscoveryDatagram::decode(&oversized).is_none());
    }
}
