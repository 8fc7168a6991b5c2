use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustedHost {
    pub host_id: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingRecord {
    pub host_id: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub paired_at_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PairingRequestStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingRequest {
    pub request_id: String,
    pub host_id: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub status: PairingRequestStatus,
    pub created_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingStatus {
    pub paired: bool,
    pub pending: bool,
}

/// Immutable view of trust state taken once per discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustSnapshot {
    trusted: BTreeMap<String, TrustedHost>,
    paired_host_ids: BTreeSet<String>,
    paired_ips: BTreeSet<String>,
    pending_host_ids: BTreeSet<String>,
}

impl TrustSnapshot {
    pub fn new(
        trusted_hosts: Vec<TrustedHost>,
        pairings: Vec<PairingRecord>,
        pending: Vec<PairingRequest>,
    ) -> Self {
        let mut snapshot = Self::default();
        for host in trusted_hosts {
            snapshot.trusted.insert(host.host_id.clone(), host);
        }
        for pairing in pairings {
            snapshot.paired_host_ids.insert(pairing.host_id);
            if let Some(ip) = pairing.ip.filter(|ip| !ip.trim().is_empty()) {
                snapshot.paired_ips.insert(ip);
            }
        }
        for request in pending {
            if request.status == PairingRequestStatus::Pending {
                snapshot.pending_host_ids.insert(request.host_id);
            }
        }
        snapshot
    }

    /// Any match on trusted host id, pairing host id, or pairing ip counts.
    pub fn is_paired(&self, host_id: &str, ip: &str) -> bool {
        self.trusted.contains_key(host_id)
            || self.paired_host_ids.contains(host_id)
            || self.paired_ips.contains(ip)
    }

    pub fn is_pending(&self, host_id: &str) -> bool {
        self.pending_host_ids.contains(host_id)
    }

    pub fn fingerprint(&self, host_id: &str) -> Option<&str> {
        self.trusted
            .get(host_id)
            .and_then(|host| host.fingerprint.as_deref())
    }

    /// Every known ip of a trusted or paired host.
    pub fn known_ips(&self) -> BTreeSet<String> {
        let mut ips = self.paired_ips.clone();
        ips.extend(self.trusted.values().filter_map(|host| host.ip.clone()));
        ips
    }
}

/// Storage of trusted hosts, pairings, and pending pairing requests.
pub trait TrustStore: Send + Sync {
    fn trusted_hosts(&self) -> Result<Vec<TrustedHost>>;
    fn pairings(&self) -> Result<Vec<PairingRecord>>;
    fn pairing_requests(&self) -> Result<Vec<PairingRequest>>;
    fn create_pairing_request(&self, host_id: &str, ip: Option<&str>) -> Result<PairingRequest>;
    /// Approves `request_id`; returns false when it is unknown.
    fn approve_pairing(&self, request_id: &str) -> Result<bool>;

    fn snapshot(&self) -> Result<TrustSnapshot> {
        Ok(TrustSnapshot::new(
            self.trusted_hosts()?,
            self.pairings()?,
            self.pairing_requests()?,
        ))
    }

    fn pairing_status(&self, host_id: &str) -> Result<PairingStatus> {
        let host_id = host_id.trim();
        let paired = !host_id.is_empty()
            && (self
                .trusted_hosts()?
                .iter()
                .any(|host| host.host_id == host_id)
                || self.pairings()?.iter().any(|record| record.host_id == host_id));
        let pending = !host_id.is_empty()
            && self.pairing_requests()?.iter().any(|request| {
                request.host_id == host_id && request.status == PairingRequestStatus::Pending
            });
        Ok(PairingStatus { paired, pending })
    }
}
