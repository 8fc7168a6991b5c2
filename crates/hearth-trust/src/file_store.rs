use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use hearth_core::{current_unix_timestamp_ms, short_hex_id, write_text_atomic};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::records::{
    PairingRecord, PairingRequest, PairingRequestStatus, TrustStore, TrustedHost,
};

const TRUST_SCHEMA_VERSION: u32 = 1;
pub const TRUSTED_HOSTS_FILE_NAME: &str = "trusted_hosts.json";
pub const PAIRINGS_FILE_NAME: &str = "pairings.json";
pub const PAIRING_REQUESTS_FILE_NAME: &str = "pairing_requests.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrustFile<T> {
    schema_version: u32,
    #[serde(default = "Vec::new")]
    records: Vec<T>,
}

/// JSON-file backed trust store rooted at `<data_dir>/security`.
#[derive(Debug)]
pub struct FileTrustStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTrustStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("security"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds or replaces a trusted host entry keyed by host id.
    pub fn upsert_trusted_host(&self, host: TrustedHost) -> Result<()> {
        let _guard = lock_or_recover(&self.write_lock);
        let path = self.root.join(TRUSTED_HOSTS_FILE_NAME);
        let mut hosts: Vec<TrustedHost> = load_records(&path)?;
        hosts.retain(|existing| existing.host_id != host.host_id);
        hosts.push(host);
        save_records(&path, &hosts)
    }
}

impl TrustStore for FileTrustStore {
    fn trusted_hosts(&self) -> Result<Vec<TrustedHost>> {
        load_records(&self.root.join(TRUSTED_HOSTS_FILE_NAME))
    }

    fn pairings(&self) -> Result<Vec<PairingRecord>> {
        load_records(&self.root.join(PAIRINGS_FILE_NAME))
    }

    fn pairing_requests(&self) -> Result<Vec<PairingRequest>> {
        load_records(&self.root.join(PAIRING_REQUESTS_FILE_NAME))
    }

    fn create_pairing_request(&self, host_id: &str, ip: Option<&str>) -> Result<PairingRequest> {
        let host_id = host_id.trim();
        if host_id.is_empty() {
            bail!("pairing request requires a host_id");
        }
        let _guard = lock_or_recover(&self.write_lock);
        let path = self.root.join(PAIRING_REQUESTS_FILE_NAME);
        let mut requests: Vec<PairingRequest> = load_records(&path)?;
        let request = PairingRequest {
            request_id: format!("pair-{}", short_hex_id()),
            host_id: host_id.to_string(),
            ip: ip.map(str::trim).filter(|ip| !ip.is_empty()).map(str::to_string),
            status: PairingRequestStatus::Pending,
            created_unix_ms: current_unix_timestamp_ms(),
        };
        requests.push(request.clone());
        save_records(&path, &requests)?;
        tracing::info!(
            request_id = %request.request_id,
            host_id = %request.host_id,
            "pairing request created"
        );
        Ok(request)
    }

    fn approve_pairing(&self, request_id: &str) -> Result<bool> {
        let _guard = lock_or_recover(&self.write_lock);
        let requests_path = self.root.join(PAIRING_REQUESTS_FILE_NAME);
        let mut requests: Vec<PairingRequest> = load_records(&requests_path)?;
        let Some(request) = requests
            .iter_mut()
            .find(|request| request.request_id == request_id.trim())
        else {
            return Ok(false);
        };
        if request.status == PairingRequestStatus::Approved {
            return Ok(true);
        }
        request.status = PairingRequestStatus::Approved;
        let record = PairingRecord {
            host_id: request.host_id.clone(),
            ip: request.ip.clone(),
            fingerprint: None,
            paired_at_unix_ms: current_unix_timestamp_ms(),
        };

        let pairings_path = self.root.join(PAIRINGS_FILE_NAME);
        let mut pairings: Vec<PairingRecord> = load_records(&pairings_path)?;
        pairings.retain(|existing| existing.host_id != record.host_id);
        pairings.push(record);
        save_records(&pairings_path, &pairings)?;
        save_records(&requests_path, &requests)?;
        tracing::info!(request_id, "pairing approved");
        Ok(true)
    }
}

fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trust file {}", path.display()))?;
    let parsed = serde_json::from_str::<TrustFile<T>>(&raw)
        .with_context(|| format!("failed to parse trust file {}", path.display()))?;
    if parsed.schema_version != TRUST_SCHEMA_VERSION {
        bail!(
            "unsupported trust schema_version {} in {} (expected {})",
            parsed.schema_version,
            path.display(),
            TRUST_SCHEMA_VERSION
        );
    }
    Ok(parsed.records)
}

fn save_records<T: Serialize + Clone>(path: &Path, records: &[T]) -> Result<()> {
    let file = TrustFile {
        schema_version: TRUST_SCHEMA_VERSION,
        records: records.to_vec(),
    };
    let mut payload = serde_json::to_string_pretty(&file).context("failed to encode trust file")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write trust file {}", path.display()))
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PairingStatus;

    #[test]
    fn functional_request_then_approve_creates_pairing_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTrustStore::for_data_dir(temp.path());

        let request = store
            .create_pairing_request("node-b", Some("192.168.1.20"))
            .expect("request");
        assert_eq!(request.status, PairingRequestStatus::Pending);
        assert_eq!(
            store.pairing_status("node-b").expect("status"),
            PairingStatus {
                paired: false,
                pending: true
            }
        );

        assert!(store.approve_pairing(&request.request_id).expect("approve"));
        let pairings = store.pairings().expect("pairings");
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].ip.as_deref(), Some("192.168.1.20"));
        assert_eq!(
            store.pairing_status("node-b").expect("status"),
            PairingStatus {
                paired: true,
                pending: false
            }
        );

        let snapshot = store.snapshot().expect("snapshot");
        assert!(snapshot.is_paired("other-id", "192.168.1.20"));
    }

    #[test]
    fn unit_approving_unknown_request_returns_false() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTrustStore::new(temp.path());
        assert!(!store.approve_pairing("pair-missing").expect("approve"));
        assert!(store.pairings().expect("pairings").is_empty());
    }

    #[test]
    fn regression_double_approve_does_not_duplicate_pairings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTrustStore::new(temp.path());
        let request = store.create_pairing_request("node-c", None).expect("request");
        assert!(store.approve_pairing(&request.request_id).expect("first"));
        assert!(store.approve_pairing(&request.request_id).expect("second"));
        assert_eq!(store.pairings().expect("pairings").len(), 1);
    }

    #[test]
    fn regression_unsupported_schema_version_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            temp.path().join(PAIRINGS_FILE_NAME),
            r#"{"schema_version":99,"records":[]}"#,
        )
        .expect("seed");
        let store = FileTrustStore::new(temp.path());
        let error = store.pairings().expect_err("schema mismatch");
        assert!(error.to_string().contains("unsupported trust schema_version"));
    }

    #[test]
    fn functional_upsert_trusted_host_replaces_by_host_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTrustStore::new(temp.path());
        for fingerprint in ["fp-1", "fp-2"] {
            store
                .upsert_trusted_host(TrustedHost {
                    host_id: "node-a".into(),
                    fingerprint: Some(fingerprint.into()),
                    ip: None,
                })
                .expect("upsert");
        }
        let hosts = store.trusted_hosts().expect("hosts");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].fingerprint.as_deref(), Some("fp-2"));
    }

    #[test]
    fn regression_blank_host_id_request_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileTrustStore::new(temp.path());
        assert!(store.create_pairing_request("  ", None).is_err());
    }
}
