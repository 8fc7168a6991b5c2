use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

use crate::time_utils::utc_timestamp_rfc3339;

const DEFAULT_LOG_ROTATION_MAX_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_LOG_ROTATION_MAX_FILES: usize = 3;
pub const LIFECYCLE_EVENTS_FILE_NAME: &str = "lifecycle-events.jsonl";
pub const LIFECYCLE_EVENT_SCHEMA_VERSION: u32 = 1;

/// Configuration for size-based log rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_LOG_ROTATION_MAX_BYTES,
            max_files: DEFAULT_LOG_ROTATION_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Build policy from `HEARTH_LOG_ROTATION_*` env vars with safe defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build policy from an arbitrary key lookup; invalid or zero values fall back.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_bytes = lookup("HEARTH_LOG_ROTATION_MAX_BYTES")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_LOG_ROTATION_MAX_BYTES);
        let max_files = lookup("HEARTH_LOG_ROTATION_MAX_FILES")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_LOG_ROTATION_MAX_FILES);
        Self {
            max_bytes,
            max_files,
        }
    }

    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

/// Append one NDJSON line to `path`, applying size-based rotation policy.
pub fn append_line_with_rotation(path: &Path, line: &str, policy: LogRotationPolicy) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    if policy.is_enabled() && path.exists() {
        let current_size = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let incoming_size = line.len().saturating_add(1).try_into().unwrap_or(u64::MAX);
        if current_size.saturating_add(incoming_size) > policy.max_bytes {
            rotate_log_file(path, policy)?;
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn rotated_backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), index))
}

fn rotate_log_file(path: &Path, policy: LogRotationPolicy) -> Result<()> {
    if !path.exists() || !policy.is_enabled() {
        return Ok(());
    }
    if policy.max_files <= 1 {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to rotate {}", path.display()))?;
        return Ok(());
    }

    let max_backup_index = policy.max_files.saturating_sub(1);
    for index in (1..=max_backup_index).rev() {
        let source = if index == 1 {
            path.to_path_buf()
        } else {
            rotated_backup_path(path, index.saturating_sub(1))
        };
        if !source.exists() {
            continue;
        }
        let destination = rotated_backup_path(path, index);
        if destination.exists() {
            std::fs::remove_file(&destination).with_context(|| {
                format!("failed to replace rotated log {}", destination.display())
            })?;
        }
        std::fs::rename(&source, &destination).with_context(|| {
            format!(
                "failed to rotate {} to {}",
                source.display(),
                destination.display()
            )
        })?;
    }
    Ok(())
}

/// Append-only NDJSON record of bootstrap events kept inside a runtime directory.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    policy: LogRotationPolicy,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, policy: LogRotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    /// Event log at `<runtime_dir>/lifecycle-events.jsonl`.
    pub fn in_runtime_dir(runtime_dir: &Path, policy: LogRotationPolicy) -> Self {
        Self::new(runtime_dir.join(LIFECYCLE_EVENTS_FILE_NAME), policy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `event` with a structured `details` payload.
    ///
    /// Write failures are logged and swallowed; the event log never fails the
    /// operation it describes.
    pub fn record(&self, event: &str, details: impl Serialize) {
        let details = serde_json::to_value(details).unwrap_or(Value::Null);
        let line = json!({
            "schema_version": LIFECYCLE_EVENT_SCHEMA_VERSION,
            "timestamp": utc_timestamp_rfc3339(),
            "event": event,
            "details": details,
        });
        if let Err(error) = append_line_with_rotation(&self.path, &line.to_string(), self.policy) {
            tracing::warn!(path = %self.path.display(), %error, "failed to append lifecycle event");
        }
    }

    /// Reads back every parseable record, skipping malformed lines.
    pub fn read_records(&self) -> Vec<Value> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use serde_json::{json, Value};

    use super::{rotated_backup_path, EventLog, LogRotationPolicy, LIFECYCLE_EVENTS_FILE_NAME};

    /// Every lifecycle record is larger than this, so each append after the
    /// first rotates.
    const ONE_RECORD_PER_FILE: u64 = 64;

    fn transition_seqs(path: &Path) -> Vec<u64> {
        EventLog::new(path, LogRotationPolicy::default())
            .read_records()
            .iter()
            .filter_map(|record| record["details"]["seq"].as_u64())
            .collect()
    }

    fn record_transitions(log: &EventLog, count: u64) {
        for seq in 1..=count {
            log.record("lifecycle_transition", json!({"seq": seq, "to": "RUNNING"}));
        }
    }

    #[test]
    fn functional_lifecycle_log_shifts_older_records_into_numbered_backups() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::in_runtime_dir(
            temp.path(),
            LogRotationPolicy {
                max_bytes: ONE_RECORD_PER_FILE,
                max_files: 3,
            },
        );
        record_transitions(&log, 5);

        assert_eq!(log.path(), temp.path().join(LIFECYCLE_EVENTS_FILE_NAME));
        assert_eq!(transition_seqs(log.path()), vec![5]);
        assert_eq!(transition_seqs(&rotated_backup_path(log.path(), 1)), vec![4]);
        assert_eq!(transition_seqs(&rotated_backup_path(log.path(), 2)), vec![3]);
        assert!(!rotated_backup_path(log.path(), 3).exists());
    }

    #[test]
    fn regression_single_file_policy_keeps_only_latest_lifecycle_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::in_runtime_dir(
            temp.path(),
            LogRotationPolicy {
                max_bytes: ONE_RECORD_PER_FILE,
                max_files: 1,
            },
        );
        record_transitions(&log, 3);

        assert_eq!(transition_seqs(log.path()), vec![3]);
        assert!(!rotated_backup_path(log.path(), 1).exists());
    }

    #[test]
    fn functional_records_accumulate_below_size_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::in_runtime_dir(temp.path(), LogRotationPolicy::default());
        record_transitions(&log, 4);

        assert_eq!(transition_seqs(log.path()), vec![1, 2, 3, 4]);
        assert!(!rotated_backup_path(log.path(), 1).exists());
    }

    #[test]
    fn unit_rotation_policy_lookup_trims_and_rejects_zero_or_garbage() {
        let configured = HashMap::from([
            ("HEARTH_LOG_ROTATION_MAX_BYTES", " 2048 "),
            ("HEARTH_LOG_ROTATION_MAX_FILES", "5"),
        ]);
        let policy =
            LogRotationPolicy::from_lookup(|key| configured.get(key).map(|v| v.to_string()));
        assert_eq!(
            policy,
            LogRotationPolicy {
                max_bytes: 2048,
                max_files: 5,
            }
        );
        assert!(policy.is_enabled());

        let broken = HashMap::from([
            ("HEARTH_LOG_ROTATION_MAX_BYTES", "0"),
            ("HEARTH_LOG_ROTATION_MAX_FILES", "many"),
        ]);
        let policy = LogRotationPolicy::from_lookup(|key| broken.get(key).map(|v| v.to_string()));
        assert_eq!(policy, LogRotationPolicy::default());
        assert_eq!(LogRotationPolicy::from_lookup(|_| None), LogRotationPolicy::default());
    }

    #[test]
    fn functional_event_log_records_structured_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::in_runtime_dir(temp.path(), LogRotationPolicy::default());
        log.record("decision_committed", json!({"mode": "local"}));
        log.record("lifecycle_transition", json!({"from": "INIT", "to": "TOPOLOGY_LOADED"}));

        let records = log.read_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["event"], "decision_committed");
        assert_eq!(records[0]["schema_version"], 1);
        assert!(records[0]["timestamp"].as_str().is_some_and(|ts| ts.ends_with('Z')));
        assert_eq!(records[1]["details"]["to"], "TOPOLOGY_LOADED");
    }

    #[test]
    fn regression_event_log_read_skips_malformed_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::in_runtime_dir(temp.path(), LogRotationPolicy::default());
        std::fs::write(log.path(), "{not json}\n\n{\"event\":\"ok\"}\n").expect("seed");
        let records: Vec<Value> = log.read_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["event"], "ok");
    }

    #[test]
    fn regression_unwritable_log_path_does_not_fail_recording() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(temp.path(), LogRotationPolicy::default());
        log.record("decision_committed", json!({"mode": "remote"}));
        assert!(temp.path().is_dir());
    }
}
