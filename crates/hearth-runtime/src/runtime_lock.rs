use std::path::{Path, PathBuf};

use hearth_core::atomic_io::{is_already_exists, remove_if_unchanged};
use hearth_core::{
    is_pid_alive, utc_timestamp_rfc3339, write_text_exclusive, BootstrapError, BootstrapResult,
};
use serde::{Deserialize, Serialize};

pub const RUNTIME_LOCK_FILE_NAME: &str = "runtime.lock";
const ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLockRecord {
    pub pid: u32,
    pub started_at: String,
    pub backend_port: u16,
}

/// Singleton lock of a runtime directory, keyed on pid liveness.
///
/// Released explicitly or on drop; only the owning pid removes the file.
#[derive(Debug)]
pub struct RuntimeLock {
    path: PathBuf,
    record: RuntimeLockRecord,
    held: bool,
}

impl RuntimeLock {
    pub fn acquire(runtime_dir: &Path, backend_port: u16) -> BootstrapResult<Self> {
        Self::acquire_for(runtime_dir, std::process::id(), backend_port)
    }

    pub fn acquire_for(runtime_dir: &Path, pid: u32, backend_port: u16) -> BootstrapResult<Self> {
        let path = runtime_dir.join(RUNTIME_LOCK_FILE_NAME);
        let record = RuntimeLockRecord {
            pid,
            started_at: utc_timestamp_rfc3339(),
            backend_port,
        };
        let rendered = serde_json::to_string(&record)?;

        for _ in 0..ACQUIRE_ATTEMPTS {
            match write_text_exclusive(&path, &rendered) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), pid, "runtime lock acquired");
                    return Ok(Self {
                        path,
                        record,
                        held: true,
                    });
                }
                Err(error) if is_already_exists(&error) => {}
                Err(error) => return Err(error.into()),
            }

            let observed = match std::fs::read(&path) {
                Ok(observed) => observed,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            match serde_json::from_slice::<RuntimeLockRecord>(&observed).ok() {
                Some(owner) if owner.pid != pid && is_pid_alive(owner.pid) => {
                    return Err(BootstrapError::Collision(format!(
                        "Runtime already running (pid={})",
                        owner.pid
                    )));
                }
                owner => reclaim_stale_lock(&path, &observed, owner.map(|record| record.pid))?,
            }
        }
        Err(BootstrapError::Collision(format!(
            "runtime lock {} is contended",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &RuntimeLockRecord {
        &self.record
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Removes the lock file if it still names this owner. Idempotent.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if read_lock_record(&self.path).map(|owner| owner.pid) != Some(self.record.pid) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "runtime lock released"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to remove runtime lock");
            }
        }
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Removes a lock judged stale, unless it changed since it was read.
fn reclaim_stale_lock(path: &Path, observed: &[u8], owner_pid: Option<u32>) -> BootstrapResult<()> {
    if remove_if_unchanged(path, observed)? {
        tracing::warn!(path = %path.display(), ?owner_pid, "reclaimed stale runtime lock");
    } else {
        tracing::debug!(path = %path.display(), "runtime lock changed before reclaim; retrying");
    }
    Ok(())
}

/// Unreadable or malformed lock files read as `None` and are reclaimed.
pub fn read_lock_record(path: &Path) -> Option<RuntimeLockRecord> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}
