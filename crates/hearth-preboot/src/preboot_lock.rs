use std::path::{Path, PathBuf};

use hearth_core::atomic_io::{is_already_exists, remove_if_unchanged};
use hearth_core::{is_pid_alive, write_text_exclusive, BootstrapError, BootstrapResult};

const ACQUIRE_ATTEMPTS: usize = 3;

/// Singleton guard for the preboot process: a file holding the owner's bare
/// pid. Released on drop.
#[derive(Debug)]
pub struct PrebootLock {
    path: PathBuf,
    pid: u32,
}

impl PrebootLock {
    /// Takes the lock for the current process. A lock left by a dead or
    /// unreadable owner is reclaimed; a live owner is a collision.
    pub fn acquire(path: &Path) -> BootstrapResult<Self> {
        Self::acquire_for(path, std::process::id())
    }

    pub fn acquire_for(path: &Path, pid: u32) -> BootstrapResult<Self> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        for _ in 0..ACQUIRE_ATTEMPTS {
            match write_text_exclusive(path, &pid.to_string()) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), pid, "preboot lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                    });
                }
                Err(error) if is_already_exists(&error) => {}
                Err(error) => return Err(error.into()),
            }

            let observed = match std::fs::read(path) {
                Ok(observed) => observed,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            match parse_owner(&observed) {
                Some(owner) if owner != pid && is_pid_alive(owner) => {
                    return Err(BootstrapError::Collision(format!(
                        "Preboot already running (pid={owner})"
                    )));
                }
                owner => {
                    if remove_if_unchanged(path, &observed)? {
                        tracing::warn!(path = %path.display(), ?owner, "reclaimed stale preboot lock");
                    }
                }
            }
        }
        Err(BootstrapError::Collision(format!(
            "preboot lock {} is contended",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {}
}

impl Drop for PrebootLock {
    fn drop(&mut self) {
        if read_owner(&self.path) == Some(self.pid) {
            if let Err(error) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), %error, "failed to remove preboot lock");
            }
        }
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read(path).ok().and_then(|raw| parse_owner(&raw))
}

fn parse_owner(raw: &[u8]) -> Option<u32> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}
