use std::io;

/// Returns true when a process with `pid` exists.
///
/// Uses `kill(pid, 0)`; `EPERM` counts as alive so a lock held by another
/// user's process is never treated as stale.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs only the existence and permission check.
        let result = unsafe { libc::kill(pid_i32, 0) };
        if result == 0 {
            return true;
        }
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        errno == libc::EPERM
    }
    #[cfg(not(unix))]
    {
        let _ = pid_i32;
        true
    }
}

/// Asks `pid` to terminate with SIGTERM. Missing processes are not an error.
pub fn request_terminate(pid: u32) -> io::Result<()> {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return Ok(());
    };
    if pid_i32 <= 0 {
        return Ok(());
    }
    #[cfg(unix)]
    {
        // SAFETY: pid is a positive process id; SIGTERM has no memory effects here.
        let result = unsafe { libc::kill(pid_i32, libc::SIGTERM) };
        if result == 0 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(error)
    }
    #[cfg(not(unix))]
    {
        Ok(())
    }
}
