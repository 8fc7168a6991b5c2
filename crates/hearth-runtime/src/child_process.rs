use std::fs::OpenOptions;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use hearth_core::config::CommandConfig;
use hearth_core::process_liveness::request_terminate;
use hearth_core::{BootstrapError, BootstrapResult, LaunchContext};

const TERMINATE_GRACE: Duration = Duration::from_secs(3);
const TERMINATE_POLL: Duration = Duration::from_millis(50);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// A child program started by the runtime controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Appends stdout and stderr here when set.
    pub log_path: Option<PathBuf>,
}

impl ChildCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Spawns without waiting, carrying the launch markers in the child's
    /// environment.
    pub fn spawn(&self, component: &str, context: &LaunchContext) -> BootstrapResult<ManagedChild> {
        if self.program.trim().is_empty() {
            return Err(BootstrapError::spawn(
                component,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "no program configured"),
            ));
        }
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        for (key, value) in context.env_vars() {
            command.env(key, value);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(log_path) = &self.log_path {
            let open_log = || {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)
                    .map_err(|error| BootstrapError::spawn(component, error))
            };
            command.stdout(Stdio::from(open_log()?));
            command.stderr(Stdio::from(open_log()?));
        }
        let child = command
            .spawn()
            .map_err(|error| BootstrapError::spawn(component, error))?;
        tracing::info!(component, pid = child.id(), program = %self.program, "child process started");
        Ok(ManagedChild {
            component: component.to_string(),
            child,
        })
    }
}

impl From<&CommandConfig> for ChildCommand {
    fn from(config: &CommandConfig) -> Self {
        Self::new(config.program.clone()).with_args(config.args.iter().cloned())
    }
}

/// Handle kept only for later termination; never awaited during startup.
#[derive(Debug)]
pub struct ManagedChild {
    component: String,
    child: Child,
}

impl ManagedChild {
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, a short grace period, then SIGKILL. Errors are logged only.
    pub fn terminate(&mut self) {
        if !self.is_running() {
            return;
        }
        let pid = self.pid();
        if let Err(error) = request_terminate(pid) {
            tracing::warn!(component = %self.component, pid, %error, "failed to signal child");
        }
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if !self.is_running() {
                tracing::info!(component = %self.component, pid, "child process stopped");
                return;
            }
            std::thread::sleep(TERMINATE_POLL);
        }
        tracing::warn!(component = %self.component, pid, "child ignored SIGTERM; killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// True when nothing accepts connections on `127.0.0.1:port`.
pub fn port_is_free(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_err()
}
