//! Database engine process supervision.
//!
//! The supervisor owns the sole in-memory mapping from branch name to live
//! engine handle; it is authoritative for "is this branch's engine running"
//! and the table is mutated only through [`ProcessSupervisor::start`] and
//! [`ProcessSupervisor::stop`]. Callers use it to order stop-before-unmount.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("an engine is already registered for branch '{0}'")]
    AlreadyRunning(String),

    #[error("failed to launch engine for branch '{branch}': {source}")]
    Spawn {
        branch: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine for branch '{branch}' did not accept connections on port {port} in time")]
    ReadinessTimeout { branch: String, port: u16 },

    #[error("no running engine for branch '{0}'")]
    NotRunning(String),

    #[error("failed waiting for engine of branch '{branch}': {source}")]
    Wait {
        branch: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the engine bound to `mount_path` and the loopback `port`,
    /// forward its output to the service log, and wait (bounded) until it
    /// accepts connections before registering the handle under `branch`.
    async fn start(&self, branch: &str, mount_path: &Path, port: u16)
    -> Result<(), SupervisorError>;

    /// Deregister the handle, terminate gracefully, and wait for exit with a
    /// bounded timeout, escalating to a forced kill on expiry.
    async fn stop(&self, branch: &str) -> Result<(), SupervisorError>;

    async fn is_running(&self, branch: &str) -> bool;
}

struct EngineHandle {
    child: Child,
    port: u16,
}

/// Supervises mysqld instances, one per branch.
pub struct EngineSupervisor {
    engine: EngineConfig,
    handles: Mutex<HashMap<String, EngineHandle>>,
}

impl EngineSupervisor {
    pub fn new(engine: EngineConfig) -> Self {
        Self { engine, handles: Mutex::new(HashMap::new()) }
    }

    fn engine_command(&self, mount_path: &Path, port: u16) -> Command {
        let mut cmd = Command::new(&self.engine.binary);
        cmd.arg(format!("--defaults-file={}", mount_path.join("conf/my.cnf").display()))
            .arg(format!("--datadir={}", mount_path.join("data").display()))
            .arg(format!("--pid-file={}", mount_path.join("var/mysqld.pid").display()))
            .arg(format!("--socket={}", mount_path.join("var/mysqld.sock").display()))
            .arg(format!(
                "--secure-file-priv={}",
                mount_path.join("var/lib/mysql-files").display()
            ))
            .arg(format!("--port={port}"))
            .arg(format!("--log-error={}", mount_path.join("logs/error.log").display()))
            .arg(format!("--log-bin={}", mount_path.join("var/mysql-bin.log").display()))
            .arg(format!(
                "--slow-query-log-file={}",
                mount_path.join("logs/slow_query.log").display()
            ))
            .arg(format!(
                "--general-log-file={}",
                mount_path.join("logs/query.log").display()
            ))
            .arg(format!("--user={}", self.engine.user))
            .arg(format!("--bind-address={}", self.engine.bind_address))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl ProcessSupervisor for EngineSupervisor {
    async fn start(
        &self,
        branch: &str,
        mount_path: &Path,
        port: u16,
    ) -> Result<(), SupervisorError> {
        let mut handles = self.handles.lock().await;

        if handles.contains_key(branch) {
            return Err(SupervisorError::AlreadyRunning(branch.to_string()));
        }

        let mut child = self
            .engine_command(mount_path, port)
            .spawn()
            .map_err(|source| SupervisorError::Spawn { branch: branch.to_string(), source })?;

        forward_output(branch, child.stdout.take(), child.stderr.take());

        let timeout = Duration::from_secs(self.engine.readiness_timeout_secs);
        if !wait_ready(port, timeout).await {
            // Don't leave a half-started engine behind.
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(SupervisorError::ReadinessTimeout { branch: branch.to_string(), port });
        }

        info!(
            branch = %branch,
            port,
            mount_path = %mount_path.display(),
            "engine started"
        );

        handles.insert(branch.to_string(), EngineHandle { child, port });

        Ok(())
    }

    async fn stop(&self, branch: &str) -> Result<(), SupervisorError> {
        let mut handle = {
            let mut handles = self.handles.lock().await;
            handles.remove(branch).ok_or_else(|| SupervisorError::NotRunning(branch.to_string()))?
            // The registry lock is released here; the wait below must not hold it.
        };

        if let Some(pid) = handle.child.id() {
            // ESRCH just means the engine beat us to exiting.
            if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(branch = %branch, %err, "SIGTERM not delivered");
            }
        }

        let timeout = Duration::from_secs(self.engine.stop_timeout_secs);
        match tokio::time::timeout(timeout, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!(branch = %branch, port = handle.port, %status, "engine stopped");
            }
            Ok(Err(source)) => {
                return Err(SupervisorError::Wait { branch: branch.to_string(), source });
            }
            Err(_) => {
                warn!(branch = %branch, "engine did not exit after SIGTERM, killing");
                handle
                    .child
                    .kill()
                    .await
                    .map_err(|source| SupervisorError::Wait { branch: branch.to_string(), source })?;
            }
        }

        Ok(())
    }

    async fn is_running(&self, branch: &str) -> bool {
        self.handles.lock().await.contains_key(branch)
    }
}

/// Forward engine output line-by-line into the service log, tagged with the
/// branch name, mirroring where the engine would otherwise write to a tty.
fn forward_output(branch: &str, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
    if let Some(stdout) = stdout {
        let branch = branch.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(branch = %branch, "{line}");
            }
        });
    }

    if let Some(stderr) = stderr {
        let branch = branch.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(branch = %branch, "{line}");
            }
        });
    }
}

/// Probe the loopback port until it accepts a TCP connection or the timeout
/// expires.
async fn wait_ready(port: u16, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
