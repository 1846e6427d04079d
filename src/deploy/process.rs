//! Service process launching and teardown

use crate::core::SecretEnv;
use crate::deploy::{DeployError, Diagnostics, ServiceSpec};
use crate::shell::ShellCommand;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const LOG_TAIL_LINES: usize = 200;

/// A running service
#[async_trait]
pub trait ServiceProcess: Send {
    /// OS process id, if known
    fn id(&self) -> Option<u32>;

    /// Terminate the service and wait for it; a no-op if it already exited
    async fn stop(&mut self) -> Result<(), DeployError>;

    /// Capture the service log and a process listing
    async fn diagnostics(&mut self) -> Diagnostics;

    /// Best-effort synchronous kill, used when a deployment is dropped
    fn kill_now(&mut self);
}

/// Starts service processes
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    async fn launch(&self, spec: &ServiceSpec) -> Result<Box<dyn ServiceProcess>, DeployError>;
}

/// Launches the service command through `sh -c` in its own process group
///
/// Output goes to the service log file. Stopping signals the whole group so
/// servers that fork workers are torn down too.
#[derive(Debug, Clone)]
pub struct ShellServiceLauncher {
    secrets: SecretEnv,
    grace_period: Duration,
}

impl ShellServiceLauncher {
    pub fn new(secrets: SecretEnv) -> Self {
        Self {
            secrets,
            grace_period: Duration::from_secs(10),
        }
    }

    /// Time allowed between SIGTERM and SIGKILL
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

#[async_trait]
impl ServiceLauncher for ShellServiceLauncher {
    async fn launch(&self, spec: &ServiceSpec) -> Result<Box<dyn ServiceProcess>, DeployError> {
        if let Some(parent) = spec.log_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DeployError::Launch(format!("log directory: {}", e)))?;
            }
        }
        let log = std::fs::File::create(&spec.log_file)
            .map_err(|e| DeployError::Launch(format!("{}: {}", spec.log_file.display(), e)))?;
        let log_err = log
            .try_clone()
            .map_err(|e| DeployError::Launch(e.to_string()))?;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&spec.command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        self.secrets.apply(&mut command);

        let child = command
            .spawn()
            .map_err(|e| DeployError::Launch(format!("'{}': {}", spec.command, e)))?;
        let pid = child.id();
        info!(
            "Started service {} (pid {:?}), logging to {}",
            spec.name,
            pid,
            spec.log_file.display()
        );

        Ok(Box::new(ShellServiceProcess {
            child,
            pid,
            log_file: spec.log_file.clone(),
            grace_period: self.grace_period,
        }))
    }
}

struct ShellServiceProcess {
    child: Child,
    pid: Option<u32>,
    log_file: PathBuf,
    grace_period: Duration,
}

impl ShellServiceProcess {
    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    async fn signal_group(&self, signal: &str) {
        if let Some(pid) = self.pid {
            let result = ShellCommand::shell(&format!("kill {} -- -{}", signal, pid))
                .timeout_secs(5)
                .output()
                .await;
            if let Err(e) = result {
                debug!("kill {} -{} failed: {}", signal, pid, e);
            }
        }
    }
}

#[async_trait]
impl ServiceProcess for ShellServiceProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn stop(&mut self) -> Result<(), DeployError> {
        if self.has_exited() {
            // The leader is reaped, so only signal a group that still has members
            if self.pid.map(group_alive).unwrap_or(false) {
                debug!("Service pid {:?} exited, killing leftover workers", self.pid);
                self.signal_group("-KILL").await;
            } else {
                debug!("Service pid {:?} already exited", self.pid);
            }
            return Ok(());
        }

        self.signal_group("-TERM").await;
        match tokio::time::timeout(self.grace_period, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Service pid {:?} exited with {}", self.pid, status);
                Ok(())
            }
            Ok(Err(e)) => Err(DeployError::Stop(e.to_string())),
            Err(_) => {
                warn!(
                    "Service pid {:?} ignored SIGTERM for {:?}, killing",
                    self.pid, self.grace_period
                );
                self.signal_group("-KILL").await;
                self.child
                    .kill()
                    .await
                    .map_err(|e| DeployError::Stop(e.to_string()))
            }
        }
    }

    async fn diagnostics(&mut self) -> Diagnostics {
        let service_log = match tokio::fs::read_to_string(&self.log_file).await {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(LOG_TAIL_LINES);
                lines[start..].join("\n")
            }
            Err(e) => format!("<unable to read {}: {}>", self.log_file.display(), e),
        };

        let process_listing = match ShellCommand::program("ps").arg("aux").timeout_secs(10).output().await {
            Ok(output) => output.stdout,
            Err(e) => format!("<ps failed: {}>", e),
        };

        Diagnostics {
            service_log,
            process_listing,
        }
    }

    fn kill_now(&mut self) {
        let exited = self.has_exited();
        if let Some(pid) = self.pid.filter(|pid| !exited || group_alive(*pid)) {
            let _ = std::process::Command::new("sh")
                .arg("-c")
                .arg(format!("kill -KILL -- -{}", pid))
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        let _ = self.child.start_kill();
    }
}

/// Whether any process is still in the group led by `pid`
fn group_alive(pid: u32) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 -- -{}", pid))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
