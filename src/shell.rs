//! Subprocess helpers shared by steps, provisioning and tool clients

use crate::core::SecretEnv;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Errors launching or waiting on a subprocess
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("timed out after {0} seconds")]
    Timeout(u64),
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Last `max_lines` lines of stdout followed by stderr
    pub fn tail(&self, max_lines: usize) -> String {
        let combined = format!("{}{}", self.stdout, self.stderr);
        let lines: Vec<&str> = combined.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Builder for a subprocess invocation
#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    secrets: SecretEnv,
    timeout_secs: Option<u64>,
}

impl ShellCommand {
    /// Run `program` directly with arguments
    pub fn program(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            secrets: SecretEnv::default(),
            timeout_secs: None,
        }
    }

    /// Run a command line through `sh -c`
    pub fn shell(command_line: &str) -> Self {
        Self::program("sh").arg("-c").arg(command_line)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn secrets(mut self, secrets: &SecretEnv) -> Self {
        self.secrets = secrets.clone();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        self.secrets.apply(&mut command);
        command
    }

    /// Run to completion and capture its output
    ///
    /// A non-zero exit is not an error here; callers inspect `code`. The
    /// command leads its own process group, and a timeout kills the whole
    /// group so nothing it started keeps running.
    pub async fn output(&self) -> Result<CommandOutput, ShellError> {
        debug!("Spawning {} with {} args", self.program, self.args.len());

        let mut child = self.build().spawn().map_err(|e| ShellError::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            status.map(|status| (status, stdout, stderr))
        };
        let waited = match self.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), collect)
                .await
                .map_err(|_| secs),
            None => Ok(collect.await),
        };

        let result = match waited {
            Ok(result) => result,
            Err(secs) => {
                warn!("{} timed out after {}s, killing its process group", self.program, secs);
                kill_group(&mut child).await;
                return Err(ShellError::Timeout(secs));
            }
        };

        let (status, stdout, stderr) = result.map_err(|e| ShellError::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Reading subprocess output failed: {}", e);
        }
    }
    buf
}

/// SIGKILL every process in the child's group, then reap the child
///
/// The child is still unreaped here, so its pid cannot have been reused as
/// a group id.
async fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let result = Command::new("sh")
            .arg("-c")
            .arg(format!("kill -KILL -- -{}", pid))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!("kill -KILL -{} failed: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Reaping timed-out child failed: {}", e);
    }
}
