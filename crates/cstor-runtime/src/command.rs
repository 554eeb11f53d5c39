use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Executes external tools on behalf of the pool layer
///
/// This is the only place the agent touches the operating system. Pool
/// operations go through it so tests can swap in `ScriptedRunner` and never
/// spawn a process or need real block devices.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return stdout followed by stderr.
    ///
    /// A non-zero exit is an error carrying the captured output.
    async fn run_combined_output(&self, program: &str, args: &[&str]) -> Result<Vec<u8>>;

    /// Run to completion, draining stdout as it is produced, and return it.
    ///
    /// Spawn failures, read failures, wait failures and non-zero exits are
    /// all errors; an empty `Ok` means the tool really printed nothing.
    async fn run_stdout_pipe(&self, program: &str, args: &[&str]) -> Result<Vec<u8>>;
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Runs real processes via `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every invocation; a command running longer is killed and
    /// reported as `CommandTimedOut`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Per-invocation bound, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn bounded<F, T>(&self, command: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| RuntimeError::command_timed_out(command, limit.as_secs())),
            None => Ok(fut.await),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run_combined_output(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        let cmd = command_line(program, args);
        debug!("Executing: {}", cmd);

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = self
            .bounded(&cmd, command.output())
            .await?
            .map_err(|e| RuntimeError::command_start_failed(&cmd, e.to_string()))?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        let exit_code = output.status.code().unwrap_or(-1);
        debug!("Command exited with code {}: {}", exit_code, cmd);

        if !output.status.success() {
            return Err(RuntimeError::command_failed(
                cmd,
                exit_code,
                String::from_utf8_lossy(&combined),
            ));
        }

        Ok(combined)
    }

    async fn run_stdout_pipe(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        let cmd = command_line(program, args);
        debug!("Executing (piped): {}", cmd);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::command_start_failed(&cmd, e.to_string()))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::command_start_failed(&cmd, "stdout was not piped"))?;

        let drain = async {
            let mut data = Vec::new();
            stdout
                .read_to_end(&mut data)
                .await
                .map_err(|e| RuntimeError::output_read_failed(&cmd, e.to_string()))?;
            let status = child.wait().await.map_err(|e| {
                RuntimeError::command_start_failed(&cmd, format!("wait failed: {}", e))
            })?;
            Ok::<_, RuntimeError>((data, status))
        };

        let (data, status) = self.bounded(&cmd, drain).await??;

        let exit_code = status.code().unwrap_or(-1);
        debug!("Command exited with code {}: {}", exit_code, cmd);

        if !status.success() {
            return Err(RuntimeError::command_failed(
                cmd,
                exit_code,
                String::from_utf8_lossy(&data),
            ));
        }

        Ok(data)
    }
}
