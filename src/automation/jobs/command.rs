//! Job handler that runs an external command.
//!
//! The command runs with the execution id in `SCHEDULER_EXECUTION_ID` and is
//! killed when the attempt is cancelled or abandoned.

use crate::automation::context::JobContext;
use crate::automation::job::JobHandler;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

pub const EXECUTION_ID_ENV: &str = "SCHEDULER_EXECUTION_ID";
pub const JOB_NAME_ENV: &str = "SCHEDULER_JOB_NAME";
pub const ATTEMPT_ENV: &str = "SCHEDULER_ATTEMPT";

/// Bytes of stderr kept in the failure message.
const STDERR_TAIL_BYTES: usize = 512;

#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Split a shell-style command line into program and arguments.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = shlex::split(command_line)
            .with_context(|| format!("Invalid command line: {}", command_line))?
            .into_iter();
        let program = parts.next().context("Command line is empty")?;
        Ok(Self::new(program, parts.collect()))
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn run(&self, ctx: JobContext) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(EXECUTION_ID_ENV, &ctx.execution_id)
            .env(JOB_NAME_ENV, &ctx.job_name)
            .env(ATTEMPT_ENV, ctx.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(
            "Running command for {}: {} {:?}",
            ctx.job_name, self.program, self.args
        );
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let stderr = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buffer).await;
            }
            buffer
        });

        let status = tokio::select! {
            status = child.wait() => status.with_context(|| format!("Failed to wait for {}", self.program))?,
            _ = ctx.cancellation_token.cancelled() => {
                let _ = child.kill().await;
                bail!("Command {} was cancelled", self.program);
            }
        };

        if status.success() {
            return Ok(());
        }

        let stderr = stderr_reader.await.unwrap_or_default();
        let tail = stderr_tail(&stderr);
        if tail.is_empty() {
            bail!("Command {} exited with {}", self.program, status);
        }
        bail!("Command {} exited with {}: {}", self.program, status, tail)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
