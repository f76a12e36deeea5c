//! External command execution
//!
//! Thin wrapper around `tokio::process::Command` shared by the terraform,
//! docker and kubectl adapters. Children are killed when the future is
//! dropped, so a stage timeout or cancellation never leaves a tool running.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ToolError};

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command to completion and captures its output
///
/// A non-zero exit code is not an error here; see [`run_checked`].
pub async fn run(
    tool: &str,
    args: &[String],
    stdin: Option<&str>,
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    debug!("Running {} {:?}", tool, args);

    let mut command = Command::new(tool);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    if stdin.is_some() {
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::null());
    }

    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }
    }

    let output = child.wait_with_output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    if !stdout.trim().is_empty() {
        debug!("{} stdout: {}", tool, stdout.trim());
    }
    if !stderr.trim().is_empty() {
        debug!("{} stderr: {}", tool, stderr.trim());
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

/// Runs a command and converts a non-zero exit into a classified error
pub async fn run_checked(
    tool: &str,
    args: &[String],
    stdin: Option<&str>,
    cwd: Option<&Path>,
) -> Result<CommandOutput> {
    let output = run(tool, args, stdin, cwd).await?;

    if !output.success() {
        return Err(ToolError::from_command_failure(
            tool,
            output.exit_code,
            &output.stderr,
        ));
    }

    Ok(output)
}

/// Converts `&str` argument lists into owned strings
pub(crate) fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
