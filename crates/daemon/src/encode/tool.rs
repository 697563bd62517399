//! Runs external media tools with an optional hard timeout.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};

/// Error type for launching or supervising an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    /// The process could not be started or waited on
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its time limit and was killed
    #[error("{program} timed out after {}s", limit.as_secs())]
    TimedOut { program: PathBuf, limit: Duration },
}

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// With `timeout` set, the child is killed once the limit passes and
/// `ToolError::TimedOut` is returned. Stdin is always closed.
pub async fn run_tool(mut cmd: Command, timeout: Option<Duration>) -> Result<Output, ToolError> {
    let program = PathBuf::from(cmd.as_std().get_program());
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| ToolError::Spawn {
        program: program.clone(),
        source,
    })?;

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output,
            // The elapsed future owned the child; dropping it killed the process
            Err(_) => return Err(ToolError::TimedOut { program, limit }),
        },
        None => child.wait_with_output().await,
    };
    output.map_err(|source| ToolError::Spawn { program, source })
}

/// Blocking form of [`run_tool`] for the synchronous probe and converter.
///
/// Runs on the ambient multi-threaded runtime when called from its blocking
/// pool, otherwise on a private current-thread runtime. Must not be called
/// from inside an async task.
pub fn run_tool_blocking(
    cmd: std::process::Command,
    timeout: Option<Duration>,
) -> Result<Output, ToolError> {
    let program = PathBuf::from(cmd.get_program());
    let run = run_tool(Command::from(cmd), timeout);

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => handle.block_on(run),
        _ => Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ToolError::Spawn { program, source })?
            .block_on(run),
    }
}

/// Convert a configured number of seconds into an optional limit (0 disables).
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
