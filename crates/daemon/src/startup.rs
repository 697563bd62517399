//! Startup checks module
//!
//! Preflight checks run once before the first cycle:
//! - ffmpeg and ffprobe can be executed
//! - the configured video encoder is compiled into ffmpeg

use crate::config::Config;
use crate::encode::{run_tool, timeout_from_secs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{program} not available: {reason}")]
    ToolUnavailable { program: String, reason: String },

    #[error("Encoder '{0}' is not supported by this ffmpeg build (see `ffmpeg -encoders`)")]
    EncoderMissing(String),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
///
/// Git snapshots ("N-112345-g...") have no major version and yield `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(['.', '-']).next()?;
    major_str.parse().ok()
}

/// Whether `ffmpeg -encoders` output lists an encoder named `name`
///
/// Entries follow the dashed separator line as `<flags> <name> <description>`.
pub fn encoder_listed(encoders_output: &str, name: &str) -> bool {
    encoders_output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|encoder| encoder == name)
}

/// Run `program args...` and return its stdout, failing on non-zero exit
async fn tool_output(
    program: &Path,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<String, StartupError> {
    let unavailable = |reason: String| StartupError::ToolUnavailable {
        program: program.display().to_string(),
        reason,
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = run_tool(cmd, timeout)
        .await
        .map_err(|e| unavailable(format!("{}; is it installed and in PATH?", e)))?;

    if !output.status.success() {
        return Err(unavailable(format!(
            "`{} {}` exited with {}",
            program.display(),
            args.join(" "),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check ffmpeg runs and log its version
pub async fn check_ffmpeg_available(program: &Path, timeout: Option<Duration>) -> Result<(), StartupError> {
    let version_output = tool_output(program, &["-version"], timeout).await?;
    match parse_ffmpeg_version(&version_output) {
        Some(major) => info!(major, "Found ffmpeg"),
        None => info!(
            version = version_output.lines().next().unwrap_or("(empty)"),
            "Found ffmpeg with unrecognized version"
        ),
    }
    Ok(())
}

/// Check ffprobe runs
pub async fn check_ffprobe_available(program: &Path, timeout: Option<Duration>) -> Result<(), StartupError> {
    tool_output(program, &["-version"], timeout)
        .await
        .map(|_| ())
}

/// Check the encoder is compiled into ffmpeg
pub async fn check_encoder_supported(
    program: &Path,
    encoder: &str,
    timeout: Option<Duration>,
) -> Result<(), StartupError> {
    let listing = tool_output(program, &["-hide_banner", "-encoders"], timeout).await?;
    if encoder_listed(&listing, encoder) {
        Ok(())
    } else {
        Err(StartupError::EncoderMissing(encoder.to_string()))
    }
}

/// Run all startup checks in order
///
/// 1. ffmpeg availability
/// 2. ffprobe availability
/// 3. Encoder support
pub async fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let timeout = timeout_from_secs(cfg.tools.probe_timeout_secs);
    check_ffmpeg_available(&cfg.tools.ffmpeg, timeout).await?;
    check_ffprobe_available(&cfg.tools.ffprobe, timeout).await?;
    check_encoder_supported(&cfg.tools.ffmpeg, &cfg.transcode.encoder, timeout).await?;
    Ok(())
}
