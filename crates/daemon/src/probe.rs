//! Probe module for reading media metadata with ffprobe.
//!
//! Only the facts the pipeline validates on are extracted: container
//! duration, the first video stream's codec and the free-form `comment` tag
//! that carries the capture timestamp for live recordings.

use crate::encode::{run_tool_blocking, timeout_from_secs, ToolError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// ffprobe could not be launched or timed out.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Metadata of a media file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    /// Container duration in seconds.
    pub duration_secs: f64,
    /// Codec of the first video stream, if any (e.g. "h264", "av1").
    pub video_codec: Option<String>,
    /// Container `comment` tag.
    pub comment: Option<String>,
}

/// Source of media metadata.
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub tags: Option<HashMap<String, String>>,
    }
}

/// [`MediaProbe`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FfprobeProbe {
    /// `timeout_secs` of 0 disables the time limit.
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: timeout_from_secs(timeout_secs),
        }
    }
}

/// Builds `ffprobe -v quiet -print_format json -show_streams -show_format <path>`.
pub fn build_ffprobe_command(program: &Path, path: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_streams",
        "-show_format",
    ])
    .arg(path);
    cmd
}

impl MediaProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        if !path.is_file() {
            return Err(ProbeError::FfprobeFailed(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let output = run_tool_blocking(build_ffprobe_command(&self.program, path), self.timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}

/// Parses ffprobe JSON output into a [`MediaInfo`].
///
/// A missing or unparseable container duration is an error: nothing can be
/// validated without it.
pub fn parse_ffprobe_output(json_str: &str) -> Result<MediaInfo, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .ok_or_else(|| ProbeError::ParseError("Missing container duration".to_string()))?;

    let video_codec = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.codec_name);

    // Tag keys are case-insensitive across muxers ("comment" vs "COMMENT")
    let comment = format.tags.and_then(|tags| {
        tags.into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("comment"))
            .map(|(_, v)| v)
    });

    Ok(MediaInfo {
        duration_secs,
        video_codec,
        comment,
    })
}
