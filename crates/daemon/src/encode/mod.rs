//! Conversion modules for the recording pipeline

pub mod ffmpeg;
pub mod tool;

pub use ffmpeg::{build_ffmpeg_command, FfmpegConverter};
pub use tool::{run_tool, run_tool_blocking, timeout_from_secs, ToolError};

use std::path::Path;
use thiserror::Error;

/// What a conversion does to the input's streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertMode {
    /// Rewrap all streams unchanged into the output container
    Copy,
    /// Re-encode video with `encoder` at `constant_quality`, copy audio
    Transcode {
        encoder: String,
        constant_quality: u32,
    },
}

/// Error type for conversion operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Converter exited with non-zero status
    #[error("ffmpeg failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// Converter was terminated by signal
    #[error("ffmpeg process was terminated by signal")]
    Terminated,

    /// Converter could not be launched or timed out
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Converts one media file into another
///
/// Implementations write `output` directly and may leave a partial file
/// behind on failure; callers own cleanup of the working path.
pub trait Converter {
    fn convert(&self, input: &Path, output: &Path, mode: &ConvertMode) -> Result<(), EncodeError>;
}
