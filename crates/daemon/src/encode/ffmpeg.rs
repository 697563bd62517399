//! ffmpeg converter for the remux and transcode stages
//!
//! Builds one ffmpeg invocation per conversion: a stream copy into a new
//! container, or a video re-encode with audio passed through.

use super::tool::{run_tool_blocking, timeout_from_secs};
use super::{ConvertMode, Converter, EncodeError};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT_CHARS: usize = 2000;

/// [`Converter`] backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegConverter {
    /// `timeout_secs` of 0 disables the time limit.
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: timeout_from_secs(timeout_secs),
        }
    }
}

/// Build an ffmpeg command converting `input` into `output`
///
/// Common flags: `-hide_banner -nostdin -loglevel error -y -i <input>`.
/// Copy mode adds `-c copy`; transcode mode adds
/// `-c:v <encoder> -cq <quality> -c:a copy`. The output path comes last.
pub fn build_ffmpeg_command(
    program: &Path,
    input: &Path,
    output: &Path,
    mode: &ConvertMode,
) -> Command {
    let mut cmd = Command::new(program);

    cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]);
    cmd.arg("-i").arg(input);

    match mode {
        ConvertMode::Copy => {
            cmd.arg("-c").arg("copy");
        }
        ConvertMode::Transcode {
            encoder,
            constant_quality,
        } => {
            cmd.arg("-c:v").arg(encoder);
            cmd.arg("-cq").arg(constant_quality.to_string());
            cmd.arg("-c:a").arg("copy");
        }
    }

    cmd.arg(output);
    cmd
}

impl Converter for FfmpegConverter {
    fn convert(&self, input: &Path, output: &Path, mode: &ConvertMode) -> Result<(), EncodeError> {
        let cmd = build_ffmpeg_command(&self.program, input, output, mode);
        debug!(?cmd, "Running ffmpeg");

        let result = run_tool_blocking(cmd, self.timeout)?;
        if result.status.success() {
            return Ok(());
        }

        match result.status.code() {
            Some(code) => Err(EncodeError::Failed {
                code,
                stderr: stderr_excerpt(&result.stderr),
            }),
            None => Err(EncodeError::Terminated),
        }
    }
}

/// Tail of stderr, where ffmpeg reports the fatal error
fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_EXCERPT_CHARS);
    text.chars().skip(skip).collect()
}
