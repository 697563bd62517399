//! Test doubles for the external media tool.
//!
//! "Media" files are small text files whose first line reads
//! `codec=<name>;duration=<secs>[;comment=<text>]`, optionally followed by
//! padding bytes to reach a desired size.

use crate::encode::{ConvertMode, Converter, EncodeError};
use crate::probe::{MediaInfo, MediaProbe, ProbeError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

/// Writes a fake media file with `padding` filler bytes after the header.
pub fn write_media(path: &Path, codec: &str, duration_secs: f64, padding: usize) {
    write_media_with_comment(path, codec, duration_secs, padding, None);
}

pub fn write_media_with_comment(
    path: &Path,
    codec: &str,
    duration_secs: f64,
    padding: usize,
    comment: Option<&str>,
) {
    let mut content = format!("codec={};duration={}", codec, duration_secs);
    if let Some(comment) = comment {
        content.push_str(";comment=");
        content.push_str(comment);
    }
    content.push('\n');
    let mut bytes = content.into_bytes();
    bytes.extend(std::iter::repeat(b'.').take(padding));
    fs::write(path, bytes).unwrap();
}

/// Moves a file's modification time `age` into the past.
pub fn age_file(path: &Path, age: Duration) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn parse_header(path: &Path) -> Result<MediaInfo, ProbeError> {
    let bytes = fs::read(path)
        .map_err(|e| ProbeError::FfprobeFailed(format!("{}: {}", path.display(), e)))?;
    let header = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let header = String::from_utf8_lossy(header);

    let mut codec = None;
    let mut duration = None;
    let mut comment = None;
    for field in header.split(';') {
        match field.split_once('=') {
            Some(("codec", v)) => codec = Some(v.to_string()),
            Some(("duration", v)) => duration = v.parse::<f64>().ok(),
            Some(("comment", v)) => comment = Some(v.to_string()),
            _ => {}
        }
    }

    let duration_secs = duration
        .ok_or_else(|| ProbeError::ParseError(format!("no duration in {}", path.display())))?;
    Ok(MediaInfo {
        duration_secs,
        video_codec: codec,
        comment,
    })
}

/// Probe reading the fake media header.
#[derive(Debug, Default)]
pub struct FakeProbe {
    /// Every file under this directory fails to probe.
    pub broken_dir: Option<PathBuf>,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn failing_under(dir: &Path) -> Self {
        Self {
            broken_dir: Some(dir.to_path_buf()),
            ..Self::default()
        }
    }
}

impl MediaProbe for FakeProbe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(dir) = &self.broken_dir {
            if path.starts_with(dir) {
                return Err(ProbeError::FfprobeFailed(format!(
                    "{}: Invalid data found when processing input",
                    path.display()
                )));
            }
        }
        parse_header(path)
    }
}

/// Converter producing fake media output.
///
/// Copy mode duplicates the input bytes. Transcode mode writes a header with
/// `output_codec`, the source duration plus `duration_skew`, and
/// `output_padding` filler bytes.
#[derive(Debug)]
pub struct FakeConverter {
    pub output_codec: String,
    pub output_padding: usize,
    pub duration_skew: f64,
    /// Write a truncated output and report a tool error.
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl Default for FakeConverter {
    fn default() -> Self {
        Self {
            output_codec: "av1".to_string(),
            output_padding: 0,
            duration_skew: 0.0,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeConverter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Converter for FakeConverter {
    fn convert(&self, input: &Path, output: &Path, mode: &ConvertMode) -> Result<(), EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            fs::write(output, b"codec=av1;dura").map_err(|e| EncodeError::Failed {
                code: 1,
                stderr: e.to_string(),
            })?;
            return Err(EncodeError::Failed {
                code: 1,
                stderr: "Conversion failed!".to_string(),
            });
        }

        match mode {
            ConvertMode::Copy => {
                fs::copy(input, output).map_err(|e| EncodeError::Failed {
                    code: 1,
                    stderr: e.to_string(),
                })?;
            }
            ConvertMode::Transcode { .. } => {
                let source = parse_header(input).map_err(|e| EncodeError::Failed {
                    code: 1,
                    stderr: e.to_string(),
                })?;
                write_media(
                    output,
                    &self.output_codec,
                    source.duration_secs + self.duration_skew,
                    self.output_padding,
                );
            }
        }
        Ok(())
    }
}
