//! Sidecar metadata files and recording units.
//!
//! A recording is a primary media file plus an optional `.xml` sidecar
//! sharing its basename (chat or overlay logs written by the capture tool).

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Extension shared by all sidecar files.
pub const SIDECAR_EXTENSION: &str = "xml";

const COMPARE_CHUNK: usize = 64 * 1024;

/// Constructs the sidecar path for a media file.
///
/// Only the final extension is replaced: `/rec/a.flv` -> `/rec/a.xml`.
pub fn sidecar_path(media: &Path) -> PathBuf {
    media.with_extension(SIDECAR_EXTENSION)
}

/// A media file and its sidecar, if one was present at discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingUnit {
    pub media: PathBuf,
    pub sidecar: Option<PathBuf>,
}

impl RecordingUnit {
    /// Pairs `media` with its sidecar when the sidecar file exists.
    pub fn discover(media: PathBuf) -> Self {
        let candidate = sidecar_path(&media);
        let sidecar = candidate.is_file().then_some(candidate);
        Self { media, sidecar }
    }

    /// Basename without extension; the unit's identity within a directory.
    pub fn stem(&self) -> &OsStr {
        self.media.file_stem().unwrap_or_default()
    }
}

/// Byte-for-byte comparison of two files.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let mut fa = File::open(a)?;
    let mut fb = File::open(b)?;
    if fa.metadata()?.len() != fb.metadata()?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];
    loop {
        let n = fill(&mut fa, &mut buf_a)?;
        let m = fill(&mut fb, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Reads until `buf` is full or EOF, returning the byte count.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
