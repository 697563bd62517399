//! Acceptance checks for converted outputs.
//!
//! Every artifact must match its source's duration within a small tolerance.
//! Transcoded artifacts must additionally carry the target codec, and a
//! source substituted by the compression guard must be a byte-exact copy.

use crate::probe::{MediaInfo, MediaProbe, ProbeError};
use crate::sidecar::files_identical;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted difference between source and output duration.
///
/// Absorbs container and timestamp rounding introduced by a remux.
pub const DURATION_TOLERANCE_SECS: f64 = 1.0;

/// Why an artifact was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Output {} does not exist", .0.display())]
    MissingOutput(PathBuf),

    #[error("Could not probe {}: {source}", path.display())]
    ProbeFailed {
        path: PathBuf,
        #[source]
        source: ProbeError,
    },

    #[error("Duration differs by {diff:.3}s (source {source_secs:.3}s, output {output_secs:.3}s)")]
    DurationMismatch {
        source_secs: f64,
        output_secs: f64,
        diff: f64,
    },

    #[error("Source is already encoded as {0}")]
    SourceAlreadyTarget(String),

    #[error("Output codec is {found}, expected {expected}")]
    WrongCodec { expected: String, found: String },

    #[error("Output {} is not an identical copy of the source", .0.display())]
    NotIdenticalCopy(PathBuf),

    #[error("Sidecar {} is missing", .0.display())]
    SidecarMissing(PathBuf),

    #[error("Sidecar {} differs from the source sidecar", .0.display())]
    SidecarMismatch(PathBuf),

    #[error("Failed to compare files: {0}")]
    Io(#[from] std::io::Error),
}

/// The predicate an artifact is checked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// Streams copied into a new container: duration only.
    Passthrough,
    /// Re-encoded video: duration plus codec checks.
    Transcode { target_codec: String },
    /// The source itself, substituted by the compression guard.
    SourceCopy,
}

/// Checks `|source - output| <= DURATION_TOLERANCE_SECS`.
pub fn check_duration(source_secs: f64, output_secs: f64) -> Result<(), ValidationError> {
    let diff = (source_secs - output_secs).abs();
    // NaN fails the comparison and is rejected
    if diff <= DURATION_TOLERANCE_SECS {
        Ok(())
    } else {
        Err(ValidationError::DurationMismatch {
            source_secs,
            output_secs,
            diff,
        })
    }
}

/// Codec names as reported by ffprobe are compared case-insensitively.
pub fn codec_matches(codec: Option<&str>, target: &str) -> bool {
    codec.is_some_and(|c| c.eq_ignore_ascii_case(target))
}

/// Validates `output` against `source` under `acceptance`.
///
/// Never modifies either file.
pub fn validate_media(
    probe: &dyn MediaProbe,
    output: &Path,
    source: &Path,
    acceptance: &Acceptance,
) -> Result<(), ValidationError> {
    if !output.is_file() {
        return Err(ValidationError::MissingOutput(output.to_path_buf()));
    }

    if *acceptance == Acceptance::SourceCopy {
        return if files_identical(output, source)? {
            Ok(())
        } else {
            Err(ValidationError::NotIdenticalCopy(output.to_path_buf()))
        };
    }

    let source_info = probe_path(probe, source)?;
    let output_info = probe_path(probe, output)?;
    check_duration(source_info.duration_secs, output_info.duration_secs)?;

    if let Acceptance::Transcode { target_codec } = acceptance {
        if codec_matches(source_info.video_codec.as_deref(), target_codec) {
            return Err(ValidationError::SourceAlreadyTarget(target_codec.clone()));
        }
        if !codec_matches(output_info.video_codec.as_deref(), target_codec) {
            return Err(ValidationError::WrongCodec {
                expected: target_codec.clone(),
                found: output_info.video_codec.unwrap_or_else(|| "none".to_string()),
            });
        }
    }

    Ok(())
}

/// Checks that a source sidecar was carried forward byte-for-byte.
///
/// Without a source sidecar there is nothing to carry and any destination
/// sidecar is ignored.
pub fn sidecars_match(source: Option<&Path>, carried: &Path) -> Result<(), ValidationError> {
    let Some(source) = source else {
        return Ok(());
    };
    if !carried.is_file() {
        return Err(ValidationError::SidecarMissing(carried.to_path_buf()));
    }
    if files_identical(source, carried)? {
        Ok(())
    } else {
        Err(ValidationError::SidecarMismatch(carried.to_path_buf()))
    }
}

fn probe_path(probe: &dyn MediaProbe, path: &Path) -> Result<MediaInfo, ValidationError> {
    probe.probe(path).map_err(|source| ValidationError::ProbeFailed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_media, FakeProbe};
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn transcode() -> Acceptance {
        Acceptance::Transcode {
            target_codec: "av1".to_string(),
        }
    }

    #[test]
    fn test_duration_tolerance_boundary() {
        assert!(check_duration(120.0, 121.0).is_ok());
        assert!(check_duration(121.0, 120.0).is_ok());
        assert!(matches!(
            check_duration(120.0, 121.01),
            Err(ValidationError::DurationMismatch { .. })
        ));
        assert!(check_duration(120.0, f64::NAN).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_duration_check_matches_tolerance(a in 0.0f64..100_000.0, b in 0.0f64..100_000.0) {
            let ok = check_duration(a, b).is_ok();
            prop_assert_eq!(ok, (a - b).abs() <= DURATION_TOLERANCE_SECS);
        }
    }

    #[test]
    fn test_codec_matches() {
        assert!(codec_matches(Some("AV1"), "av1"));
        assert!(!codec_matches(Some("h264"), "av1"));
        assert!(!codec_matches(None, "av1"));
    }

    #[test]
    fn test_passthrough_validation() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.flv");
        let output = temp.path().join("a.mp4");
        let probe = FakeProbe::default();
        write_media(&source, "h264", 120.0, 10);

        let missing = validate_media(&probe, &output, &source, &Acceptance::Passthrough);
        assert!(matches!(missing, Err(ValidationError::MissingOutput(_))));

        write_media(&output, "h264", 120.4, 0);
        assert!(validate_media(&probe, &output, &source, &Acceptance::Passthrough).is_ok());

        write_media(&output, "h264", 90.0, 0);
        assert!(matches!(
            validate_media(&probe, &output, &source, &Acceptance::Passthrough),
            Err(ValidationError::DurationMismatch { .. })
        ));

        fs::write(&output, b"garbage").unwrap();
        assert!(matches!(
            validate_media(&probe, &output, &source, &Acceptance::Passthrough),
            Err(ValidationError::ProbeFailed { .. })
        ));
    }

    #[test]
    fn test_transcode_validation_codecs() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src.mp4");
        let output = temp.path().join("out.mp4");
        let probe = FakeProbe::default();

        write_media(&source, "h264", 60.0, 0);
        write_media(&output, "av1", 60.0, 0);
        assert!(validate_media(&probe, &output, &source, &transcode()).is_ok());

        write_media(&output, "hevc", 60.0, 0);
        assert!(matches!(
            validate_media(&probe, &output, &source, &transcode()),
            Err(ValidationError::WrongCodec { .. })
        ));

        write_media(&source, "av1", 60.0, 0);
        write_media(&output, "av1", 60.0, 0);
        assert!(matches!(
            validate_media(&probe, &output, &source, &transcode()),
            Err(ValidationError::SourceAlreadyTarget(_))
        ));
    }

    #[test]
    fn test_source_copy_requires_identical_bytes() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src.mp4");
        let output = temp.path().join("out.mp4");
        let probe = FakeProbe::default();
        write_media(&source, "h264", 60.0, 100);

        fs::copy(&source, &output).unwrap();
        assert!(validate_media(&probe, &output, &source, &Acceptance::SourceCopy).is_ok());

        write_media(&output, "h264", 60.0, 99);
        assert!(matches!(
            validate_media(&probe, &output, &source, &Acceptance::SourceCopy),
            Err(ValidationError::NotIdenticalCopy(_))
        ));
    }

    #[test]
    fn test_sidecars_match() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.xml");
        let dst = temp.path().join("b.xml");

        assert!(sidecars_match(None, &dst).is_ok());
        fs::write(&src, b"<chat/>").unwrap();
        assert!(matches!(
            sidecars_match(Some(&src), &dst),
            Err(ValidationError::SidecarMissing(_))
        ));
        fs::write(&dst, b"<chat></chat>").unwrap();
        assert!(matches!(
            sidecars_match(Some(&src), &dst),
            Err(ValidationError::SidecarMismatch(_))
        ));
        fs::write(&dst, b"<chat/>").unwrap();
        assert!(sidecars_match(Some(&src), &dst).is_ok());
    }
}
