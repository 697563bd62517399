//! Per-file processing for one pipeline stage.
//!
//! Drives a single recording through conversion, validation and relocation.
//! The filesystem is the only state: every failure path leaves the source in
//! place so the next cycle retries, and a cycle interrupted at any point
//! resumes by re-reading the working and destination directories. The source
//! is deleted only after the relocated copy has been validated again.

use crate::encode::{Converter, EncodeError};
use crate::probe::{MediaInfo, MediaProbe, ProbeError};
use crate::relocate::{disambiguated_path, relocate, RelocateError};
use crate::sidecar::{files_identical, sidecar_path, RecordingUnit};
use crate::size_gate::{check_compression, CompressionResult};
use crate::stage::StageConfig;
use crate::validate::{codec_matches, sidecars_match, validate_media, Acceptance, ValidationError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error type for processing one recording.
///
/// None of these destroy the source; the unit is retried next cycle.
#[derive(Debug, Error)]
pub enum StageError {
    /// The source could not be probed
    #[error("Probe failed for {}: {source}", path.display())]
    ProbeFailed {
        path: PathBuf,
        #[source]
        source: ProbeError,
    },

    /// The converter reported an error
    #[error("Conversion failed: {0}")]
    ToolInvocationFailed(#[from] EncodeError),

    /// The working output was rejected
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// The relocated copy was rejected and removed again
    #[error("Relocated copy failed final check and was rolled back: {0}")]
    RolledBack(ValidationError),

    /// Moving the output to its destination failed
    #[error("Relocation failed: {0}")]
    RelocationFailed(#[from] RelocateError),

    /// Filesystem error outside of conversion and relocation
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn io_error(context: impl Into<String>) -> impl FnOnce(io::Error) -> StageError {
    let context = context.into();
    move |source| StageError::Io { context, source }
}

/// Position of a recording in the processing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Discovered,
    AlreadyDone,
    Converting,
    Converted,
    Validating,
    Valid,
    Relocating,
    Relocated,
    Invalid,
    ToolError,
    CleanedUp,
    Discarded,
}

impl ProcessState {
    /// Convert state to string for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Discovered => "discovered",
            ProcessState::AlreadyDone => "already_done",
            ProcessState::Converting => "converting",
            ProcessState::Converted => "converted",
            ProcessState::Validating => "validating",
            ProcessState::Valid => "valid",
            ProcessState::Relocating => "relocating",
            ProcessState::Relocated => "relocated",
            ProcessState::Invalid => "invalid",
            ProcessState::ToolError => "tool_error",
            ProcessState::CleanedUp => "cleaned_up",
            ProcessState::Discarded => "discarded",
        }
    }
}

/// What ended up at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// The converter's output
    Converted,
    /// The source itself; conversion saved no space
    SourceCopy,
}

/// Why an input was discarded without conversion
#[derive(Debug, Clone, PartialEq)]
pub enum DegenerateInput {
    TooSmall { bytes: u64, min_bytes: u64 },
    TooShort { secs: f64, min_secs: f64 },
}

/// Terminal result of processing one recording
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// A previous cycle already relocated this recording; the source was removed
    AlreadyDone { destination: PathBuf },
    /// The recording was carried forward and the source removed
    Relocated {
        destination: PathBuf,
        artifact: Artifact,
    },
    /// The source and its sidecar were deleted
    Discarded(DegenerateInput),
}

struct RelocatedUnit {
    media: PathBuf,
    sidecar: Option<PathBuf>,
}

fn advance(state: &mut ProcessState, next: ProcessState) {
    debug!(from = state.as_str(), to = next.as_str(), "State transition");
    *state = next;
}

/// Removes `path`, treating an already missing file as success.
fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Both paths resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn discard_quietly(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove working file");
    }
}

/// Processes recordings for one stage, one at a time.
pub struct StageProcessor<'a> {
    config: &'a StageConfig,
    probe: &'a dyn MediaProbe,
    converter: &'a dyn Converter,
}

impl<'a> StageProcessor<'a> {
    pub fn new(
        config: &'a StageConfig,
        probe: &'a dyn MediaProbe,
        converter: &'a dyn Converter,
    ) -> Self {
        Self {
            config,
            probe,
            converter,
        }
    }

    /// Runs one recording through the state machine to a terminal state.
    pub fn process(&self, unit: &RecordingUnit) -> Result<ProcessOutcome, StageError> {
        let source = &unit.media;
        let mut state = ProcessState::Discovered;

        if let Some(limits) = &self.config.degenerate {
            let bytes = fs::metadata(source)
                .map_err(io_error(format!("Failed to stat {}", source.display())))?
                .len();
            if bytes < limits.min_bytes {
                advance(&mut state, ProcessState::Discarded);
                return self.discard(
                    unit,
                    DegenerateInput::TooSmall {
                        bytes,
                        min_bytes: limits.min_bytes,
                    },
                );
            }
        }

        let source_info = self.probe_source(source)?;

        if let Some(limits) = &self.config.degenerate {
            if source_info.duration_secs < limits.min_duration_secs {
                advance(&mut state, ProcessState::Discarded);
                return self.discard(
                    unit,
                    DegenerateInput::TooShort {
                        secs: source_info.duration_secs,
                        min_secs: limits.min_duration_secs,
                    },
                );
            }
        }

        if let Acceptance::Transcode { target_codec } = &self.config.acceptance {
            if codec_matches(source_info.video_codec.as_deref(), target_codec) {
                return Err(ValidationError::SourceAlreadyTarget(target_codec.clone()).into());
            }
        }

        let destination = self.destination_path(unit, &source_info);
        let working = self.working_path(unit);
        let working_sidecar = sidecar_path(&working);

        if let Some(found) = self.find_relocated(unit, &destination, &working, &working_sidecar)? {
            advance(&mut state, ProcessState::AlreadyDone);
            self.remove_source(unit)?;
            discard_quietly(&working);
            discard_quietly(&working_sidecar);
            info!(destination = %found.display(), "Already relocated by an earlier cycle, removed source");
            return Ok(ProcessOutcome::AlreadyDone { destination: found });
        }

        let mut artifact = match self.reusable_artifact(&working, source) {
            Some(artifact) => {
                info!(working = %working.display(), "Reusing validated working output");
                artifact
            }
            None => {
                self.convert(unit, &working, &working_sidecar, &mut state)?;
                Artifact::Converted
            }
        };
        advance(&mut state, ProcessState::Valid);

        if artifact == Artifact::Converted && self.config.keep_source_if_larger {
            artifact = self.apply_compression_guard(source, &working)?;
        }
        self.stage_sidecar(unit, &working_sidecar)?;

        advance(&mut state, ProcessState::Relocating);
        let relocated = self.relocate_unit(unit, &working, &working_sidecar, &destination)?;

        if let Err(e) = self.final_check(unit, &relocated, artifact) {
            error!(destination = %relocated.media.display(), error = %e, "Relocated copy is invalid, rolling back");
            self.rollback(&relocated);
            advance(&mut state, ProcessState::CleanedUp);
            return Err(StageError::RolledBack(e));
        }

        self.remove_source(unit)?;
        advance(&mut state, ProcessState::Relocated);
        info!(
            destination = %relocated.media.display(),
            artifact = ?artifact,
            "Recording carried forward"
        );
        Ok(ProcessOutcome::Relocated {
            destination: relocated.media,
            artifact,
        })
    }

    fn probe_source(&self, source: &Path) -> Result<MediaInfo, StageError> {
        self.probe
            .probe(source)
            .map_err(|e| StageError::ProbeFailed {
                path: source.to_path_buf(),
                source: e,
            })
    }

    fn acceptance_for(&self, artifact: Artifact) -> Acceptance {
        match artifact {
            Artifact::Converted => self.config.acceptance.clone(),
            Artifact::SourceCopy => Acceptance::SourceCopy,
        }
    }

    /// Preferred destination; relocation may still pick a suffixed name.
    fn destination_path(&self, unit: &RecordingUnit, info: &MediaInfo) -> PathBuf {
        let stem = unit.stem().to_string_lossy();
        let stem = match &self.config.capture_timestamp {
            Some(ts) => ts.destination_stem(&stem, info.comment.as_deref()),
            None => stem.into_owned(),
        };
        self.config
            .destination_dir
            .join(format!("{}.{}", stem, self.config.output_extension))
    }

    fn working_path(&self, unit: &RecordingUnit) -> PathBuf {
        self.config.working_dir.join(format!(
            "{}.{}",
            unit.stem().to_string_lossy(),
            self.config.output_extension
        ))
    }

    /// Looks for a copy of this recording relocated by an interrupted cycle.
    fn find_relocated(
        &self,
        unit: &RecordingUnit,
        destination: &Path,
        working: &Path,
        working_sidecar: &Path,
    ) -> Result<Option<PathBuf>, StageError> {
        for n in 1..=u32::MAX {
            let candidate = disambiguated_path(destination, n);
            let candidate_sidecar = sidecar_path(&candidate);
            if !candidate.exists() && !candidate_sidecar.exists() {
                break;
            }
            if same_file(&candidate, &unit.media) {
                warn!(candidate = %candidate.display(), "Destination candidate is the source itself, ignoring");
                continue;
            }
            if candidate.is_file()
                && self.is_relocated_copy(unit, &candidate, working, working_sidecar)?
            {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// A candidate must validate against the source and carry identity
    /// evidence beyond duration: identical bytes or a matching sidecar.
    fn is_relocated_copy(
        &self,
        unit: &RecordingUnit,
        candidate: &Path,
        working: &Path,
        working_sidecar: &Path,
    ) -> Result<bool, StageError> {
        let source = &unit.media;
        let byte_copy = self.config.keep_source_if_larger
            && validate_media(self.probe, candidate, source, &Acceptance::SourceCopy).is_ok();
        if !byte_copy
            && validate_media(self.probe, candidate, source, &self.config.acceptance).is_err()
        {
            return Ok(false);
        }

        let Some(source_sidecar) = &unit.sidecar else {
            return Ok(byte_copy);
        };
        let candidate_sidecar = sidecar_path(candidate);
        if candidate_sidecar.is_file() {
            return Ok(files_identical(source_sidecar, &candidate_sidecar).unwrap_or(false));
        }

        // Interrupted between relocating the media and its sidecar
        let sidecar_left_behind = !working.exists()
            && working_sidecar.is_file()
            && files_identical(source_sidecar, working_sidecar).unwrap_or(false);
        if sidecar_left_behind {
            relocate(working_sidecar, &candidate_sidecar)?;
            info!(sidecar = %candidate_sidecar.display(), "Restored sidecar of relocated recording");
            return Ok(true);
        }
        if byte_copy {
            fs::copy(source_sidecar, &candidate_sidecar).map_err(io_error(format!(
                "Failed to restore sidecar {}",
                candidate_sidecar.display()
            )))?;
            info!(sidecar = %candidate_sidecar.display(), "Restored sidecar of relocated recording");
            return Ok(true);
        }
        Ok(false)
    }

    /// A working output left by an interrupted cycle that still validates.
    fn reusable_artifact(&self, working: &Path, source: &Path) -> Option<Artifact> {
        if !working.is_file() {
            return None;
        }
        if validate_media(self.probe, working, source, &self.config.acceptance).is_ok() {
            return Some(Artifact::Converted);
        }
        if self.config.keep_source_if_larger
            && validate_media(self.probe, working, source, &Acceptance::SourceCopy).is_ok()
        {
            return Some(Artifact::SourceCopy);
        }
        debug!(working = %working.display(), "Stale working output will be replaced");
        None
    }

    fn convert(
        &self,
        unit: &RecordingUnit,
        working: &Path,
        working_sidecar: &Path,
        state: &mut ProcessState,
    ) -> Result<(), StageError> {
        let source = &unit.media;
        advance(state, ProcessState::Converting);

        let cleanup = |state: &mut ProcessState| {
            discard_quietly(working);
            discard_quietly(working_sidecar);
            advance(state, ProcessState::CleanedUp);
        };

        remove_if_exists(working).map_err(io_error(format!(
            "Failed to remove stale {}",
            working.display()
        )))?;
        if let Some(sidecar) = &unit.sidecar {
            if let Err(e) = fs::copy(sidecar, working_sidecar) {
                cleanup(state);
                return Err(io_error(format!("Failed to copy sidecar {}", sidecar.display()))(e));
            }
        }

        info!(output = %working.display(), mode = ?self.config.mode, "Converting");
        if let Err(e) = self.converter.convert(source, working, &self.config.mode) {
            advance(state, ProcessState::ToolError);
            cleanup(state);
            return Err(e.into());
        }
        advance(state, ProcessState::Converted);

        advance(state, ProcessState::Validating);
        if let Err(e) = validate_media(self.probe, working, source, &self.config.acceptance) {
            advance(state, ProcessState::Invalid);
            cleanup(state);
            return Err(e.into());
        }
        Ok(())
    }

    /// Replaces a working output that saved no space with a copy of the source.
    fn apply_compression_guard(&self, source: &Path, working: &Path) -> Result<Artifact, StageError> {
        let size = |p: &Path| {
            fs::metadata(p)
                .map(|m| m.len())
                .map_err(io_error(format!("Failed to stat {}", p.display())))
        };

        match check_compression(size(source)?, size(working)?) {
            CompressionResult::Smaller { ratio } => {
                debug!(ratio, "Compression accepted");
                Ok(Artifact::Converted)
            }
            CompressionResult::NotSmaller { ratio } => {
                warn!(ratio, "Transcoded output is not smaller than the source, keeping the source");
                fs::remove_file(working)
                    .map_err(io_error(format!("Failed to remove {}", working.display())))?;
                fs::copy(source, working)
                    .map_err(io_error(format!("Failed to copy source to {}", working.display())))?;
                Ok(Artifact::SourceCopy)
            }
        }
    }

    /// Makes the working sidecar mirror the source sidecar.
    fn stage_sidecar(&self, unit: &RecordingUnit, working_sidecar: &Path) -> Result<(), StageError> {
        match &unit.sidecar {
            Some(sidecar) => {
                let current = working_sidecar.is_file()
                    && files_identical(sidecar, working_sidecar).unwrap_or(false);
                if !current {
                    fs::copy(sidecar, working_sidecar).map_err(io_error(format!(
                        "Failed to copy sidecar {}",
                        sidecar.display()
                    )))?;
                }
            }
            None => remove_if_exists(working_sidecar).map_err(io_error(format!(
                "Failed to remove stale {}",
                working_sidecar.display()
            )))?,
        }
        Ok(())
    }

    /// First destination whose media name, and sidecar name when needed, are free.
    fn free_destination(&self, destination: &Path, with_sidecar: bool) -> PathBuf {
        (1..=u32::MAX)
            .map(|n| disambiguated_path(destination, n))
            .find(|c| !c.exists() && !(with_sidecar && sidecar_path(c).exists()))
            .unwrap_or_else(|| destination.to_path_buf())
    }

    fn relocate_unit(
        &self,
        unit: &RecordingUnit,
        working: &Path,
        working_sidecar: &Path,
        destination: &Path,
    ) -> Result<RelocatedUnit, StageError> {
        let target = self.free_destination(destination, unit.sidecar.is_some());
        let media = relocate(working, &target)?;
        if media != destination {
            info!(requested = %destination.display(), actual = %media.display(), "Destination name taken, disambiguated");
        }

        if unit.sidecar.is_none() {
            return Ok(RelocatedUnit {
                media,
                sidecar: None,
            });
        }

        match relocate(working_sidecar, &sidecar_path(&media)) {
            Ok(sidecar) => Ok(RelocatedUnit {
                media,
                sidecar: Some(sidecar),
            }),
            Err(e) => {
                // Source is intact; drop the orphaned media and retry next cycle
                discard_quietly(&media);
                Err(e.into())
            }
        }
    }

    fn final_check(
        &self,
        unit: &RecordingUnit,
        relocated: &RelocatedUnit,
        artifact: Artifact,
    ) -> Result<(), ValidationError> {
        validate_media(
            self.probe,
            &relocated.media,
            &unit.media,
            &self.acceptance_for(artifact),
        )?;
        match &relocated.sidecar {
            Some(sidecar) => sidecars_match(unit.sidecar.as_deref(), sidecar),
            None => sidecars_match(unit.sidecar.as_deref(), &sidecar_path(&relocated.media)),
        }
    }

    fn rollback(&self, relocated: &RelocatedUnit) {
        discard_quietly(&relocated.media);
        if let Some(sidecar) = &relocated.sidecar {
            discard_quietly(sidecar);
        }
    }

    fn remove_source(&self, unit: &RecordingUnit) -> Result<(), StageError> {
        let paths = std::iter::once(&unit.media).chain(unit.sidecar.as_ref());
        for path in paths {
            remove_if_exists(path)
                .map_err(io_error(format!("Failed to remove source {}", path.display())))?;
        }
        Ok(())
    }

    fn discard(
        &self,
        unit: &RecordingUnit,
        reason: DegenerateInput,
    ) -> Result<ProcessOutcome, StageError> {
        warn!(reason = ?reason, "Discarding degenerate recording");
        self.remove_source(unit)?;
        Ok(ProcessOutcome::Discarded(reason))
    }
}
