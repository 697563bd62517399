//! Pipeline stages and their scan cycles.
//!
//! A stage pairs a watched directory set with a conversion: the remux stage
//! rewraps `.flv` captures as `.mp4` into the remux directory, the transcode
//! stage re-encodes those into the save directory. One `run` call is one
//! scan cycle: files are discovered lazily and processed sequentially.

use crate::config::Config;
use crate::encode::{ConvertMode, Converter};
use crate::probe::MediaProbe;
use crate::processor::{ProcessOutcome, StageError, StageProcessor};
use crate::scan::scan_quiesced;
use crate::sidecar::RecordingUnit;
use crate::stability::days_to_duration;
use crate::timestamp::CaptureTimestamp;
use crate::validate::Acceptance;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

/// Which of the two pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Remux,
    Transcode,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Remux => "remux",
            StageKind::Transcode => "transcode",
        }
    }
}

/// Thresholds below which a capture is treated as aborted and deleted
#[derive(Debug, Clone, PartialEq)]
pub struct DegenerateLimits {
    pub min_bytes: u64,
    pub min_duration_secs: f64,
}

/// Everything one stage needs, derived from the validated [`Config`]
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub kind: StageKind,
    pub watch_dirs: Vec<PathBuf>,
    /// Extension of source media, without dot
    pub source_extension: String,
    /// Extension of produced media, without dot
    pub output_extension: String,
    pub destination_dir: PathBuf,
    /// Stage-private working directory for in-progress output
    pub working_dir: PathBuf,
    pub quiescence: Duration,
    pub mode: ConvertMode,
    pub acceptance: Acceptance,
    /// Discard thresholds; `None` disables the check
    pub degenerate: Option<DegenerateLimits>,
    /// Leave media without a sidecar untouched
    pub require_sidecar: bool,
    /// Substitute the source when the output saves no space
    pub keep_source_if_larger: bool,
    pub capture_timestamp: Option<CaptureTimestamp>,
}

impl StageConfig {
    /// FLV directories -> remux directory, stream copy
    pub fn remux(config: &Config) -> Self {
        let capture_timestamp = if config.capture_timestamp.enabled {
            CaptureTimestamp::new(config.capture_timestamp.utc_offset_minutes)
        } else {
            None
        };

        Self {
            kind: StageKind::Remux,
            watch_dirs: config.paths.flv_dirs.clone(),
            source_extension: "flv".to_string(),
            output_extension: "mp4".to_string(),
            destination_dir: config.paths.remux_dir.clone(),
            working_dir: config.paths.cache_dir.join(StageKind::Remux.as_str()),
            quiescence: days_to_duration(config.remux.days_before_remux),
            mode: ConvertMode::Copy,
            acceptance: Acceptance::Passthrough,
            degenerate: Some(DegenerateLimits {
                min_bytes: config.remux.min_bytes,
                min_duration_secs: config.remux.min_duration_secs,
            }),
            require_sidecar: config.remux.require_sidecar,
            keep_source_if_larger: false,
            capture_timestamp,
        }
    }

    /// Remux directory -> save directory, video re-encode
    pub fn transcode(config: &Config) -> Self {
        Self {
            kind: StageKind::Transcode,
            watch_dirs: vec![config.paths.remux_dir.clone()],
            source_extension: "mp4".to_string(),
            output_extension: "mp4".to_string(),
            destination_dir: config.paths.save_dir.clone(),
            working_dir: config.paths.cache_dir.join(StageKind::Transcode.as_str()),
            quiescence: days_to_duration(config.transcode.days_before_transcode),
            mode: ConvertMode::Transcode {
                encoder: config.transcode.encoder.clone(),
                constant_quality: config.transcode.constant_quality,
            },
            acceptance: Acceptance::Transcode {
                target_codec: config.transcode.target_codec.clone(),
            },
            degenerate: None,
            require_sidecar: false,
            keep_source_if_larger: config.transcode.keep_source_if_larger,
            capture_timestamp: None,
        }
    }
}

/// Counts of terminal states reached in one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub relocated: usize,
    pub already_done: usize,
    pub discarded: usize,
    pub failed: usize,
    /// The cycle stopped early on shutdown
    pub cancelled: bool,
}

impl CycleSummary {
    fn record(&mut self, result: &Result<ProcessOutcome, StageError>) {
        match result {
            Ok(ProcessOutcome::Relocated { .. }) => self.relocated += 1,
            Ok(ProcessOutcome::AlreadyDone { .. }) => self.already_done += 1,
            Ok(ProcessOutcome::Discarded(_)) => self.discarded += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.relocated + self.already_done + self.discarded + self.failed
    }
}

/// Processes `candidates` one at a time until exhausted or cancelled.
///
/// Cancellation is observed before each file, never during one. Per-file
/// errors are logged and counted; they never end the cycle.
pub fn run_cycle<I, F>(
    kind: StageKind,
    candidates: I,
    mut process_one: F,
    cancel: &CancellationToken,
) -> CycleSummary
where
    I: IntoIterator<Item = RecordingUnit>,
    F: FnMut(&RecordingUnit) -> Result<ProcessOutcome, StageError>,
{
    let mut summary = CycleSummary::default();

    for unit in candidates {
        if cancel.is_cancelled() {
            info!(stage = kind.as_str(), "Shutdown requested, ending cycle early");
            summary.cancelled = true;
            break;
        }

        let span = info_span!("recording", stage = kind.as_str(), path = %unit.media.display());
        let _enter = span.enter();

        let result = process_one(&unit);
        if let Err(e) = &result {
            error!(error = %e, "Failed to process recording, will retry next cycle");
        }
        summary.record(&result);
    }

    summary
}

/// One pipeline stage with its media tool.
pub struct PipelineStage<P, C> {
    config: StageConfig,
    probe: P,
    converter: C,
}

impl<P: MediaProbe, C: Converter> PipelineStage<P, C> {
    pub fn new(config: StageConfig, probe: P, converter: C) -> Self {
        Self {
            config,
            probe,
            converter,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.config.kind
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Quiesced recordings under the watched directories, in scan order.
    pub fn candidates(&self) -> impl Iterator<Item = RecordingUnit> + '_ {
        scan_quiesced(
            &self.config.watch_dirs,
            &self.config.source_extension,
            self.config.quiescence,
        )
        .map(RecordingUnit::discover)
        .filter(|unit| {
            if self.config.require_sidecar && unit.sidecar.is_none() {
                warn!(path = %unit.media.display(), "Sidecar file does not exist, skipping");
                return false;
            }
            true
        })
    }

    /// Runs one scan cycle.
    pub fn run(&self, cancel: &CancellationToken) -> CycleSummary {
        let stage = self.config.kind.as_str();
        info!(stage, dirs = ?self.config.watch_dirs, "Starting cycle");

        if let Err(e) = fs::create_dir_all(&self.config.working_dir) {
            error!(
                stage,
                dir = %self.config.working_dir.display(),
                error = %e,
                "Cannot create working directory, skipping cycle"
            );
            return CycleSummary::default();
        }

        let processor = StageProcessor::new(&self.config, &self.probe, &self.converter);
        let summary = run_cycle(
            self.config.kind,
            self.candidates(),
            |unit| processor.process(unit),
            cancel,
        );

        info!(
            stage,
            relocated = summary.relocated,
            already_done = summary.already_done,
            discarded = summary.discarded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Cycle finished"
        );
        summary
    }
}
