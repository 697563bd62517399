//! Auto Transcode
//!
//! Unattended pipeline for live-stream recordings: FLV captures are remuxed
//! to MP4, later re-encoded to AV1, validated and moved into the archive
//! together with their `.xml` sidecars.

pub mod daemon;
pub mod encode;
pub mod probe;
pub mod processor;
pub mod relocate;
pub mod scan;
pub mod sidecar;
pub mod size_gate;
pub mod stability;
pub mod stage;
pub mod startup;
pub mod timestamp;
pub mod validate;

#[cfg(test)]
mod testing;

pub use auto_transcode_config as config;
pub use auto_transcode_config::{Config, ConfigError};
pub use daemon::{run_stage_loop, Daemon, DaemonError};
pub use encode::{ConvertMode, Converter, EncodeError, FfmpegConverter, ToolError};
pub use probe::{FfprobeProbe, MediaInfo, MediaProbe, ProbeError};
pub use processor::{ProcessOutcome, ProcessState, StageError, StageProcessor};
pub use relocate::{relocate, RelocateError};
pub use sidecar::RecordingUnit;
pub use stage::{run_cycle, CycleSummary, PipelineStage, StageConfig, StageKind};
pub use startup::{run_startup_checks, StartupError};
pub use validate::{Acceptance, ValidationError};
