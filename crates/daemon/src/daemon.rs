//! Daemon startup and scheduling loop
//!
//! Each pipeline stage runs in its own task: one scan cycle on the blocking
//! pool, then a sleep of `wakeup_secs`, until the cancellation token fires.
//! The stages share nothing but the filesystem.

use crate::config::{Config, ConfigError};
use crate::encode::{Converter, FfmpegConverter};
use crate::probe::{FfprobeProbe, MediaProbe};
use crate::stage::{CycleSummary, PipelineStage, StageConfig};
use crate::startup::{run_startup_checks, StartupError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// A cycle task panicked or was aborted
    #[error("Cycle task failed: {0}")]
    Cycle(#[from] JoinError),
}

/// Fallback when `wakeup_secs` cannot be represented as a `Duration`
const DEFAULT_WAKEUP: Duration = Duration::from_secs(60);

/// Daemon state: the configuration and both pipeline stages
pub struct Daemon<P = FfprobeProbe, C = FfmpegConverter> {
    /// Configuration the stages were built from
    pub config: Config,
    remux: Arc<PipelineStage<P, C>>,
    transcode: Arc<PipelineStage<P, C>>,
}

impl Daemon {
    /// Initialize the daemon with ffprobe/ffmpeg adapters
    ///
    /// Runs the startup checks first. The configuration must already be
    /// validated.
    pub async fn new(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config).await?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without running startup checks
    pub fn new_without_checks(config: Config) -> Self {
        let tools = &config.tools;
        let probe = FfprobeProbe::new(tools.ffprobe.clone(), tools.probe_timeout_secs);
        let converter = FfmpegConverter::new(tools.ffmpeg.clone(), tools.convert_timeout_secs);

        let remux = PipelineStage::new(StageConfig::remux(&config), probe.clone(), converter.clone());
        let transcode = PipelineStage::new(StageConfig::transcode(&config), probe, converter);
        Self::from_stages(config, remux, transcode)
    }
}

impl<P, C> Daemon<P, C>
where
    P: MediaProbe + Send + Sync + 'static,
    C: Converter + Send + Sync + 'static,
{
    /// Assemble a daemon from prebuilt stages
    pub fn from_stages(
        config: Config,
        remux: PipelineStage<P, C>,
        transcode: PipelineStage<P, C>,
    ) -> Self {
        Self {
            config,
            remux: Arc::new(remux),
            transcode: Arc::new(transcode),
        }
    }

    /// Pause between the end of one cycle and the start of the next
    pub fn wakeup_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.scheduler.wakeup_secs).unwrap_or(DEFAULT_WAKEUP)
    }

    /// Run both stage loops until `cancel` fires
    ///
    /// Returns once every stage has finished its in-flight file.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let interval = self.wakeup_interval();
        info!(
            interval_secs = interval.as_secs_f64(),
            "Daemon started, scheduling remux and transcode stages"
        );

        let handles = [Arc::clone(&self.remux), Arc::clone(&self.transcode)]
            .map(|stage| tokio::spawn(run_stage_loop(stage, interval, cancel.clone())));

        for handle in handles {
            handle.await?;
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Run a single cycle of each stage, remux first
    pub async fn run_once(
        &self,
        cancel: CancellationToken,
    ) -> Result<(CycleSummary, CycleSummary), DaemonError> {
        let remux = run_blocking_cycle(Arc::clone(&self.remux), cancel.clone()).await?;
        let transcode = run_blocking_cycle(Arc::clone(&self.transcode), cancel).await?;
        Ok((remux, transcode))
    }
}

async fn run_blocking_cycle<P, C>(
    stage: Arc<PipelineStage<P, C>>,
    cancel: CancellationToken,
) -> Result<CycleSummary, JoinError>
where
    P: MediaProbe + Send + Sync + 'static,
    C: Converter + Send + Sync + 'static,
{
    tokio::task::spawn_blocking(move || stage.run(&cancel)).await
}

/// Periodic loop for one stage
///
/// A cycle that panics is logged and the loop keeps going. Cancellation is
/// observed by the cycle between files and here while sleeping.
pub async fn run_stage_loop<P, C>(
    stage: Arc<PipelineStage<P, C>>,
    interval: Duration,
    cancel: CancellationToken,
) where
    P: MediaProbe + Send + Sync + 'static,
    C: Converter + Send + Sync + 'static,
{
    let name = stage.kind().as_str();
    info!(stage = name, "Stage loop started");

    while !cancel.is_cancelled() {
        if let Err(e) = run_blocking_cycle(Arc::clone(&stage), cancel.clone()).await {
            error!(stage = name, error = %e, "Cycle aborted unexpectedly, continuing");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(stage = name, "Stage loop stopped");
}
