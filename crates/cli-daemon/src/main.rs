//! CLI entry point for the recording remux/transcode daemon
//!
//! Parses command line arguments, installs logging and starts the daemon.

use auto_transcode::{Config, Daemon, DaemonError};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Auto Transcode - remux FLV recordings and archive them as AV1
#[derive(Parser, Debug)]
#[command(name = "auto-transcode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml). Without it, settings
    /// come from defaults and environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one cycle of each stage and exit
    #[arg(long, default_value = "false")]
    once: bool,

    /// Skip startup checks (ffmpeg, ffprobe, encoder). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config, DaemonError> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// Install the stderr layer and, when configured, a plain-text file layer.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("auto_transcode=info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(path.as_os_str());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(config.logging.log_file.as_deref());
    info!(
        flv_dirs = ?config.paths.flv_dirs,
        remux_dir = %config.paths.remux_dir.display(),
        save_dir = %config.paths.save_dir.display(),
        "Auto Transcode starting"
    );

    let daemon = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        match Daemon::new(config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!(error = %e, "Failed to initialize daemon");
                return ExitCode::FAILURE;
            }
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, finishing in-flight files");
            cancel.cancel();
        }
    });

    let result = if args.once {
        daemon.run_once(cancel).await.map(|(remux, transcode)| {
            info!(
                remux_processed = remux.processed(),
                transcode_processed = transcode.processed(),
                "Single run finished"
            );
        })
    } else {
        daemon.run(cancel).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon error");
            ExitCode::FAILURE
        }
    }
}
