//! Logging configuration with journald support on Linux.
//!
//! Logs go to systemd's journal when it is reachable, otherwise to a
//! daily-rolling file. The filter comes from `FACESORT_LOG`
//! (`debug`, `info` (default), `warn`, `error`, or any `EnvFilter` directive).

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("FACESORT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facesort")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "facesort.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop, so it has to live as long as the process
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
