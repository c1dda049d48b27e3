use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    prelude::*,
    EnvFilter,
};

/// `RUST_LOG` wins over the configured level when set.
fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}")),
    }
}

pub fn setup_logging(config: &LogConfig) -> Result<()> {
    let filter = build_filter(&config.level)?;

    let file_layer = match &config.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let file_appender = RollingFileAppender::new(Rotation::NEVER, dir, name);

            Some(
                fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_level(true)
                    .with_timer(SystemTime)
                    .with_ansi(false)
                    .with_writer(file_appender),
            )
        }
        None => None,
    };
    let stderr_layer = config
        .file
        .is_none()
        .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match &config.file {
        Some(path) => tracing::info!("Logging system initialized. Writing to {}", path.display()),
        None => tracing::debug!("Logging system initialized"),
    }
    Ok(())
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let name = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok((dir, name))
}
