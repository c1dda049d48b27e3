use anyhow::{ensure, Context, Result};
use config::{Config as RConfig, Environment, File};
use joblens_common::constants::{
    DEFAULT_JOB_ADDER_FIFO, DEFAULT_MAX_FRAME_BYTES, DEFAULT_REAPER_INTERVAL_MS, REOPEN_DELAY_MS,
};
use joblens_ingest::{DuplicatePolicy, IngestOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "JOBLENS";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CollectorsConfig {
    pub job_adder_fifo: PathBuf,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExportConfig {
    /// JSON-lines file receiving every registry change.
    pub file: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LogConfig {
    pub level: String,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub collectors_config: CollectorsConfig,
    pub duplicate_policy: DuplicatePolicy,
    pub max_frame_bytes: usize,
    /// 0 disables the process reaper.
    pub reaper_interval_ms: u64,
    pub export: ExportConfig,
    pub log: LogConfig,

    /// Files the config was read from, for display only.
    pub config_sources: Vec<String>,
}

impl Config {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            max_frame_bytes: self.max_frame_bytes,
            duplicate_policy: self.duplicate_policy,
            reopen_delay: Duration::from_millis(REOPEN_DELAY_MS),
        }
    }

    pub fn reaper_interval(&self) -> Option<Duration> {
        (self.reaper_interval_ms > 0).then(|| Duration::from_millis(self.reaper_interval_ms))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_default_config() -> Result<Config> {
        Self::load_config(None)
    }

    /// Defaults, then the optional YAML/TOML file, then `JOBLENS__*` variables.
    pub fn load_config(path: Option<&Path>) -> Result<Config> {
        let mut builder = RConfig::builder();

        builder = builder
            .set_default("collectors_config.job_adder_fifo", DEFAULT_JOB_ADDER_FIFO)?
            .set_default("duplicate_policy", "reject")?
            .set_default("max_frame_bytes", DEFAULT_MAX_FRAME_BYTES as u64)?
            .set_default("reaper_interval_ms", DEFAULT_REAPER_INTERVAL_MS)?
            .set_default("export.file", None::<String>)?
            .set_default("log.level", "info")?
            .set_default("log.file", None::<String>)?;

        let mut sources = Vec::new();
        if let Some(path) = path {
            ensure!(path.exists(), "config file {} does not exist", path.display());
            builder = builder.add_source(File::from(path).required(true));
            sources.push(path.display().to_string());
        }

        builder = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .set_override("config_sources", sources)?;

        let config: Config = builder
            .build()?
            .try_deserialize()
            .context("failed to parse config file")?;

        ensure!(config.max_frame_bytes > 0, "max_frame_bytes must be positive");
        Ok(config)
    }
}
