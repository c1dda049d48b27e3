use anyhow::{Context, Result};
use joblens_common::JobEvent;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives registry changes for delivery downstream.
#[async_trait::async_trait]
pub trait JobExporter: Send {
    fn name(&self) -> &'static str;
    async fn export(&mut self, event: &JobEvent) -> Result<()>;
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ExportRecord<'a> {
    exported_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    event: &'a JobEvent,
}

/// Appends one JSON document per event to a file.
pub struct JsonLinesExporter {
    path: PathBuf,
    file: File,
}

impl JsonLinesExporter {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create export directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open export file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

#[async_trait::async_trait]
impl JobExporter for JsonLinesExporter {
    fn name(&self) -> &'static str {
        "JsonLines"
    }

    async fn export(&mut self, event: &JobEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&ExportRecord {
            exported_at: chrono::Utc::now(),
            event,
        })?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .with_context(|| format!("failed to write to {}", self.path.display()))
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

pub struct LogExporter;

#[async_trait::async_trait]
impl JobExporter for LogExporter {
    fn name(&self) -> &'static str {
        "Log"
    }

    async fn export(&mut self, event: &JobEvent) -> Result<()> {
        let entry = event.entry();
        info!(
            job_id = entry.job_id,
            pids = ?entry.pids,
            created_at = %entry.created_at,
            "{event}"
        );
        Ok(())
    }
}

pub struct ExportManager {
    exporters: Vec<Box<dyn JobExporter>>,
}

impl ExportManager {
    pub fn new() -> Self {
        Self {
            exporters: vec![Box::new(LogExporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            exporters: Vec::new(),
        }
    }

    pub fn register(&mut self, exporter: Box<dyn JobExporter>) {
        self.exporters.push(exporter);
    }

    /// A failing exporter is logged and does not hold back the others.
    pub async fn dispatch(&mut self, event: &JobEvent) {
        for exporter in &mut self.exporters {
            if let Err(e) = exporter.export(event).await {
                error!("{} exporter failed on {event}: {e:#}", exporter.name());
            }
        }
    }

    pub async fn flush_all(&mut self) {
        for exporter in &mut self.exporters {
            if let Err(e) = exporter.flush().await {
                error!("{} exporter failed to flush: {e:#}", exporter.name());
            }
        }
    }

    /// Forwards events until cancelled, then drains whatever is already queued.
    pub async fn run(mut self, mut events: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                biased;
                received = events.recv() => received,
                _ = cancel.cancelled() => break,
            };
            match received {
                Ok(event) => self.dispatch(&event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Export fell behind, {missed} job events were dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }

        loop {
            match events.try_recv() {
                Ok(event) => self.dispatch(&event).await,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Export fell behind, {missed} job events were dropped")
                }
                Err(_) => break,
            }
        }
        self.flush_all().await;
        debug!("Export task stopped");
    }
}

impl Default for ExportManager {
    fn default() -> Self {
        Self::new()
    }
}
