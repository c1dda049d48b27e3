use crate::config::Config;
use crate::exporter::{ExportManager, JsonLinesExporter};
use crate::launcher::{LaunchSpec, LaunchedJob};
use crate::reaper::{ProcessReaper, SignalProbe};
use anyhow::{Context, Result};
use joblens_ingest::{IngestStats, JobIngestor};
use joblens_registry::JobRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonExit {
    pub stats: IngestStats,
    /// Exit code of the launched program, if there was one.
    pub exit_code: Option<i32>,
}

pub struct Daemon {
    config: Config,
    registry: Arc<JobRegistry>,
}

async fn wait_for_stop(
    launched: Option<LaunchedJob>,
    shutdown: CancellationToken,
) -> Result<Option<i32>> {
    match launched {
        Some(job) => job.wait(shutdown).await.map(Some),
        None => {
            shutdown.cancelled().await;
            Ok(None)
        }
    }
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(JobRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    async fn export_manager(&self) -> Result<ExportManager> {
        let mut manager = ExportManager::new();
        if let Some(path) = &self.config.export.file {
            manager.register(Box::new(JsonLinesExporter::create(path).await?));
            info!("Exporting job events to {}", path.display());
        }
        Ok(manager)
    }

    /// Runs until `cancel` fires or, when `launch` is given, until the launched
    /// program exits. Failing to open the job channel is the only startup error
    /// tied to ingestion.
    pub async fn run(
        self,
        cancel: CancellationToken,
        launch: Option<LaunchSpec>,
    ) -> Result<DaemonExit> {
        let shutdown = cancel.child_token();
        let fifo = &self.config.collectors_config.job_adder_fifo;
        let ingestor = JobIngestor::bind(fifo, self.registry(), self.config.ingest_options())
            .with_context(|| format!("failed to open job channel {}", fifo.display()))?;

        let exports = self.export_manager().await?;
        let events = self.registry.subscribe();

        let launched = match &launch {
            Some(spec) => Some(LaunchedJob::start(spec, &self.registry).await?),
            None => None,
        };

        let export_cancel = CancellationToken::new();
        let export_task = tokio::spawn(exports.run(events, export_cancel.clone()));
        let reaper_task = self.config.reaper_interval().map(|interval| {
            let reaper = ProcessReaper::new(self.registry(), SignalProbe, interval);
            tokio::spawn(reaper.run(shutdown.clone()))
        });
        let mut ingest_task = tokio::spawn(ingestor.run(shutdown.clone()));
        info!("JobLens daemon started");

        let mut ingest_result = None;
        let exit_code = tokio::select! {
            code = wait_for_stop(launched, shutdown.clone()) => code,
            joined = &mut ingest_task => {
                ingest_result = Some(joined);
                Ok(None)
            }
        };
        shutdown.cancel();

        let ingest_result = match ingest_result {
            Some(joined) => joined,
            None => ingest_task.await,
        };
        if let Some(task) = reaper_task {
            task.await?;
        }
        // exporters stop last so they see every change made before shutdown
        export_cancel.cancel();
        export_task.await?;

        let stats = ingest_result
            .context("ingestion task panicked")?
            .context("job ingestion failed")?;
        let exit_code = exit_code?;
        let jobs = self.registry.len().await;
        info!(jobs, "JobLens daemon stopped");
        Ok(DaemonExit { stats, exit_code })
    }
}
