//! Harness for driving a complete monitor through a real FIFO in a temporary
//! directory.

use joblens_common::constants::DEFAULT_MAX_FRAME_BYTES;
use joblens_common::JobEvent;
use joblens_daemon::config::{CollectorsConfig, ExportConfig, LogConfig};
use joblens_daemon::{Config, Daemon, DaemonExit, LaunchSpec};
use joblens_ingest::{ChannelWriter, DuplicatePolicy};
use joblens_registry::JobRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        collectors_config: CollectorsConfig {
            job_adder_fifo: dir.path().join("job_adder.fifo"),
        },
        duplicate_policy: DuplicatePolicy::Reject,
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        reaper_interval_ms: 0,
        export: ExportConfig {
            file: Some(dir.path().join("jobs.jsonl")),
        },
        log: LogConfig {
            level: "debug".to_string(),
            file: None,
        },
        config_sources: vec![],
    }
}

pub struct TestMonitor {
    pub dir: TempDir,
    pub fifo: PathBuf,
    pub registry: Arc<JobRegistry>,
    events: broadcast::Receiver<JobEvent>,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<DaemonExit>>,
}

impl TestMonitor {
    pub async fn start() -> Self {
        Self::start_with(|_| {}, None).await
    }

    pub async fn start_with(
        customize: impl FnOnce(&mut Config),
        launch: Option<LaunchSpec>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        customize(&mut config);
        let fifo = config.collectors_config.job_adder_fifo.clone();

        let daemon = Daemon::new(config);
        let registry = daemon.registry();
        let events = registry.subscribe();
        let cancel = CancellationToken::new();
        let wait_for_channel = launch.is_none();
        let task = tokio::spawn(daemon.run(cancel.clone(), launch));

        let monitor = Self {
            dir,
            fifo,
            registry,
            events,
            cancel,
            task,
        };
        // a launched program may finish before anyone connects
        if wait_for_channel {
            drop(monitor.wait_for_writer().await);
        }
        monitor
    }

    /// Opens a writer once the monitor has the FIFO open.
    pub async fn wait_for_writer(&self) -> ChannelWriter {
        timeout(WAIT, async {
            loop {
                match ChannelWriter::open(&self.fifo) {
                    Ok(writer) => break writer,
                    Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .expect("monitor never opened the job channel")
    }

    pub async fn next_event(&mut self) -> JobEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a job event")
            .expect("event channel closed")
    }

    pub async fn stop(self) -> (DaemonExit, TempDir) {
        self.cancel.cancel();
        let exit = timeout(WAIT, self.task)
            .await
            .expect("monitor did not stop")
            .unwrap()
            .unwrap();
        (exit, self.dir)
    }

    /// Waits for the monitor to stop on its own.
    pub async fn join(self) -> (DaemonExit, TempDir) {
        let exit = timeout(WAIT, self.task)
            .await
            .expect("monitor did not stop")
            .unwrap()
            .unwrap();
        (exit, self.dir)
    }
}

/// Records written by the JSON-lines exporter of a monitor rooted in `dir`.
pub fn export_lines(dir: &TempDir) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.path().join("jobs.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Reference submission line, newline included.
pub fn submission(job_id: i64, pids: &[i64], created_at: serde_json::Value) -> Vec<u8> {
    let mut line = serde_json::to_vec(&serde_json::json!({
        "JobID": job_id,
        "JobPIDs": pids,
        "JobCreateTime": created_at,
    }))
    .unwrap();
    line.push(b'\n');
    line
}
