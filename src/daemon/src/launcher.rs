use anyhow::{Context, Result};
use chrono::Utc;
use joblens_common::constants::LAUNCHED_JOB_ID;
use joblens_common::{JobDescriptor, Pid};
use joblens_ingest::Validator;
use joblens_registry::JobRegistry;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A program the daemon starts and monitors as job [`LAUNCHED_JOB_ID`].
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Kill the program if it is still running after this long.
    pub timeout: Option<Duration>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Exit code as a shell reports it: the code itself, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

pub struct LaunchedJob {
    child: Child,
    pid: Pid,
    timeout: Option<Duration>,
}

impl LaunchedJob {
    /// Spawns the program and registers it. The job id is reserved, so an
    /// existing entry under it is replaced.
    pub async fn start(spec: &LaunchSpec, registry: &JobRegistry) -> Result<Self> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", spec.program))?;
        let pid = child
            .id()
            .context("launched program exited before it could be registered")?;
        let pid = Pid::try_from(pid).context("pid out of range")?;
        info!("Launched {} as pid {pid}", spec.program);

        let descriptor =
            JobDescriptor::new(LAUNCHED_JOB_ID, vec![i64::from(pid)], Utc::now()).as_update();
        let accepted = Validator::default()
            .validate(descriptor, registry)
            .await
            .context("failed to register launched program")?;
        registry.upsert(accepted.entry).await;

        Ok(Self {
            child,
            pid,
            timeout: spec.timeout,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Waits for the program to exit and returns its exit code. The program is
    /// killed on timeout or when `cancel` fires.
    pub async fn wait(mut self, cancel: CancellationToken) -> Result<i32> {
        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = self.child.wait() => status?,
            _ = deadline => {
                warn!("Launched pid {} killed on timeout", self.pid);
                self.child.kill().await?;
                self.child.wait().await?
            }
            _ = cancel.cancelled() => {
                info!("Stopping launched pid {}", self.pid);
                self.child.kill().await?;
                self.child.wait().await?
            }
        };

        let code = exit_code(status);
        info!("Launched pid {} exited with code {code}", self.pid);
        Ok(code)
    }
}
