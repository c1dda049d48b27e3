use joblens_common::{JobId, Pid};
use joblens_registry::JobRegistry;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid as NixPid;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: Pid) -> bool;
}

/// Probes with signal 0. A process we may not signal still exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: Pid) -> bool {
        match kill(NixPid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Drops jobs from the registry once every one of their processes is gone.
pub struct ProcessReaper<P = SignalProbe> {
    registry: Arc<JobRegistry>,
    probe: P,
    interval: Duration,
}

impl<P: ProcessProbe> ProcessReaper<P> {
    pub fn new(registry: Arc<JobRegistry>, probe: P, interval: Duration) -> Self {
        Self {
            registry,
            probe,
            interval,
        }
    }

    fn all_dead(&self, pids: &[Pid]) -> bool {
        pids.iter().all(|pid| !self.probe.is_alive(*pid))
    }

    /// One pass over the registry. Returns the ids that were removed.
    pub async fn sweep(&self) -> Vec<JobId> {
        let mut reaped = Vec::new();
        for entry in self.registry.list_all().await {
            if !self.all_dead(&entry.pids) {
                continue;
            }
            // the entry may have been replaced since the snapshot
            if let Some(removed) = self
                .registry
                .remove_if(entry.job_id, |current| self.all_dead(&current.pids))
                .await
            {
                info!(job_id = removed.job_id, pids = ?removed.pids, "Job finished, all processes exited");
                reaped.push(removed.job_id);
            }
        }
        reaped
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Process reaper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
