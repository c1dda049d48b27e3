use joblens_common::constants::EVENT_CHANNEL_CAPACITY;
use joblens_common::{JobEvent, JobId, RegistryEntry};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// In-memory table of the jobs currently being monitored, keyed by job id.
///
/// Any number of readers (samplers, exporters, diagnostics) can query it while
/// the ingestion loop writes. Every mutation is published as a [`JobEvent`];
/// events are sent while the write lock is held so subscribers observe them in
/// mutation order. Sending never blocks: a subscriber that falls behind the
/// channel capacity loses the oldest events.
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<JobId, RegistryEntry>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Inserts or replaces the entry for `entry.job_id`, returning the replaced entry.
    pub async fn upsert(&self, entry: RegistryEntry) -> Option<RegistryEntry> {
        let mut jobs = self.jobs.write().await;
        let previous = jobs.insert(entry.job_id, entry.clone());
        let event = if previous.is_some() {
            JobEvent::Updated(entry)
        } else {
            JobEvent::Added(entry)
        };
        self.publish(event);
        previous
    }

    pub async fn get(&self, job_id: JobId) -> Option<RegistryEntry> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn contains(&self, job_id: JobId) -> bool {
        self.jobs.read().await.contains_key(&job_id)
    }

    /// Removes a job. Removing an id that is not registered is a no-op.
    pub async fn remove(&self, job_id: JobId) -> Option<RegistryEntry> {
        let mut jobs = self.jobs.write().await;
        let removed = jobs.remove(&job_id)?;
        self.publish(JobEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// Removes a job only if `predicate` holds for its current entry. The check
    /// and the removal happen under one write lock.
    pub async fn remove_if<F>(&self, job_id: JobId, predicate: F) -> Option<RegistryEntry>
    where
        F: FnOnce(&RegistryEntry) -> bool,
    {
        let mut jobs = self.jobs.write().await;
        if !jobs.get(&job_id).is_some_and(predicate) {
            return None;
        }
        let removed = jobs.remove(&job_id)?;
        self.publish(JobEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// Copy of every entry ordered by job id. Later mutations do not affect it.
    pub async fn list_all(&self) -> Vec<RegistryEntry> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Drops every job, publishing a removal for each. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let drained = std::mem::take(&mut *jobs);
        let count = drained.len();
        for entry in drained.into_values() {
            self.publish(JobEvent::Removed(entry));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    fn publish(&self, event: JobEvent) {
        debug!("{}", event);
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
