use crate::types::job::RegistryEntry;
use serde::{Deserialize, Serialize};

/// Change to the job registry, published to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "job", rename_all = "snake_case")]
pub enum JobEvent {
    Added(RegistryEntry),
    Updated(RegistryEntry),
    Removed(RegistryEntry),
}

impl JobEvent {
    pub fn entry(&self) -> &RegistryEntry {
        match self {
            JobEvent::Added(entry) | JobEvent::Updated(entry) | JobEvent::Removed(entry) => entry,
        }
    }
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobEvent::Added(entry) => write!(f, "job {} added", entry.job_id),
            JobEvent::Updated(entry) => write!(f, "job {} updated", entry.job_id),
            JobEvent::Removed(entry) => write!(f, "job {} removed", entry.job_id),
        }
    }
}
