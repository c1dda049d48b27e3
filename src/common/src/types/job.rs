use crate::types::timestamp::JobTimestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = i64;
pub type Pid = i32;

/// A decoded job submission. Fields are typed but not yet validated: `pids`
/// may be empty or hold non-positive values and `created_at` may be invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub pids: Vec<i64>,
    pub created_at: JobTimestamp,
    /// Set when the caller explicitly asks to replace an existing job.
    pub update: bool,
}

impl JobDescriptor {
    pub fn new(job_id: JobId, pids: Vec<i64>, created_at: impl Into<JobTimestamp>) -> Self {
        Self {
            job_id,
            pids,
            created_at: created_at.into(),
            update: false,
        }
    }

    pub fn as_update(mut self) -> Self {
        self.update = true;
        self
    }
}

/// A job tracked by the registry. Only built from a descriptor that passed
/// validation, so `pids` is never empty and `created_at` is a real time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub job_id: JobId,
    pub pids: Vec<Pid>,
    pub created_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}
