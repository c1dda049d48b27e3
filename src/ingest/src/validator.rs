use chrono::{DateTime, Utc};
use joblens_common::{JobDescriptor, JobId, JobTimestamp, Pid, RegistryEntry};
use joblens_registry::JobRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do with a submission whose job id is already registered and which
/// is not flagged as an explicit update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("job {job_id} lists no processes")]
    NoProcesses { job_id: JobId },

    #[error("job {job_id} lists invalid process id {pid}")]
    InvalidProcessId { job_id: JobId, pid: i64 },

    #[error("job {job_id} has an invalid creation time {raw}")]
    InvalidTimestamp { job_id: JobId, raw: String },

    #[error("job {job_id} is already registered")]
    DuplicateJobId { job_id: JobId },
}

impl Rejection {
    pub fn job_id(&self) -> JobId {
        match self {
            Rejection::NoProcesses { job_id }
            | Rejection::InvalidProcessId { job_id, .. }
            | Rejection::InvalidTimestamp { job_id, .. }
            | Rejection::DuplicateJobId { job_id } => *job_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub entry: RegistryEntry,
    /// The job id was already registered and this entry will replace it.
    pub replaces: bool,
}

/// Applies the job rules to decoded descriptors. Rules run in a fixed order
/// and the first failure is reported:
///
/// 1. at least one pid
/// 2. every pid in `1..=i32::MAX`
/// 3. a parseable creation time
/// 4. the job id is new, unless the descriptor is an update or duplicates are overwritten
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    policy: DuplicatePolicy,
}

impl Validator {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy }
    }

    pub async fn validate(
        &self,
        descriptor: JobDescriptor,
        registry: &JobRegistry,
    ) -> Result<Accepted, Rejection> {
        let registered = registry.contains(descriptor.job_id).await;
        self.validate_with(descriptor, registered, Utc::now())
    }

    /// Validation against an explicit registry state and clock.
    pub fn validate_with(
        &self,
        descriptor: JobDescriptor,
        already_registered: bool,
        now: DateTime<Utc>,
    ) -> Result<Accepted, Rejection> {
        let job_id = descriptor.job_id;

        if descriptor.pids.is_empty() {
            return Err(Rejection::NoProcesses { job_id });
        }

        let mut pids: Vec<Pid> = Vec::with_capacity(descriptor.pids.len());
        for raw in descriptor.pids {
            let pid = Pid::try_from(raw)
                .ok()
                .filter(|pid| *pid > 0)
                .ok_or(Rejection::InvalidProcessId { job_id, pid: raw })?;
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }

        let created_at = match descriptor.created_at {
            JobTimestamp::Valid(ts) => ts,
            JobTimestamp::Invalid(raw) => {
                return Err(Rejection::InvalidTimestamp {
                    job_id,
                    raw: raw.to_string(),
                })
            }
        };

        if already_registered && !descriptor.update && self.policy == DuplicatePolicy::Reject {
            return Err(Rejection::DuplicateJobId { job_id });
        }

        Ok(Accepted {
            entry: RegistryEntry {
                job_id,
                pids,
                created_at,
                ingested_at: now,
            },
            replaces: already_registered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use joblens_common::types::timestamp::parse_timestamp;
    use rstest::rstest;
    use serde_json::json;

    fn created() -> JobTimestamp {
        JobTimestamp::Valid(parse_timestamp("2025-08-27 14:33:00").unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 27, 15, 0, 0).unwrap()
    }

    #[test]
    fn test_accepts_valid_descriptor() {
        let accepted = Validator::default()
            .validate_with(JobDescriptor::new(2, vec![1], created()), false, now())
            .unwrap();

        assert_eq!(accepted.entry.job_id, 2);
        assert_eq!(accepted.entry.pids, vec![1]);
        assert_eq!(Some(accepted.entry.created_at), created().valid());
        assert_eq!(accepted.entry.ingested_at, now());
        assert!(!accepted.replaces);
    }

    #[test]
    fn test_repeated_pids_are_collapsed_in_order() {
        let accepted = Validator::default()
            .validate_with(JobDescriptor::new(2, vec![30, 10, 30, 20, 10], created()), false, now())
            .unwrap();
        assert_eq!(accepted.entry.pids, vec![30, 10, 20]);
    }

    #[rstest]
    #[case::valid_time(created())]
    #[case::sentinel_time(JobTimestamp::sentinel())]
    #[case::garbage_time(JobTimestamp::Invalid(json!("soon")))]
    fn test_empty_pids_win_over_everything(#[case] created_at: JobTimestamp) {
        let rejection = Validator::default()
            .validate_with(JobDescriptor::new(3, vec![], created_at), true, now())
            .unwrap_err();
        assert_eq!(rejection, Rejection::NoProcesses { job_id: 3 });
    }

    #[rstest]
    #[case::zero(0)]
    #[case::negative(-4)]
    #[case::beyond_pid_range(i64::from(i32::MAX) + 1)]
    fn test_invalid_pids(#[case] pid: i64) {
        let rejection = Validator::default()
            .validate_with(JobDescriptor::new(5, vec![1, pid], created()), false, now())
            .unwrap_err();
        assert_eq!(rejection, Rejection::InvalidProcessId { job_id: 5, pid });
    }

    #[rstest]
    #[case::sentinel(JobTimestamp::sentinel(), "-1")]
    #[case::text(JobTimestamp::Invalid(json!("27/08/2025")), "\"27/08/2025\"")]
    fn test_invalid_timestamps(#[case] created_at: JobTimestamp, #[case] raw: &str) {
        let rejection = Validator::default()
            .validate_with(JobDescriptor::new(6, vec![1], created_at), false, now())
            .unwrap_err();
        assert_eq!(
            rejection,
            Rejection::InvalidTimestamp {
                job_id: 6,
                raw: raw.to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_rejected_by_default() {
        let rejection = Validator::new(DuplicatePolicy::Reject)
            .validate_with(JobDescriptor::new(7, vec![1], created()), true, now())
            .unwrap_err();
        assert_eq!(rejection, Rejection::DuplicateJobId { job_id: 7 });
        assert_eq!(rejection.job_id(), 7);
    }

    #[test]
    fn test_explicit_update_replaces_under_reject_policy() {
        let accepted = Validator::new(DuplicatePolicy::Reject)
            .validate_with(JobDescriptor::new(7, vec![2], created()).as_update(), true, now())
            .unwrap();
        assert!(accepted.replaces);
        assert_eq!(accepted.entry.pids, vec![2]);
    }

    #[test]
    fn test_duplicate_overwritten_under_overwrite_policy() {
        let accepted = Validator::new(DuplicatePolicy::Overwrite)
            .validate_with(JobDescriptor::new(7, vec![3], created()), true, now())
            .unwrap();
        assert!(accepted.replaces);
    }

    #[test]
    fn test_duplicate_check_runs_last() {
        let rejection = Validator::new(DuplicatePolicy::Reject)
            .validate_with(JobDescriptor::new(8, vec![1], JobTimestamp::sentinel()), true, now())
            .unwrap_err();
        assert!(matches!(rejection, Rejection::InvalidTimestamp { .. }));
    }

    #[tokio::test]
    async fn test_validate_consults_registry() {
        let registry = JobRegistry::new();
        let validator = Validator::default();

        let accepted = validator
            .validate(JobDescriptor::new(9, vec![1], created()), &registry)
            .await
            .unwrap();
        registry.upsert(accepted.entry).await;

        let rejection = validator
            .validate(JobDescriptor::new(9, vec![1], created()), &registry)
            .await
            .unwrap_err();
        assert_eq!(rejection, Rejection::DuplicateJobId { job_id: 9 });
    }
}
