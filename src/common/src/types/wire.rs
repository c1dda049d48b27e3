use crate::types::job::{JobDescriptor, JobId};
use crate::types::timestamp::JobTimestamp;
use serde::{Deserialize, Serialize};

/// Job submission record as it travels over the job adder FIFO.
///
/// Every field is optional here so that a record missing one of them can be
/// told apart from a record that is not JSON at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireJobDescriptor {
    #[serde(rename = "JobID", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(rename = "JobPIDs", skip_serializing_if = "Option::is_none")]
    pub pids: Option<Vec<i64>>,
    #[serde(rename = "JobCreateTime", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<JobTimestamp>,
    #[serde(rename = "JobUpdate", default, skip_serializing_if = "std::ops::Not::not")]
    pub update: bool,
}

impl WireJobDescriptor {
    pub const JOB_ID: &'static str = "JobID";
    pub const PIDS: &'static str = "JobPIDs";
    pub const CREATED_AT: &'static str = "JobCreateTime";
}

impl From<&JobDescriptor> for WireJobDescriptor {
    fn from(descriptor: &JobDescriptor) -> Self {
        Self {
            job_id: Some(descriptor.job_id),
            pids: Some(descriptor.pids.clone()),
            created_at: Some(descriptor.created_at.clone()),
            update: descriptor.update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::timestamp::parse_timestamp;
    use serde_json::json;

    #[test]
    fn test_serializes_wire_field_names() {
        let descriptor =
            JobDescriptor::new(2, vec![1], parse_timestamp("2025-08-27 14:33:00").unwrap());
        let value = serde_json::to_value(WireJobDescriptor::from(&descriptor)).unwrap();
        assert_eq!(
            value,
            json!({"JobID": 2, "JobPIDs": [1], "JobCreateTime": "2025-08-27 14:33:00"})
        );
    }

    #[test]
    fn test_update_flag_only_sent_when_set() {
        let descriptor = JobDescriptor::new(7, vec![10, 11], JobTimestamp::sentinel()).as_update();
        let value = serde_json::to_value(WireJobDescriptor::from(&descriptor)).unwrap();
        assert_eq!(
            value,
            json!({"JobID": 7, "JobPIDs": [10, 11], "JobCreateTime": -1, "JobUpdate": true})
        );
    }

    #[test]
    fn test_missing_fields_deserialize_as_none() {
        let wire: WireJobDescriptor = serde_json::from_value(json!({"JobID": 4})).unwrap();
        assert_eq!(wire.job_id, Some(4));
        assert!(wire.pids.is_none());
        assert!(wire.created_at.is_none());
        assert!(!wire.update);
    }

    #[test]
    fn test_null_create_time_counts_as_missing() {
        let wire: WireJobDescriptor =
            serde_json::from_value(json!({"JobID": 4, "JobPIDs": [1], "JobCreateTime": null}))
                .unwrap();
        assert!(wire.created_at.is_none());
    }
}
