use joblens_common::{JobDescriptor, JobId, WireJobDescriptor};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed job descriptor: {reason}")]
    Malformed { reason: String },

    #[error("job descriptor is missing {field}")]
    MissingField {
        field: &'static str,
        job_id: Option<JobId>,
    },
}

impl DecodeError {
    fn malformed(reason: impl ToString) -> Self {
        DecodeError::Malformed {
            reason: reason.to_string(),
        }
    }

    /// Job id of the offending message, when it could be read.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            DecodeError::Malformed { .. } => None,
            DecodeError::MissingField { job_id, .. } => *job_id,
        }
    }
}

/// Turns one frame payload into a typed descriptor.
///
/// Only structure is checked here. Empty pid lists, bad pids and invalid
/// timestamps decode fine and are left to the validator.
pub fn decode(payload: &[u8]) -> Result<JobDescriptor, DecodeError> {
    let value: Value = serde_json::from_slice(payload).map_err(DecodeError::malformed)?;
    if !value.is_object() {
        return Err(DecodeError::malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    let wire: WireJobDescriptor = serde_json::from_value(value).map_err(DecodeError::malformed)?;

    let job_id = wire.job_id.ok_or(DecodeError::MissingField {
        field: WireJobDescriptor::JOB_ID,
        job_id: None,
    })?;
    let pids = wire.pids.ok_or(DecodeError::MissingField {
        field: WireJobDescriptor::PIDS,
        job_id: Some(job_id),
    })?;
    let created_at = wire.created_at.ok_or(DecodeError::MissingField {
        field: WireJobDescriptor::CREATED_AT,
        job_id: Some(job_id),
    })?;

    Ok(JobDescriptor {
        job_id,
        pids,
        created_at,
        update: wire.update,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
