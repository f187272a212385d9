pub mod validator;

pub use validator::Validate;

use crate::error::{IntakeError, ValidationError};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Result of decoding one LRP start payload.
#[derive(Debug, Default)]
pub struct LrpBatch {
    /// Valid requests, in the order they were received.
    pub accepted: Vec<LrpStartRequest>,
    /// Position and reason of every dropped request.
    pub rejected: Vec<(usize, ValidationError)>,
}

impl LrpBatch {
    pub fn received(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }
}

/// Decodes a JSON array of LRP starts and keeps only the valid ones.
///
/// A payload that is not an array of LRP descriptors fails as a whole.
/// Individual invalid items are logged and dropped without affecting the rest.
pub fn decode_lrp_batch(payload: &[u8]) -> Result<LrpBatch, IntakeError> {
    let items = match serde_json::from_slice::<Value>(payload)? {
        Value::Array(items) => items,
        other => return Err(shape_error("an array of LRP starts", &other).into()),
    };
    let starts = items
        .into_iter()
        .map(from_object::<LrpStartRequest>)
        .collect::<Result<Vec<_>, _>>()?;

    let mut batch = LrpBatch {
        accepted: Vec::with_capacity(starts.len()),
        rejected: Vec::new(),
    };

    for (position, start) in starts.into_iter().enumerate() {
        match start.validate() {
            Ok(()) => batch.accepted.push(start),
            Err(e) => {
                warn!(
                    position,
                    process_guid = %start.process_guid,
                    "Dropping invalid LRP start: {}",
                    e
                );
                batch.rejected.push((position, e));
            }
        }
    }

    Ok(batch)
}

/// Decodes and validates a single task start.
pub fn decode_task(payload: &[u8]) -> Result<TaskStartRequest, IntakeError> {
    let task: TaskStartRequest = from_object(serde_json::from_slice(payload)?)?;
    task.validate()?;
    Ok(task)
}

/// Request types default every field, so serde would also accept a JSON
/// array positionally. Only objects are descriptors.
fn from_object<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    if !value.is_object() {
        return Err(shape_error("an object", &value));
    }
    serde_json::from_value(value)
}

fn shape_error(expected: &str, found: &Value) -> serde_json::Error {
    let kind = match found {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    serde::de::Error::custom(format!("expected {}, found {}", expected, kind))
}
