use crate::error::ValidationError;
use crate::types::*;

/// Per-item invariants checked before a request may reach a brain.
///
/// Checks run in a fixed priority order and report only the first failure.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for LrpStartRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.process_guid.is_empty() {
            return Err(ValidationError::EmptyProcessGuid);
        }
        if self.domain.is_empty() {
            return Err(ValidationError::EmptyDomain);
        }
        if self.indices.is_empty() {
            return Err(ValidationError::EmptyIndices);
        }
        if self.resource.is_empty() {
            return Err(ValidationError::EmptyResource);
        }
        Ok(())
    }
}

impl Validate for TaskStartRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.task_guid.is_empty() {
            return Err(ValidationError::EmptyTaskGuid);
        }
        if self.resource.is_empty() {
            return Err(ValidationError::EmptyResource);
        }
        Ok(())
    }
}
