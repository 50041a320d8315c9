use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{ApprovalStatus, RequestId};

/// One violated input constraint. Validation reports every violation in a
/// request, not just the first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("validation failed: {}", describe_violations(.0))]
    Validation(Vec<FieldViolation>),
    #[error("approval request `{0}` not found")]
    NotFound(RequestId),
    #[error("cannot review request `{id}`: current status is {status}")]
    BusinessRule { id: RequestId, status: ApprovalStatus },
    #[error("persistence failure: {0}")]
    Store(String),
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|violation| format!("{}: {}", violation.field, violation.message))
        .collect::<Vec<_>>()
        .join("; ")
}
