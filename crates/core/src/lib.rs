pub mod config;
pub mod domain;
pub mod errors;
pub mod store;
pub mod workflow;

pub use domain::approval::{
    ApprovalRequest, ApprovalStatus, HistoryEntry, HistoryEntryId, RequestId, ReviewRecord,
};
pub use errors::{FieldViolation, WorkflowError};
pub use store::{InMemoryRequestStore, RequestStore, ReviewTransition, StoreError};
pub use workflow::{
    ApprovalRequestView, CreateRequest, HistoryEntryView, ReviewRequest, WorkflowService,
};

// Re-exported so downstream crates agree on the chrono version used in
// domain timestamps.
pub use chrono;
