//! The approval state machine: `Pending -> Approved | Rejected`, exactly one
//! transition per request, with an append-only audit trail.

pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::approval::{
    ApprovalRequest, ApprovalStatus, HistoryEntry, HistoryEntryId, RequestId, ReviewRecord,
};
use crate::errors::WorkflowError;
use crate::store::{RequestStore, ReviewTransition, StoreError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub title: String,
    pub description: String,
    pub requester_id: String,
    pub requester_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewRequest {
    pub request_id: RequestId,
    pub approved: bool,
    pub reviewer_id: String,
    pub reviewer_name: String,
    pub comments: Option<String>,
}

/// Caller-facing projection of a request. `status` is rendered as its
/// display name (`"Pending"`, `"Approved"`, `"Rejected"`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub requester_id: String,
    pub requester_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<String>,
    pub reviewer_name: Option<String>,
    pub review_comments: Option<String>,
}

impl From<&ApprovalRequest> for ApprovalRequestView {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            id: request.id.0.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
            requester_id: request.requester_id.clone(),
            requester_name: request.requester_name.clone(),
            status: request.status.name().to_string(),
            created_at: request.created_at,
            reviewed_at: request.review.as_ref().map(|review| review.reviewed_at),
            reviewer_id: request.review.as_ref().map(|review| review.reviewer_id.clone()),
            reviewer_name: request.review.as_ref().map(|review| review.reviewer_name.clone()),
            review_comments: request.review.as_ref().and_then(|review| review.comments.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryView {
    pub id: String,
    pub from_status: String,
    pub to_status: String,
    pub actor_id: String,
    pub actor_name: String,
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&HistoryEntry> for HistoryEntryView {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: entry.id.0.clone(),
            from_status: entry.from_status.name().to_string(),
            to_status: entry.to_status.name().to_string(),
            actor_id: entry.actor_id.clone(),
            actor_name: entry.actor_name.clone(),
            comments: entry.comments.clone(),
            timestamp: entry.timestamp,
        }
    }
}

/// Enforces the state machine on top of a [`RequestStore`]. Each operation
/// is one atomic read-modify-write against the store; no partial state is
/// ever observable.
pub struct WorkflowService<S> {
    store: S,
}

impl<S> WorkflowService<S>
where
    S: RequestStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: CreateRequest) -> Result<ApprovalRequestView, WorkflowError> {
        let violations = validation::validate_create(&input);
        if !violations.is_empty() {
            return Err(WorkflowError::Validation(violations));
        }

        let request = ApprovalRequest::new(
            input.title,
            input.description,
            input.requester_id,
            input.requester_name,
        );
        self.store.create(&request).await.map_err(map_store_error)?;

        info!(
            event_name = "workflow.request.created",
            request_id = %request.id,
            requester_id = %request.requester_id,
            "approval request created"
        );
        Ok(ApprovalRequestView::from(&request))
    }

    pub async fn review(&self, input: ReviewRequest) -> Result<ApprovalRequestView, WorkflowError> {
        let violations = validation::validate_review(&input);
        if !violations.is_empty() {
            return Err(WorkflowError::Validation(violations));
        }

        let new_status =
            if input.approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
        let now = Utc::now();
        let transition = ReviewTransition {
            new_status,
            record: ReviewRecord {
                reviewed_at: now,
                reviewer_id: input.reviewer_id.clone(),
                reviewer_name: input.reviewer_name.clone(),
                comments: input.comments.clone(),
            },
            entry: HistoryEntry {
                id: HistoryEntryId::generate(),
                request_id: input.request_id.clone(),
                from_status: ApprovalStatus::Pending,
                to_status: new_status,
                actor_id: input.reviewer_id,
                actor_name: input.reviewer_name,
                comments: input.comments,
                timestamp: now,
            },
        };

        let updated = self
            .store
            .apply_review(&input.request_id, transition)
            .await
            .map_err(map_store_error)?;

        info!(
            event_name = "workflow.request.reviewed",
            request_id = %updated.id,
            status = updated.status.as_str(),
            "approval request reviewed"
        );
        Ok(ApprovalRequestView::from(&updated))
    }

    pub async fn get(&self, id: &RequestId) -> Result<ApprovalRequestView, WorkflowError> {
        let request = self
            .store
            .find_by_id(id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))?;
        Ok(ApprovalRequestView::from(&request))
    }

    /// Requests newest first. The filter is a case-insensitive status name;
    /// an unparseable filter is ignored and the full list is returned.
    pub async fn list(
        &self,
        status_filter: Option<&str>,
    ) -> Result<Vec<ApprovalRequestView>, WorkflowError> {
        let status = status_filter.and_then(ApprovalStatus::parse);
        let requests = self.store.list_all(status).await.map_err(map_store_error)?;
        Ok(requests.iter().map(ApprovalRequestView::from).collect())
    }

    pub async fn history(&self, id: &RequestId) -> Result<Vec<HistoryEntryView>, WorkflowError> {
        let entries = self.store.list_history(id).await.map_err(map_store_error)?;
        Ok(entries.iter().map(HistoryEntryView::from).collect())
    }
}

fn map_store_error(error: StoreError) -> WorkflowError {
    match error {
        StoreError::NotFound(id) => WorkflowError::NotFound(id),
        StoreError::NotPending { id, current } => {
            WorkflowError::BusinessRule { id, status: current }
        }
        other => WorkflowError::Store(other.to_string()),
    }
}
