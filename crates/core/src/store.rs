//! Storage port for approval requests and their history.
//!
//! Implementations must make `create` and `apply_review` atomic: the request
//! row and its history entries land together or not at all, and the review
//! transition is guarded by the request still being `Pending` so that only
//! one of two racing reviews can succeed.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::{
    ApprovalRequest, ApprovalStatus, HistoryEntry, RequestId, ReviewRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("approval request `{0}` already exists")]
    DuplicateId(RequestId),
    #[error("approval request `{0}` not found")]
    NotFound(RequestId),
    #[error("approval request `{id}` is not pending (current status: {current})")]
    NotPending { id: RequestId, current: ApprovalStatus },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Everything a store needs to resolve a pending request in one atomic
/// write: the terminal status, the review fields, and the audit entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewTransition {
    pub new_status: ApprovalStatus,
    pub record: ReviewRecord,
    pub entry: HistoryEntry,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persists the request and its owned history atomically. Fails with
    /// [`StoreError::DuplicateId`] when the id is already taken.
    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Requests ordered by `created_at` descending, optionally filtered by
    /// status.
    async fn list_all(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    /// Conditional transition out of `Pending`. Applies the status change,
    /// the review fields, and the history append as one atomic update; a
    /// caller that loses the race observes [`StoreError::NotPending`].
    async fn apply_review(
        &self,
        id: &RequestId,
        transition: ReviewTransition,
    ) -> Result<ApprovalRequest, StoreError>;

    /// History entries ordered by timestamp ascending.
    /// [`StoreError::NotFound`] when no request with that id exists.
    async fn list_history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Lock-backed store for unit tests and local experiments. The single lock
/// gives the same only-one-review-wins guarantee the SQL store gets from a
/// guarded update.
#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: Mutex<HashMap<String, ApprovalRequest>>,
}

impl InMemoryRequestStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ApprovalRequest>> {
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut requests = self.lock();
        if requests.contains_key(&request.id.0) {
            return Err(StoreError::DuplicateId(request.id.clone()));
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.lock().get(&id.0).cloned())
    }

    async fn list_all(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let requests = self.lock();
        let mut matching: Vec<ApprovalRequest> = requests
            .values()
            .filter(|request| status.map_or(true, |wanted| request.status == wanted))
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(matching)
    }

    async fn apply_review(
        &self,
        id: &RequestId,
        transition: ReviewTransition,
    ) -> Result<ApprovalRequest, StoreError> {
        let mut requests = self.lock();
        let request =
            requests.get_mut(&id.0).ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if request.status != ApprovalStatus::Pending {
            return Err(StoreError::NotPending { id: id.clone(), current: request.status });
        }

        request.status = transition.new_status;
        request.review = Some(transition.record);
        request.history.push(transition.entry);
        Ok(request.clone())
    }

    async fn list_history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, StoreError> {
        let requests = self.lock();
        let request = requests.get(&id.0).ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let mut history = request.history.clone();
        history.sort_by(|left, right| left.timestamp.cmp(&right.timestamp));
        Ok(history)
    }
}
