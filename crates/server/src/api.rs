//! JSON API for the approval workflow.
//!
//! Endpoints:
//! - `POST /api/approvals`                — submit a new approval request
//! - `GET  /api/approvals`               — list requests, newest first (`?status=` filter)
//! - `GET  /api/approvals/{id}`          — fetch one request
//! - `POST /api/approvals/{id}/review`   — approve or reject a pending request
//! - `GET  /api/approvals/{id}/history`  — audit trail, oldest first

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use approvalflow_core::{
    ApprovalRequestView, CreateRequest, HistoryEntryView, RequestId, ReviewRequest,
    WorkflowError, WorkflowService,
};
use approvalflow_db::{DbPool, SqlRequestStore};

#[derive(Clone)]
pub struct ApiState {
    service: Arc<WorkflowService<SqlRequestStore>>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewBody {
    pub approved: bool,
    pub reviewer_id: String,
    pub reviewer_name: String,
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
}

pub fn router(db_pool: DbPool) -> Router {
    let service = Arc::new(WorkflowService::new(SqlRequestStore::new(db_pool)));

    Router::new()
        .route("/api/approvals", post(create_request).get(list_requests))
        .route("/api/approvals/{id}", get(get_request))
        .route("/api/approvals/{id}/review", post(review_request))
        .route("/api/approvals/{id}/history", get(get_history))
        .with_state(ApiState { service })
}

async fn create_request(
    State(state): State<ApiState>,
    Json(body): Json<CreateRequest>,
) -> Result<(StatusCode, Json<ApprovalRequestView>), ApiError> {
    let view = state.service.create(body).await.map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_request(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<ApprovalRequestView>, ApiError> {
    let view = state.service.get(&RequestId(id)).await.map_err(map_error)?;
    Ok(Json(view))
}

async fn list_requests(
    Query(query): Query<ListQuery>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<ApprovalRequestView>>, ApiError> {
    let views = state.service.list(query.status.as_deref()).await.map_err(map_error)?;
    Ok(Json(views))
}

async fn review_request(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<ApprovalRequestView>, ApiError> {
    let input = ReviewRequest {
        request_id: RequestId(id),
        approved: body.approved,
        reviewer_id: body.reviewer_id,
        reviewer_name: body.reviewer_name,
        comments: body.comments,
    };
    let view = state.service.review(input).await.map_err(map_error)?;
    Ok(Json(view))
}

async fn get_history(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<HistoryEntryView>>, ApiError> {
    let entries = state.service.history(&RequestId(id)).await.map_err(map_error)?;
    Ok(Json(entries))
}

fn map_error(error: WorkflowError) -> ApiError {
    match error {
        WorkflowError::Validation(violations) => {
            let errors = violations
                .into_iter()
                .map(|violation| FieldError {
                    field: violation.field.to_string(),
                    message: violation.message,
                })
                .collect();
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody { message: "Validation failed".to_string(), errors: Some(errors) }),
            )
        }
        error @ WorkflowError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody { message: error.to_string(), errors: None }),
        ),
        error @ WorkflowError::BusinessRule { .. } => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { message: error.to_string(), errors: None }),
        ),
        WorkflowError::Store(detail) => {
            error!(event_name = "api.store_error", error = %detail, "request store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    message: "An unexpected error occurred".to_string(),
                    errors: None,
                }),
            )
        }
    }
}
