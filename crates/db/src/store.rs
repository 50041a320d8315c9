use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use approvalflow_core::{
    ApprovalRequest, ApprovalStatus, HistoryEntry, HistoryEntryId, RequestId, RequestStore,
    ReviewRecord, ReviewTransition, StoreError,
};

use crate::DbPool;

/// SQLite-backed [`RequestStore`]. Create and review both run inside a
/// transaction; the review transition is guarded by `status = 'pending'` so
/// a racing second review fails instead of overwriting a terminal state.
pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode(message: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("decode error: {message}"))
}

fn parse_status(raw: &str) -> Result<ApprovalStatus, StoreError> {
    ApprovalStatus::parse(raw).ok_or_else(|| decode(format!("unknown status `{raw}`")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| decode(format!("bad timestamp `{raw}`: {error}")))
}

const REQUEST_COLUMNS: &str = "id, title, description, requester_id, requester_name, status,
            created_at, reviewed_at, reviewer_id, reviewer_name, review_comments";

const HISTORY_COLUMNS: &str =
    "id, request_id, from_status, to_status, actor_id, actor_name, comments, timestamp";

fn request_from_row(row: &SqliteRow, history: Vec<HistoryEntry>) -> Result<ApprovalRequest, StoreError> {
    let status_raw: String = row.try_get("status").map_err(|e| decode(e))?;
    let created_at_raw: String = row.try_get("created_at").map_err(|e| decode(e))?;
    let reviewed_at_raw: Option<String> = row.try_get("reviewed_at").map_err(|e| decode(e))?;
    let reviewer_id: Option<String> = row.try_get("reviewer_id").map_err(|e| decode(e))?;
    let reviewer_name: Option<String> = row.try_get("reviewer_name").map_err(|e| decode(e))?;
    let review_comments: Option<String> =
        row.try_get("review_comments").map_err(|e| decode(e))?;

    // The review fields are written together; a row either has all of the
    // required ones or none.
    let review = match (reviewed_at_raw, reviewer_id, reviewer_name) {
        (Some(reviewed_at), Some(reviewer_id), Some(reviewer_name)) => Some(ReviewRecord {
            reviewed_at: parse_timestamp(&reviewed_at)?,
            reviewer_id,
            reviewer_name,
            comments: review_comments,
        }),
        (None, None, None) => None,
        _ => return Err(decode("partially populated review columns")),
    };

    Ok(ApprovalRequest {
        id: RequestId(row.try_get("id").map_err(|e| decode(e))?),
        title: row.try_get("title").map_err(|e| decode(e))?,
        description: row.try_get("description").map_err(|e| decode(e))?,
        requester_id: row.try_get("requester_id").map_err(|e| decode(e))?,
        requester_name: row.try_get("requester_name").map_err(|e| decode(e))?,
        status: parse_status(&status_raw)?,
        created_at: parse_timestamp(&created_at_raw)?,
        review,
        history,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry, StoreError> {
    let from_status_raw: String = row.try_get("from_status").map_err(|e| decode(e))?;
    let to_status_raw: String = row.try_get("to_status").map_err(|e| decode(e))?;
    let timestamp_raw: String = row.try_get("timestamp").map_err(|e| decode(e))?;

    Ok(HistoryEntry {
        id: HistoryEntryId(row.try_get("id").map_err(|e| decode(e))?),
        request_id: RequestId(row.try_get("request_id").map_err(|e| decode(e))?),
        from_status: parse_status(&from_status_raw)?,
        to_status: parse_status(&to_status_raw)?,
        actor_id: row.try_get("actor_id").map_err(|e| decode(e))?,
        actor_name: row.try_get("actor_name").map_err(|e| decode(e))?,
        comments: row.try_get("comments").map_err(|e| decode(e))?,
        timestamp: parse_timestamp(&timestamp_raw)?,
    })
}

async fn insert_history_entry(
    conn: &mut SqliteConnection,
    entry: &HistoryEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO approval_history (
            id, request_id, from_status, to_status, actor_id, actor_name, comments, timestamp
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id.0)
    .bind(&entry.request_id.0)
    .bind(entry.from_status.as_str())
    .bind(entry.to_status.as_str())
    .bind(&entry.actor_id)
    .bind(&entry.actor_name)
    .bind(entry.comments.as_deref())
    .bind(entry.timestamp.to_rfc3339())
    .execute(conn)
    .await
    .map_err(backend)?;

    Ok(())
}

async fn load_history(
    conn: &mut SqliteConnection,
    id: &RequestId,
) -> Result<Vec<HistoryEntry>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {HISTORY_COLUMNS} FROM approval_history
         WHERE request_id = ?
         ORDER BY timestamp ASC"
    ))
    .bind(&id.0)
    .fetch_all(conn)
    .await
    .map_err(backend)?;

    rows.iter().map(entry_from_row).collect()
}

async fn load_request(
    conn: &mut SqliteConnection,
    id: &RequestId,
) -> Result<Option<ApprovalRequest>, StoreError> {
    let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

    match row {
        Some(row) => {
            let history = load_history(conn, id).await?;
            Ok(Some(request_from_row(&row, history)?))
        }
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl RequestStore for SqlRequestStore {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let insert = sqlx::query(&format!(
            "INSERT INTO approval_request ({REQUEST_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&request.id.0)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.requester_id)
        .bind(&request.requester_name)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.review.as_ref().map(|review| review.reviewed_at.to_rfc3339()))
        .bind(request.review.as_ref().map(|review| review.reviewer_id.as_str()))
        .bind(request.review.as_ref().map(|review| review.reviewer_name.as_str()))
        .bind(request.review.as_ref().and_then(|review| review.comments.as_deref()))
        .execute(&mut *tx)
        .await;

        if let Err(error) = insert {
            if matches!(&error, sqlx::Error::Database(db) if db.is_unique_violation()) {
                return Err(StoreError::DuplicateId(request.id.clone()));
            }
            return Err(backend(error));
        }

        for entry in &request.history {
            insert_history_entry(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        load_request(&mut conn, id).await
    }

    async fn list_all(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_request
                 WHERE status = ?
                 ORDER BY created_at DESC"
            ))
            .bind(status.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(backend)?
        } else {
            sqlx::query(&format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_request ORDER BY created_at DESC"
            ))
            .fetch_all(&mut *conn)
            .await
            .map_err(backend)?
        };

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // One IN-clause query for the history of every listed request.
        let ids: Vec<String> =
            rows.iter().map(|row| row.try_get("id").map_err(|e| decode(e))).collect::<Result<_, _>>()?;
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {HISTORY_COLUMNS} FROM approval_history WHERE request_id IN ("
        ));
        {
            let mut separated = builder.separated(", ");
            for id in &ids {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(") ORDER BY timestamp ASC");
        }
        let history_rows = builder.build().fetch_all(&mut *conn).await.map_err(backend)?;

        let mut history_by_request: HashMap<String, Vec<HistoryEntry>> = HashMap::new();
        for row in &history_rows {
            let entry = entry_from_row(row)?;
            history_by_request.entry(entry.request_id.0.clone()).or_default().push(entry);
        }

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|e| decode(e))?;
                let history = history_by_request.remove(&id).unwrap_or_default();
                request_from_row(row, history)
            })
            .collect()
    }

    async fn apply_review(
        &self,
        id: &RequestId,
        transition: ReviewTransition,
    ) -> Result<ApprovalRequest, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM approval_request WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
        let current = match current {
            Some(raw) => parse_status(&raw)?,
            None => return Err(StoreError::NotFound(id.clone())),
        };
        if current != ApprovalStatus::Pending {
            return Err(StoreError::NotPending { id: id.clone(), current });
        }

        let updated = sqlx::query(
            "UPDATE approval_request
             SET status = ?, reviewed_at = ?, reviewer_id = ?, reviewer_name = ?,
                 review_comments = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(transition.new_status.as_str())
        .bind(transition.record.reviewed_at.to_rfc3339())
        .bind(&transition.record.reviewer_id)
        .bind(&transition.record.reviewer_name)
        .bind(transition.record.comments.as_deref())
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            // Lost a race between our status read and the guarded update.
            return Err(StoreError::NotPending { id: id.clone(), current });
        }

        insert_history_entry(&mut tx, &transition.entry).await?;

        let request = load_request(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::Backend("request row vanished mid-transaction".into()))?;

        tx.commit().await.map_err(backend)?;
        Ok(request)
    }

    async fn list_history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM approval_request WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&mut *conn)
                .await
                .map_err(backend)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }

        load_history(&mut conn, id).await
    }
}

#[cfg(test)]
mod tests {
    use approvalflow_core::chrono::{Duration, Utc};
    use approvalflow_core::{
        ApprovalRequest, ApprovalStatus, HistoryEntry, HistoryEntryId, RequestId, RequestStore,
        ReviewRecord, ReviewTransition, StoreError,
    };

    use super::SqlRequestStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlRequestStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRequestStore::new(pool)
    }

    fn sample_request(title: &str) -> ApprovalRequest {
        ApprovalRequest::new(title, "Q3 travel", "u1", "Alice")
    }

    fn review_transition(request: &ApprovalRequest, approved: bool) -> ReviewTransition {
        let new_status =
            if approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
        let now = Utc::now();
        ReviewTransition {
            new_status,
            record: ReviewRecord {
                reviewed_at: now,
                reviewer_id: "u2".to_string(),
                reviewer_name: "Bob".to_string(),
                comments: Some("Over budget".to_string()),
            },
            entry: HistoryEntry {
                id: HistoryEntryId::generate(),
                request_id: request.id.clone(),
                from_status: ApprovalStatus::Pending,
                to_status: new_status,
                actor_id: "u2".to_string(),
                actor_name: "Bob".to_string(),
                comments: Some("Over budget".to_string()),
                timestamp: now,
            },
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trips_request_with_history() {
        let store = setup().await;
        let request = sample_request("Expense report");

        store.create(&request).await.expect("create");
        let found = store.find_by_id(&request.id).await.expect("find").expect("exists");

        assert_eq!(found.id, request.id);
        assert_eq!(found.title, "Expense report");
        assert_eq!(found.status, ApprovalStatus::Pending);
        assert!(found.review.is_none());
        assert_eq!(found.history.len(), 1);
        assert_eq!(found.history[0].comments.as_deref(), Some("Request created"));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = setup().await;
        let request = sample_request("Expense report");

        store.create(&request).await.expect("first create");
        let mut clashing = sample_request("Different title");
        clashing.id = request.id.clone();
        clashing.history[0].request_id = request.id.clone();

        let error = store.create(&clashing).await.expect_err("duplicate id");
        assert!(matches!(error, StoreError::DuplicateId(ref id) if *id == request.id));

        // The failed create must not leave orphan history behind.
        let history = store.list_history(&request.id).await.expect("history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn find_unknown_id_returns_none() {
        let store = setup().await;
        let found =
            store.find_by_id(&RequestId("missing".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn list_all_orders_by_created_at_descending() {
        let store = setup().await;

        let mut oldest = sample_request("Oldest");
        oldest.created_at = oldest.created_at - Duration::seconds(120);
        oldest.history[0].timestamp = oldest.created_at;
        store.create(&oldest).await.expect("create oldest");

        let mut middle = sample_request("Middle");
        middle.created_at = middle.created_at - Duration::seconds(60);
        middle.history[0].timestamp = middle.created_at;
        store.create(&middle).await.expect("create middle");

        let newest = sample_request("Newest");
        store.create(&newest).await.expect("create newest");

        let listed = store.list_all(None).await.expect("list");
        let titles: Vec<&str> = listed.iter().map(|request| request.title.as_str()).collect();
        assert_eq!(titles, vec!["Newest", "Middle", "Oldest"]);
        assert!(listed.iter().all(|request| request.history.len() == 1));
    }

    #[tokio::test]
    async fn list_all_filters_by_status() {
        let store = setup().await;

        let pending = sample_request("Still pending");
        store.create(&pending).await.expect("create pending");

        let reviewed = sample_request("Reviewed");
        store.create(&reviewed).await.expect("create reviewed");
        store
            .apply_review(&reviewed.id, review_transition(&reviewed, true))
            .await
            .expect("review");

        let approved =
            store.list_all(Some(ApprovalStatus::Approved)).await.expect("filtered");
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].title, "Reviewed");

        let still_pending =
            store.list_all(Some(ApprovalStatus::Pending)).await.expect("filtered");
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].title, "Still pending");
    }

    #[tokio::test]
    async fn apply_review_persists_review_fields_and_history() {
        let store = setup().await;
        let request = sample_request("Expense report");
        store.create(&request).await.expect("create");

        let updated = store
            .apply_review(&request.id, review_transition(&request, false))
            .await
            .expect("review");

        assert_eq!(updated.status, ApprovalStatus::Rejected);
        let review = updated.review.expect("review record");
        assert_eq!(review.reviewer_id, "u2");
        assert_eq!(review.reviewer_name, "Bob");
        assert_eq!(review.comments.as_deref(), Some("Over budget"));
        assert_eq!(updated.history.len(), 2);
        assert_eq!(updated.history[1].to_status, ApprovalStatus::Rejected);

        // Durable, not just the returned value.
        let reloaded =
            store.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(reloaded.status, ApprovalStatus::Rejected);
        assert_eq!(reloaded.history.len(), 2);
    }

    #[tokio::test]
    async fn second_review_fails_with_not_pending_and_changes_nothing() {
        let store = setup().await;
        let request = sample_request("Expense report");
        store.create(&request).await.expect("create");

        store
            .apply_review(&request.id, review_transition(&request, true))
            .await
            .expect("first review");
        let error = store
            .apply_review(&request.id, review_transition(&request, false))
            .await
            .expect_err("second review");

        assert!(matches!(
            error,
            StoreError::NotPending { current: ApprovalStatus::Approved, .. }
        ));

        let after = store.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(after.status, ApprovalStatus::Approved);
        assert_eq!(after.history.len(), 2);
    }

    #[tokio::test]
    async fn apply_review_on_unknown_id_is_not_found() {
        let store = setup().await;
        let phantom = sample_request("Phantom");

        let error = store
            .apply_review(&phantom.id, review_transition(&phantom, true))
            .await
            .expect_err("unknown id");
        assert!(matches!(error, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_history_orders_entries_by_timestamp_ascending() {
        let store = setup().await;
        let request = sample_request("Expense report");
        store.create(&request).await.expect("create");
        store
            .apply_review(&request.id, review_transition(&request, true))
            .await
            .expect("review");

        let history = store.list_history(&request.id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_status, ApprovalStatus::Pending);
        assert_eq!(history[1].to_status, ApprovalStatus::Approved);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn list_history_on_unknown_id_is_not_found() {
        let store = setup().await;
        let error = store
            .list_history(&RequestId("missing".to_string()))
            .await
            .expect_err("unknown id");
        assert!(matches!(error, StoreError::NotFound(_)));
    }
}
