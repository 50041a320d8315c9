use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntryId(pub String);

impl HistoryEntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    /// Lowercase storage encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Display name used in API views.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One immutable record of a status change on a request, including the
/// initial creation (`Pending -> Pending`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub request_id: RequestId,
    pub from_status: ApprovalStatus,
    pub to_status: ApprovalStatus,
    pub actor_id: String,
    pub actor_name: String,
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fields written together, exactly once, when a pending request is resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub reviewed_at: DateTime<Utc>,
    pub reviewer_id: String,
    pub reviewer_name: String,
    pub comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub title: String,
    pub description: String,
    pub requester_id: String,
    pub requester_name: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub review: Option<ReviewRecord>,
    /// Append-only; the request owns its transitions for its whole lifetime.
    pub history: Vec<HistoryEntry>,
}

pub const CREATION_COMMENT: &str = "Request created";

impl ApprovalRequest {
    /// Builds a fresh pending request together with its creation history
    /// entry. The creation entry records `Pending -> Pending` with the
    /// requester as actor.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        requester_id: impl Into<String>,
        requester_name: impl Into<String>,
    ) -> Self {
        let id = RequestId::generate();
        let requester_id = requester_id.into();
        let requester_name = requester_name.into();
        let created_at = Utc::now();

        let creation = HistoryEntry {
            id: HistoryEntryId::generate(),
            request_id: id.clone(),
            from_status: ApprovalStatus::Pending,
            to_status: ApprovalStatus::Pending,
            actor_id: requester_id.clone(),
            actor_name: requester_name.clone(),
            comments: Some(CREATION_COMMENT.to_string()),
            timestamp: created_at,
        };

        Self {
            id,
            title: title.into(),
            description: description.into(),
            requester_id,
            requester_name,
            status: ApprovalStatus::Pending,
            created_at,
            review: None,
            history: vec![creation],
        }
    }
}
