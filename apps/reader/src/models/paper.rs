use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Processing state of a paper.
///
/// Stored as lowercase text. Rows written before status tracking existed
/// are migrated to `completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaperStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperStatus::Pending => "pending",
            PaperStatus::Processing => "processing",
            PaperStatus::Completed => "completed",
            PaperStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `papers` table.
///
/// Timestamps are RFC 3339 text with microsecond precision, so they sort
/// lexically in the same order as chronologically.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaperRow {
    pub id: String,
    pub title: String,
    /// Serialized structured summary (JSON), empty until completed.
    pub summary: String,
    pub link: String,
    pub pdf_link: String,
    pub local_pdf: String,
    /// Chat topic the summary was published under. Non-empty iff completed.
    pub chat_topic: String,
    pub status: PaperStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl PaperRow {
    /// Date part (`YYYY-MM-DD`) of the first time this paper was stored.
    pub fn discovered_on(&self) -> &str {
        self.created_at.get(..10).unwrap_or(&self.created_at)
    }
}

/// Upsert payload. Everything except `id` defaults to empty.
///
/// `retry_count` and `created_at` are deliberately absent: the store owns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPaper {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub pdf_link: String,
    pub local_pdf: String,
    pub chat_topic: String,
    pub status: PaperStatus,
    pub error_message: Option<String>,
}

impl NewPaper {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}
