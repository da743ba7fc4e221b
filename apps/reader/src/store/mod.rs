//! Paper Store: durable record of every paper seen, its processing status,
//! and its retry history.
//!
//! One table, keyed by paper id. Writes are single statements; concurrent
//! access from the pipeline loop and the chat responder is serialized by
//! SQLite itself.

pub mod schema;

use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::models::paper::{NewPaper, PaperRow, PaperStatus};

/// Column list shared by every read. Metadata columns may be NULL in rows
/// written by older releases, so they are normalised to empty strings.
const SELECT_PAPER: &str = r#"
SELECT id,
       COALESCE(title, '')      AS title,
       COALESCE(summary, '')    AS summary,
       COALESCE(link, '')       AS link,
       COALESCE(pdf_link, '')   AS pdf_link,
       COALESCE(local_pdf, '')  AS local_pdf,
       COALESCE(chat_topic, '') AS chat_topic,
       status,
       error_message,
       retry_count,
       COALESCE(created_at, '') AS created_at,
       COALESCE(updated_at, '') AS updated_at
FROM papers
"#;

#[derive(Clone)]
pub struct PaperStore {
    pool: SqlitePool,
}

impl PaperStore {
    /// Wraps a pool whose schema has already been brought up to date
    /// (see `db::create_pool`).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a paper.
    ///
    /// On an existing id every payload field is overwritten, `created_at`
    /// keeps its first value and `retry_count` is left alone.
    pub async fn upsert(&self, paper: &NewPaper) -> Result<(), sqlx::Error> {
        let now = timestamp();

        sqlx::query(
            r#"
            INSERT INTO papers
                (id, title, summary, link, pdf_link, local_pdf, chat_topic,
                 status, error_message, retry_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title         = excluded.title,
                summary       = excluded.summary,
                link          = excluded.link,
                pdf_link      = excluded.pdf_link,
                local_pdf     = excluded.local_pdf,
                chat_topic    = excluded.chat_topic,
                status        = excluded.status,
                error_message = excluded.error_message,
                created_at    = COALESCE(papers.created_at, excluded.created_at),
                updated_at    = excluded.updated_at
            "#,
        )
        .bind(&paper.id)
        .bind(&paper.title)
        .bind(&paper.summary)
        .bind(&paper.link)
        .bind(&paper.pdf_link)
        .bind(&paper.local_pdf)
        .bind(&paper.chat_topic)
        .bind(paper.status)
        .bind(&paper.error_message)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!("Upserted paper {} as {}", paper.id, paper.status);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<PaperRow>, sqlx::Error> {
        sqlx::query_as::<_, PaperRow>(&format!("{SELECT_PAPER} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Resolves a chat topic back to its paper. If several papers share a
    /// topic, the first one SQLite returns wins.
    pub async fn get_by_topic(&self, topic: &str) -> Result<Option<PaperRow>, sqlx::Error> {
        sqlx::query_as::<_, PaperRow>(&format!("{SELECT_PAPER} WHERE chat_topic = ? LIMIT 1"))
            .bind(topic)
            .fetch_optional(&self.pool)
            .await
    }

    /// Moves a paper to `status`.
    ///
    /// With an error message, the message is recorded and `retry_count`
    /// incremented in the same statement. Without one, only the status and
    /// `updated_at` change.
    pub async fn set_status(
        &self,
        id: &str,
        status: PaperStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = timestamp();

        let result = match error_message {
            Some(message) => {
                sqlx::query(
                    r#"
                    UPDATE papers
                    SET status = ?, error_message = ?, retry_count = retry_count + 1, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(status)
                .bind(message)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE papers SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status)
                    .bind(&now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            warn!("set_status({status}) on unknown paper {id}");
        }
        Ok(())
    }

    pub async fn list_by_status(&self, status: PaperStatus) -> Result<Vec<PaperRow>, sqlx::Error> {
        sqlx::query_as::<_, PaperRow>(&format!(
            "{SELECT_PAPER} WHERE status = ? ORDER BY updated_at DESC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await
    }

    /// Failed papers still below the retry ceiling, most recently updated first.
    pub async fn list_failed(&self, max_retry: i64) -> Result<Vec<PaperRow>, sqlx::Error> {
        sqlx::query_as::<_, PaperRow>(&format!(
            "{SELECT_PAPER} WHERE status = ? AND retry_count < ? ORDER BY updated_at DESC"
        ))
        .bind(PaperStatus::Failed)
        .bind(max_retry)
        .fetch_all(&self.pool)
        .await
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
