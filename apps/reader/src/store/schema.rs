//! Schema evolution for the `papers` table.
//!
//! Stores written before status tracking have the metadata columns only,
//! name the topic column `zulip_topic` and carry naive local timestamps.
//! Opening such a store upgrades it in place: the topic column is renamed,
//! the missing columns are added (rows that predate status tracking are
//! assumed to have succeeded and default to `completed`) and timestamps are
//! rewritten as UTC RFC 3339 so that they order lexically with new rows.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

const CREATE_PAPERS: &str = r#"
CREATE TABLE IF NOT EXISTS papers (
    id            TEXT PRIMARY KEY,
    title         TEXT,
    summary       TEXT,
    link          TEXT,
    pdf_link      TEXT,
    local_pdf     TEXT,
    chat_topic    TEXT,
    created_at    TEXT,
    updated_at    TEXT,
    status        TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    retry_count   INTEGER NOT NULL DEFAULT 0
)
"#;

/// Topic column name used by the first release.
const LEGACY_TOPIC_COLUMN: &str = "zulip_topic";

const RENAME_TOPIC: &str = "ALTER TABLE papers RENAME COLUMN zulip_topic TO chat_topic";

/// Columns introduced after the first release, with the DDL that adds them.
const ADDED_COLUMNS: &[(&str, &str)] = &[
    (
        "status",
        "ALTER TABLE papers ADD COLUMN status TEXT NOT NULL DEFAULT 'completed'",
    ),
    (
        "error_message",
        "ALTER TABLE papers ADD COLUMN error_message TEXT",
    ),
    (
        "retry_count",
        "ALTER TABLE papers ADD COLUMN retry_count INTEGER NOT NULL DEFAULT 0",
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_papers_chat_topic ON papers(chat_topic)",
    "CREATE INDEX IF NOT EXISTS idx_papers_created_at ON papers(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_papers_updated_at ON papers(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_papers_status ON papers(status)",
];

/// What one `migrate` call changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Migration {
    pub renamed_topic: bool,
    pub added: Vec<&'static str>,
    pub normalized_rows: usize,
}

impl Migration {
    pub fn is_empty(&self) -> bool {
        !self.renamed_topic && self.added.is_empty() && self.normalized_rows == 0
    }
}

impl std::fmt::Display for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.renamed_topic {
            parts.push(format!("renamed {LEGACY_TOPIC_COLUMN} to chat_topic"));
        }
        if !self.added.is_empty() {
            parts.push(format!("added columns {}", self.added.join(", ")));
        }
        if self.normalized_rows > 0 {
            parts.push(format!("normalized timestamps on {} rows", self.normalized_rows));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Creates or upgrades the `papers` table.
///
/// When `db_file` is given and anything needs changing, the file is copied
/// to `<file>.backup_<YYYYmmdd_HHMMSS>` before it is altered. Indexes are
/// built last, once `chat_topic` is guaranteed to exist.
pub async fn migrate(pool: &SqlitePool, db_file: Option<&Path>) -> Result<Migration, sqlx::Error> {
    sqlx::query(CREATE_PAPERS).execute(pool).await?;

    let existing = existing_columns(pool).await?;
    let has = |name: &str| existing.iter().any(|c| c == name);

    let rename_topic = has(LEGACY_TOPIC_COLUMN) && !has("chat_topic");
    let added: Vec<&'static str> = ADDED_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| !has(*name))
        .collect();
    let rewrites = naive_timestamps(pool).await?;

    let migration = Migration {
        renamed_topic: rename_topic,
        added,
        normalized_rows: rewrites.len(),
    };

    if !migration.is_empty() {
        if let Some(path) = db_file {
            let backup = backup_database(path).await?;
            info!("Backed up paper store to {}", backup.display());
        }

        let mut tx = pool.begin().await?;
        if migration.renamed_topic {
            sqlx::query(RENAME_TOPIC).execute(&mut *tx).await?;
            info!("Renamed column '{LEGACY_TOPIC_COLUMN}' to 'chat_topic'");
        }
        for (name, ddl) in ADDED_COLUMNS {
            if migration.added.contains(name) {
                sqlx::query(ddl).execute(&mut *tx).await?;
                info!("Added column '{name}' to papers");
            }
        }
        for row in &rewrites {
            sqlx::query("UPDATE papers SET created_at = ?, updated_at = ? WHERE id = ?")
                .bind(&row.created_at)
                .bind(&row.updated_at)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(migration)
}

async fn existing_columns(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT name FROM pragma_table_info('papers')")
        .fetch_all(pool)
        .await
}

struct TimestampRewrite {
    id: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

/// Rows whose timestamps are not yet UTC with a `Z` suffix, with their
/// replacement values. Values that cannot be parsed are kept as they are.
async fn naive_timestamps(pool: &SqlitePool) -> Result<Vec<TimestampRewrite>, sqlx::Error> {
    let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT id, created_at, updated_at FROM papers
         WHERE (created_at IS NOT NULL AND created_at != '' AND created_at NOT LIKE '%Z')
            OR (updated_at IS NOT NULL AND updated_at != '' AND updated_at NOT LIKE '%Z')",
    )
    .fetch_all(pool)
    .await?;

    let mut rewrites = Vec::new();
    for (id, created_at, updated_at) in rows {
        let created = created_at.as_deref().map(|raw| normalize_timestamp(&id, raw));
        let updated = updated_at.as_deref().map(|raw| normalize_timestamp(&id, raw));
        if created.as_ref() == created_at.as_ref() && updated.as_ref() == updated_at.as_ref() {
            continue;
        }
        rewrites.push(TimestampRewrite {
            id,
            created_at: created,
            updated_at: updated,
        });
    }
    Ok(rewrites)
}

/// UTC RFC 3339 form of a stored timestamp.
///
/// Values with an offset are converted; values without one are read as
/// local wall-clock time, which is how the first release wrote them.
fn normalize_timestamp(id: &str, raw: &str) -> String {
    if raw.is_empty() || raw.ends_with('Z') {
        return raw.to_string();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return to_utc_string(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"));
    match naive.ok().and_then(|n| Local.from_local_datetime(&n).earliest()) {
        Some(local) => to_utc_string(local.with_timezone(&Utc)),
        None => {
            warn!("Keeping unparseable timestamp '{raw}' on paper {id}");
            raw.to_string()
        }
    }
}

fn to_utc_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

async fn backup_database(path: &Path) -> Result<PathBuf, sqlx::Error> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let backup = PathBuf::from(format!("{}.backup_{stamp}", path.display()));
    tokio::fs::copy(path, &backup).await?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::models::paper::{NewPaper, PaperStatus};
    use crate::store::PaperStore;

    /// Table layout written by the first release.
    const LEGACY_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS papers (
        id TEXT PRIMARY KEY,
        title TEXT,
        summary TEXT,
        link TEXT,
        pdf_link TEXT,
        local_pdf TEXT,
        zulip_topic TEXT,
        created_at TEXT,
        updated_at TEXT
    )
    "#;

    const LEGACY_ROW: &str = "INSERT INTO papers
        (id, title, summary, link, pdf_link, local_pdf, zulip_topic, created_at, updated_at)
        VALUES ('2407.00001', 'Old paper', '{}', 'l', 'p', 'f', '2024-07-30 Old',
                '2024-07-30T10:00:00.250000', '2024-07-30T10:00:00.250000')";

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect")
    }

    async fn legacy_pool() -> SqlitePool {
        let pool = memory_pool().await;
        sqlx::query(LEGACY_SCHEMA).execute(&pool).await.unwrap();
        sqlx::query(LEGACY_ROW).execute(&pool).await.unwrap();
        pool
    }

    fn local_as_utc(raw: &str) -> String {
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        let local = Local.from_local_datetime(&naive).earliest().unwrap();
        to_utc_string(local.with_timezone(&Utc))
    }

    #[tokio::test]
    async fn test_fresh_store_needs_no_migration() {
        let pool = memory_pool().await;
        assert!(migrate(&pool, None).await.unwrap().is_empty());

        // Idempotent on a second open.
        assert!(migrate(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_rows_survive_and_default_to_completed() {
        let pool = legacy_pool().await;

        let migration = migrate(&pool, None).await.unwrap();
        assert!(migration.renamed_topic);
        assert_eq!(migration.added, vec!["status", "error_message", "retry_count"]);
        assert_eq!(migration.normalized_rows, 1);

        let (title, status, error, retries, topic): (String, String, Option<String>, i64, String) =
            sqlx::query_as(
                "SELECT title, status, error_message, retry_count, chat_topic FROM papers WHERE id = '2407.00001'",
            )
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(title, "Old paper");
        assert_eq!(status, "completed");
        assert_eq!(error, None);
        assert_eq!(retries, 0);
        assert_eq!(topic, "2024-07-30 Old");

        assert!(migrate(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_topic_resolves_through_store() {
        let pool = legacy_pool().await;
        migrate(&pool, None).await.unwrap();
        let store = PaperStore::new(pool);

        let row = store.get_by_topic("2024-07-30 Old").await.unwrap().unwrap();
        assert_eq!(row.id, "2407.00001");
        assert_eq!(row.title, "Old paper");
        assert_eq!(row.status, PaperStatus::Completed);
    }

    #[tokio::test]
    async fn test_legacy_timestamps_become_utc_and_order_with_new_rows() {
        let pool = legacy_pool().await;
        migrate(&pool, None).await.unwrap();
        let store = PaperStore::new(pool);

        let legacy = store.get("2407.00001").await.unwrap().unwrap();
        let expected = local_as_utc("2024-07-30T10:00:00.250000");
        assert_eq!(legacy.created_at, expected);
        assert_eq!(legacy.updated_at, expected);

        store
            .upsert(&NewPaper {
                status: PaperStatus::Completed,
                ..NewPaper::new("2410.00002")
            })
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_by_status(PaperStatus::Completed)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["2410.00002", "2407.00001"]);
    }

    #[test]
    fn test_normalize_timestamp_forms() {
        let utc = "2024-07-30T08:00:00.000000Z";
        assert_eq!(normalize_timestamp("p", utc), utc);
        assert_eq!(
            normalize_timestamp("p", "2024-07-30T10:00:00+02:00"),
            "2024-07-30T08:00:00.000000Z"
        );
        assert_eq!(
            normalize_timestamp("p", "2024-07-30T10:00:00"),
            local_as_utc("2024-07-30T10:00:00")
        );
        assert_eq!(normalize_timestamp("p", ""), "");
        assert_eq!(normalize_timestamp("p", "yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_does_not_trigger_migration() {
        let pool = memory_pool().await;
        migrate(&pool, None).await.unwrap();
        sqlx::query(
            "INSERT INTO papers (id, created_at, updated_at) VALUES ('odd', 'yesterday', 'yesterday')",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert!(migrate(&pool, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_indexes_created() {
        let pool = memory_pool().await;
        migrate(&pool, None).await.unwrap();

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'papers' AND name LIKE 'idx_papers_%'",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(names.len(), 4);
    }

    #[tokio::test]
    async fn test_backup_written_only_when_legacy_store_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .unwrap();
        sqlx::query(LEGACY_SCHEMA).execute(&pool).await.unwrap();
        sqlx::query(LEGACY_ROW).execute(&pool).await.unwrap();

        assert!(!migrate(&pool, Some(&path)).await.unwrap().is_empty());
        assert!(migrate(&pool, Some(&path)).await.unwrap().is_empty());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().contains(".backup_"))
            .collect();
        assert_eq!(backups.len(), 1);

        // The backup still has the first-release layout.
        let backup_url = format!("sqlite://{}?mode=ro", backups[0].display());
        let backup = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&backup_url)
            .await
            .unwrap();
        let topic: String =
            sqlx::query_scalar("SELECT zulip_topic FROM papers WHERE id = '2407.00001'")
                .fetch_one(&backup)
                .await
                .unwrap();
        assert_eq!(topic, "2024-07-30 Old");
    }
}
