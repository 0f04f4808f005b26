/// SQLite-backed post queue.
///
/// Two tables: the durable queue of scheduled posts (pending/sent) and a
/// cache of pre-generated posts consumed by the next publish attempt.
/// All access goes through short single-statement transactions; the
/// storage layer's own guarantees are the only locking in the process.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// A post in the durable queue.
///
/// `scheduled_time` is set at creation and never mutated; `is_sent`
/// transitions false -> true exactly once and never reverts.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledPost {
    pub id: i64,
    pub scheduled_time: DateTime<Utc>,
    pub post_text: String,
    pub is_sent: bool,
    pub is_auto_generated: bool,
}

/// A pre-generated post waiting to be claimed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachedPost {
    pub id: i64,
    pub generated_time: DateTime<Utc>,
    pub post_text: String,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // "sqlite:data/posts.db" needs its parent directory to exist
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid DATABASE_URL")?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// In-memory database for tests. A single connection keeps every
    /// statement on the same ephemeral database.
    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        log::info!("Initializing database schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scheduled_time DATETIME NOT NULL,
                post_text TEXT NOT NULL,
                is_sent BOOLEAN NOT NULL DEFAULT 0,
                is_auto_generated BOOLEAN NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create scheduled_posts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generated_posts_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                generated_time DATETIME NOT NULL,
                post_text TEXT NOT NULL,
                is_used BOOLEAN NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create generated_posts_cache table")?;

        Ok(())
    }

    /// Insert a post into the queue, returning its id.
    pub async fn add_scheduled_post(
        &self,
        scheduled_time: DateTime<Utc>,
        post_text: &str,
        is_auto_generated: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO scheduled_posts (scheduled_time, post_text, is_auto_generated) \
             VALUES (?, ?, ?)",
        )
        .bind(scheduled_time)
        .bind(post_text)
        .bind(is_auto_generated)
        .execute(&self.pool)
        .await
        .context("Failed to insert scheduled post")?;

        Ok(result.last_insert_rowid())
    }

    /// All unsent posts, earliest first.
    pub async fn pending_posts(&self) -> Result<Vec<ScheduledPost>> {
        sqlx::query_as::<_, ScheduledPost>(
            "SELECT id, scheduled_time, post_text, is_sent, is_auto_generated \
             FROM scheduled_posts WHERE is_sent = 0 ORDER BY scheduled_time",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending posts")
    }

    /// Operator-scheduled posts whose time has arrived.
    pub async fn due_manual_posts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        sqlx::query_as::<_, ScheduledPost>(
            "SELECT id, scheduled_time, post_text, is_sent, is_auto_generated \
             FROM scheduled_posts \
             WHERE is_sent = 0 AND is_auto_generated = 0 AND scheduled_time <= ? \
             ORDER BY scheduled_time",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list due posts")
    }

    /// Every row in the queue, for test assertions.
    #[cfg(test)]
    pub(crate) async fn all_posts(&self) -> Result<Vec<ScheduledPost>> {
        sqlx::query_as::<_, ScheduledPost>(
            "SELECT id, scheduled_time, post_text, is_sent, is_auto_generated \
             FROM scheduled_posts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list posts")
    }

    /// Mark a post sent. Idempotent: a second call leaves the row unchanged.
    pub async fn mark_post_as_sent(&self, post_id: i64) -> Result<()> {
        sqlx::query("UPDATE scheduled_posts SET is_sent = 1 WHERE id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to mark post {} as sent", post_id))?;
        Ok(())
    }

    /// Add a pre-generated post to the cache.
    pub async fn cache_add(&self, post_text: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO generated_posts_cache (generated_time, post_text) VALUES (?, ?)",
        )
        .bind(Utc::now())
        .bind(post_text)
        .execute(&self.pool)
        .await
        .context("Failed to insert cached post")?;

        Ok(result.last_insert_rowid())
    }

    /// Claim the oldest unused cached post, marking it used in the same
    /// statement so no two consumers ever receive the same row.
    pub async fn cache_take_unused(&self) -> Result<Option<CachedPost>> {
        sqlx::query_as::<_, CachedPost>(
            "UPDATE generated_posts_cache SET is_used = 1 \
             WHERE id = (SELECT id FROM generated_posts_cache WHERE is_used = 0 \
                         ORDER BY id LIMIT 1) \
             RETURNING id, generated_time, post_text",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim cached post")
    }

    /// Number of cached posts not yet consumed.
    pub async fn cache_unused_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM generated_posts_cache WHERE is_used = 0")
                .fetch_one(&self.pool)
                .await
                .context("Failed to count cached posts")?;
        Ok(count)
    }

    /// Retention sweep: delete sent posts older than `days` days.
    pub async fn purge_sent_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let result = sqlx::query(
            "DELETE FROM scheduled_posts WHERE is_sent = 1 AND scheduled_time < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to purge old sent posts")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_list_pending() {
        let db = Database::connect_in_memory().await.unwrap();

        let when = Utc::now() + Duration::minutes(10);
        let id = db.add_scheduled_post(when, "first", true).await.unwrap();

        let pending = db.pending_posts().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].post_text, "first");
        assert!(!pending[0].is_sent);
        assert!(pending[0].is_auto_generated);
    }

    #[tokio::test]
    async fn mark_sent_is_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();
        let id = db
            .add_scheduled_post(Utc::now(), "post", false)
            .await
            .unwrap();

        db.mark_post_as_sent(id).await.unwrap();
        db.mark_post_as_sent(id).await.unwrap();

        assert!(db.pending_posts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_claim_is_exclusive() {
        let db = Database::connect_in_memory().await.unwrap();
        db.cache_add("one").await.unwrap();
        db.cache_add("two").await.unwrap();

        let first = db.cache_take_unused().await.unwrap().unwrap();
        let second = db.cache_take_unused().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.post_text, "one");
        assert_eq!(second.post_text, "two");

        assert!(db.cache_take_unused().await.unwrap().is_none());
        assert_eq!(db.cache_unused_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn due_manual_posts_skips_auto_and_future() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();

        let due = db
            .add_scheduled_post(now - Duration::minutes(1), "due", false)
            .await
            .unwrap();
        db.add_scheduled_post(now + Duration::hours(1), "future", false)
            .await
            .unwrap();
        db.add_scheduled_post(now - Duration::minutes(1), "auto", true)
            .await
            .unwrap();

        let posts = db.due_manual_posts(now).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, due);
    }

    #[tokio::test]
    async fn purge_removes_only_old_sent_posts() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();

        let old_sent = db
            .add_scheduled_post(now - Duration::days(40), "old sent", true)
            .await
            .unwrap();
        db.mark_post_as_sent(old_sent).await.unwrap();

        let recent_sent = db
            .add_scheduled_post(now - Duration::days(2), "recent sent", true)
            .await
            .unwrap();
        db.mark_post_as_sent(recent_sent).await.unwrap();

        // Old but never delivered: retention must not touch it
        db.add_scheduled_post(now - Duration::days(40), "old unsent", false)
            .await
            .unwrap();

        let purged = db.purge_sent_older_than(30).await.unwrap();
        assert_eq!(purged, 1);

        let pending = db.pending_posts().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].post_text, "old unsent");
    }
}
