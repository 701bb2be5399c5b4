use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the on-disk article cache. Cheap to clone (shares one pool).
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory cache (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// cache (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Restrict the cache file to the current user before the pool creates it
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                if let Err(e) =
                    std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))
                {
                    tracing::warn!(path = %path, error = %e, "Failed to set cache file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.exists()) {
                // If creation fails, SQLite reports the error at connect time.
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // Every in-memory connection is a separate database, so pin it to one.
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .acquire_timeout(Duration::from_secs(10));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;

        tracing::debug!(path = %path, "Article cache opened");
        Ok(db)
    }

    /// Create tables and indexes in one transaction. Idempotent.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Exactly one of category / search_keyword is set on every row.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                url TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                content TEXT,
                author TEXT,
                source_id TEXT,
                source_name TEXT,
                image_url TEXT,
                published_at INTEGER,
                category TEXT,
                search_keyword TEXT,
                inserted_at INTEGER NOT NULL,
                CHECK ((category IS NULL) <> (search_keyword IS NULL))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Category reads: WHERE category = ? ORDER BY inserted_at
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_category_inserted ON articles(category, inserted_at)",
        )
        .execute(&mut *tx)
        .await?;

        // Search reads: WHERE search_keyword IS NOT NULL ORDER BY inserted_at
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_keyword_inserted ON articles(search_keyword, inserted_at)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_inserted ON articles(inserted_at)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
