use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, EmptyKeySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu,
    SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageError, StorageResult,
};
use super::types::{CacheEntry, unix_timestamp_seconds};
use super::{BoxFuture, KeyValueStore};

#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct CacheEntryRow {
    key: String,
    value: String,
    updated_at: i64,
}

impl SqliteCache {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single long-lived connection keeps `:memory:` databases alive for the pool's lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, journal_mode = %journal_mode, "opened sqlite cache");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn get_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheEntryRow>(
            "SELECT key, value, updated_at FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "cache-get-query",
        })?;

        row.map(cache_row_to_entry).transpose()
    }

    async fn put_entry(&self, key: &str, value: String) -> StorageResult<CacheEntry> {
        ensure!(
            !key.trim().is_empty(),
            EmptyKeySnafu {
                stage: "cache-put"
            }
        );

        let now = unix_timestamp_seconds();
        sqlx::query(
            "INSERT INTO cache_entries (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value.as_str())
        .bind(u64_to_i64(now, "cache-put-updated-at")?)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "cache-put-upsert",
        })?;

        Ok(CacheEntry {
            key: key.to_string(),
            value,
            updated_at_unix_seconds: now,
        })
    }

    async fn remove_entry(&self, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "cache-remove-delete",
            })?;

        Ok(result.rows_affected() > 0)
    }
}

impl KeyValueStore for SqliteCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<CacheEntry>>> {
        Box::pin(self.get_entry(key))
    }

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<CacheEntry>> {
        Box::pin(self.put_entry(key, value))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(self.remove_entry(key))
    }
}

fn cache_row_to_entry(row: CacheEntryRow) -> StorageResult<CacheEntry> {
    Ok(CacheEntry {
        key: row.key,
        value: row.value,
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "cache-row-updated-at")?,
    })
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
