use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::debug;

use crate::config::SqliteDbConfig;
use crate::dto::{ImageIdentity, LedgerRecord};
use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for DatabaseError {
    fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            DatabaseError::Sqlx(sqlx::Error::Io(_)) => true,
            // SQLITE_BUSY and SQLITE_LOCKED, including their extended codes
            DatabaseError::Sqlx(sqlx::Error::Database(e)) => e.code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| matches!(c & 0xff, 5 | 6))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Durable record of every image that has been copied successfully.
///
/// Each call is a single statement against the store. There is no transaction
/// spanning [`Ledger::exists`] and [`Ledger::insert`], two workers may both see an
/// identity as missing and both copy it. The copy is idempotent so only the recorded
/// success is guaranteed to happen at most once.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create the tables in the database
    async fn create_schema(&self) -> Result<(), DatabaseError>;

    /// Returns `true` if a record with exactly this identity exists.
    async fn exists(&self, identity: &ImageIdentity) -> Result<bool, DatabaseError>;
    /// Record a successful copy.
    ///
    /// Inserting an identity that is already recorded is a no-op. Returns `true` if a
    /// new record was created.
    async fn insert(&self, identity: &ImageIdentity) -> Result<bool, DatabaseError>;
    /// List every record, ordered by identity.
    async fn list_all(&self) -> Result<Vec<LedgerRecord>, DatabaseError>;
    /// Delete every record, returns how many were removed.
    async fn clear_all(&self) -> Result<u64, DatabaseError>;
}

#[async_trait]
impl Ledger for Pool<Sqlite> {
    async fn create_schema(&self) -> Result<(), DatabaseError> {
        let migrate_version = env!("CARGO_PKG_VERSION");
        let schema_version = "0.0.1";

        let row: Option<(i64, )> = match sqlx::query_as("SELECT COUNT(1) FROM ledger_meta WHERE \"schema_version\" = ?")
                .bind(schema_version)
                .fetch_one(self).await {
            Ok(row) => Some(row),
            Err(e) => match e {
                sqlx::Error::RowNotFound => {
                    None
                },
                // ignore no such table errors
                sqlx::Error::Database(b) if b.message().starts_with("no such table") => None,
                _ => {
                    return Err(e.into());
                }
            }
        };

        sqlx::query(include_str!("schemas/schema.sql"))
            .execute(self).await?;
        debug!("Created database schema");

        if row.map(|r| r.0).unwrap_or(0) == 0 {
            sqlx::query("INSERT INTO ledger_meta (migrate_version, schema_version, created_at) VALUES (?, ?, ?)")
                .bind(migrate_version)
                .bind(schema_version)
                .bind(chrono::Utc::now().timestamp())
                .execute(self).await?;
            debug!("Inserted ledger schema version {}", schema_version);
        }

        Ok(())
    }

    async fn exists(&self, identity: &ImageIdentity) -> Result<bool, DatabaseError> {
        let row: (i64, ) = match sqlx::query_as("SELECT COUNT(1) FROM processed_entries WHERE acr_name = ? AND repository = ? AND tag = ? AND digest = ?")
                .bind(&identity.registry)
                .bind(&identity.repository)
                .bind(&identity.tag)
                .bind(&identity.digest)
                .fetch_one(self).await {
            Ok(row) => row,
            Err(e) => match e {
                sqlx::Error::RowNotFound => {
                    return Ok(false)
                },
                _ => {
                    return Err(e.into());
                }
            }
        };

        Ok(row.0 > 0)
    }

    async fn insert(&self, identity: &ImageIdentity) -> Result<bool, DatabaseError> {
        let res = sqlx::query("INSERT OR IGNORE INTO processed_entries (acr_name, repository, tag, digest, recorded_at) VALUES (?, ?, ?, ?, ?)")
            .bind(&identity.registry)
            .bind(&identity.repository)
            .bind(&identity.tag)
            .bind(&identity.digest)
            .bind(chrono::Utc::now().timestamp())
            .execute(self).await?;

        Ok(res.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<LedgerRecord>, DatabaseError> {
        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as("SELECT acr_name, repository, tag, digest, recorded_at FROM processed_entries ORDER BY acr_name, repository, tag, digest")
            .fetch_all(self).await?;

        let records = rows.into_iter()
            .map(|row| LedgerRecord::new(ImageIdentity::new(row.0, row.1, row.2, row.3), row.4))
            .collect();

        Ok(records)
    }

    async fn clear_all(&self) -> Result<u64, DatabaseError> {
        let res = sqlx::query("DELETE FROM processed_entries")
            .execute(self).await?;

        Ok(res.rows_affected())
    }
}

/// Open the ledger database, creating the file and schema if needed.
///
/// The pool is sized so every concurrent worker can hold a connection.
pub async fn open(config: &SqliteDbConfig, max_connections: u32) -> Result<Pool<Sqlite>, DatabaseError> {
    let path = Path::new(&config.path);
    crate::create_path_to(path)?;

    let connection_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(connection_options).await?;
    pool.create_schema().await?;

    Ok(pool)
}
