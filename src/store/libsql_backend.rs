//! libSQL backend — async `StatsStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{StatsStore, UserStats};

/// libSQL statistics backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn read_count(&self, user_id: &str, counter: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT count FROM user_stats WHERE user_id = ?1 AND counter = ?2",
                params![user_id, counter],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => row.get::<i64>(0).map_err(|e| DatabaseError::Query(e.to_string())),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl StatsStore for LibSqlBackend {
    async fn increment(&self, user_id: &str, counter: &str) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO user_stats (user_id, counter, count, updated_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT (user_id, counter)
                 DO UPDATE SET count = count + 1, updated_at = excluded.updated_at",
                params![user_id, counter, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to increment {counter}: {e}")))?;

        let count = self.read_count(user_id, counter).await?;
        debug!(user_id, counter, count, "Counter incremented");
        Ok(count)
    }

    async fn read(&self, user_id: &str) -> Result<UserStats, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT counter, count FROM user_stats WHERE user_id = ?1 ORDER BY counter",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut stats = UserStats::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            let counter: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
            let count: i64 = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
            stats.insert(counter, count);
        }
        Ok(stats)
    }

    async fn record_accepted(
        &self,
        message_id: &str,
        user_id: &str,
        value: i64,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO accepted_counts (message_id, user_id, value, accepted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message_id, user_id, value, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to record count: {e}")))?;
        Ok(inserted > 0)
    }

    async fn import_legacy(
        &self,
        stats: &BTreeMap<String, UserStats>,
    ) -> Result<usize, DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to begin import: {e}")))?;

        let imported = match upsert_stats(&tx, stats).await {
            Ok(imported) => imported,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Failed to roll back legacy import");
                }
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to commit import: {e}")))?;
        info!(imported, "Imported legacy stats");
        Ok(imported)
    }
}

/// Add every legacy counter onto the stored one. Returns the rows written.
async fn upsert_stats(
    conn: &Connection,
    stats: &BTreeMap<String, UserStats>,
) -> Result<usize, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let mut imported = 0;
    for (user_id, counters) in stats {
        for (counter, count) in counters {
            conn.execute(
                "INSERT INTO user_stats (user_id, counter, count, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, counter)
                 DO UPDATE SET count = count + excluded.count,
                               updated_at = excluded.updated_at",
                params![user_id.as_str(), counter.as_str(), *count, now.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to import stats: {e}")))?;
            imported += 1;
        }
    }
    Ok(imported)
}
