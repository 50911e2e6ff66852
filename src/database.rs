#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use chrono::SecondsFormat;
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, SqlitePool};
#[cfg(feature = "database")]
use tracing::{debug, info, warn};

#[cfg(feature = "database")]
use crate::agreements::store::{apply_mutator, new_record, AgreementStore, RecordMutator};
#[cfg(feature = "database")]
use crate::agreements::types::{
    AgreementFilter, AgreementId, AgreementPage, AgreementRecord, NewAgreement, PageRequest,
};
#[cfg(feature = "database")]
use crate::errors::{AgreementError, Result};

/// How many times an update re-reads after losing the version check
#[cfg(feature = "database")]
const MAX_CAS_RETRIES: usize = 5;

#[cfg(feature = "database")]
fn db_err(e: sqlx::Error) -> AgreementError {
    AgreementError::storage(e, "database")
}

#[cfg(feature = "database")]
fn timestamp(record: &AgreementRecord) -> String {
    record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(feature = "database")]
/// SQLite-backed agreement store.
///
/// Updates are a compare-and-swap on the `version` column: the row is only
/// rewritten when nobody else bumped the version since it was read. Losers
/// re-read and re-apply their mutator a bounded number of times.
pub struct SqliteAgreementStore {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl SqliteAgreementStore {
    /// Initialize database with automatic migrations
    pub async fn new(database_url: &str, max_connections: u32, auto_migrate: bool) -> Result<Self> {
        // Create database if it doesn't exist
        if !sqlx::Sqlite::database_exists(database_url).await.map_err(db_err)? {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await.map_err(db_err)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(db_err)?;

        if auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| AgreementError::storage(e, "migrations"))?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, id: AgreementId) -> Result<AgreementRecord> {
        let row = sqlx::query("SELECT document FROM agreements WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(AgreementError::NotFound(id))?;
        let document: String = row.get("document");
        Ok(serde_json::from_str(&document)?)
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl AgreementStore for SqliteAgreementStore {
    async fn create(&self, fields: NewAgreement) -> Result<AgreementRecord> {
        let record = new_record(fields)?;
        sqlx::query(
            r#"
            INSERT INTO agreements (id, version, created_at, client_name, status, transferred, document)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.version as i64)
        .bind(timestamp(&record))
        .bind(&record.client_name)
        .bind(record.status.to_string())
        .bind(record.transferred)
        .bind(serde_json::to_string(&record)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record)
    }

    async fn get(&self, id: AgreementId) -> Result<AgreementRecord> {
        self.fetch(id).await
    }

    async fn update<'a>(&self, id: AgreementId, mut mutator: RecordMutator<'a>) -> Result<AgreementRecord> {
        for attempt in 0..MAX_CAS_RETRIES {
            let current = self.fetch(id).await?;
            let Some(next) = apply_mutator(&current, &mut mutator)? else {
                return Ok(current);
            };
            let written = sqlx::query(
                r#"
                UPDATE agreements
                SET version = ?1, status = ?2, transferred = ?3, client_name = ?4, document = ?5
                WHERE id = ?6 AND version = ?7
                "#,
            )
            .bind(next.version as i64)
            .bind(next.status.to_string())
            .bind(next.transferred)
            .bind(&next.client_name)
            .bind(serde_json::to_string(&next)?)
            .bind(id.to_string())
            .bind(current.version as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if written.rows_affected() == 1 {
                return Ok(next);
            }
            warn!(agreement.id = %id, attempt, "Version check lost, retrying update");
        }
        Err(AgreementError::Conflict(id))
    }

    async fn list(&self, filter: &AgreementFilter, page: PageRequest) -> Result<AgreementPage> {
        let (after_ts, after_id) = match page.after {
            Some(cursor) => (
                Some(cursor.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
                Some(cursor.id.to_string()),
            ),
            None => (None, None),
        };
        let status = filter.status.map(|s| s.to_string());
        let rows = sqlx::query(
            r#"
            SELECT document FROM agreements
            WHERE (?1 IS NULL OR created_at > ?1 OR (created_at = ?1 AND id > ?2))
              AND (?3 IS NULL OR status = ?3)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(after_ts)
        .bind(after_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut matching = Vec::new();
        for row in rows {
            let document: String = row.get("document");
            let record: AgreementRecord = serde_json::from_str(&document)?;
            if filter.matches(&record) {
                matching.push(record);
            }
        }
        debug!("Listed {} agreements from database", matching.len());
        // rows are already past the cursor and in order
        Ok(AgreementPage::from_sorted(
            matching,
            &PageRequest {
                after: None,
                limit: page.limit,
            },
        ))
    }

    async fn delete(&self, id: AgreementId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM agreements WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[cfg(all(test, feature = "database"))]
mod tests {
    use super::*;
    use crate::agreements::{AgreementStatus, PageRequest};
    use std::sync::Arc;

    async fn memory_store() -> SqliteAgreementStore {
        // a single connection keeps the in-memory database alive and shared
        SqliteAgreementStore::new("sqlite::memory:", 1, true).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let store = memory_store().await;
        let record = store
            .create(NewAgreement::new("Acme", "MSA", "Acme MSA"))
            .await
            .unwrap();
        assert_eq!(store.get(record.id).await.unwrap(), record);

        let updated = store
            .update(
                record.id,
                Box::new(|r| {
                    r.status = AgreementStatus::Completed;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        // no-op leaves the version alone
        let same = store.update(record.id, Box::new(|_| Ok(()))).await.unwrap();
        assert_eq!(same.version, 1);
    }

    #[tokio::test]
    async fn test_list_pages_in_creation_order() {
        let store = memory_store().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let record = store
                .create(NewAgreement::new("Acme", "MSA", format!("MSA {i}")))
                .await
                .unwrap();
            ids.push(record.id);
        }

        let first = store.list(&AgreementFilter::all(), PageRequest::first(2)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let cursor = first.next_cursor.unwrap();
        let rest = store
            .list(&AgreementFilter::all(), PageRequest::after(cursor, 10))
            .await
            .unwrap();
        let listed: Vec<_> = first.records.iter().chain(rest.records.iter()).map(|r| r.id).collect();
        assert_eq!(listed, ids);
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let store = Arc::new(memory_store().await);
        let record = store
            .create(NewAgreement::new("Acme", "MSA", "Acme MSA"))
            .await
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .update(
                            record.id,
                            Box::new(|r| {
                                r.handoff.attempts += 1;
                                Ok(())
                            }),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.get(record.id).await.unwrap().handoff.attempts, 4);
    }

    /// Two stores on one database file, as two processes would see it
    async fn file_stores(dir: &tempfile::TempDir) -> (SqliteAgreementStore, SqliteAgreementStore) {
        let url = format!("sqlite://{}", dir.path().join("agreements.db").display());
        let first = SqliteAgreementStore::new(&url, 4, true).await.unwrap();
        let second = SqliteAgreementStore::new(&url, 4, true).await.unwrap();
        (first, second)
    }

    /// Commit a write through `other` from inside a running mutator
    fn interleave_write(other: &SqliteAgreementStore, id: AgreementId) {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(other.update(
                    id,
                    Box::new(|r| {
                        r.handoff.attempts += 1;
                        Ok(())
                    }),
                ))
                .unwrap();
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lost_version_check_reapplies_mutator() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, other) = file_stores(&dir).await;
        let record = store
            .create(NewAgreement::new("Acme", "MSA", "Acme MSA"))
            .await
            .unwrap();

        let mut calls = 0;
        let updated = store
            .update(
                record.id,
                Box::new(|r| {
                    calls += 1;
                    if calls == 1 {
                        interleave_write(&other, r.id);
                    }
                    r.step_mut(1).notes = Some("terms agreed".to_string());
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(calls, 2);
        // the concurrent write is kept, not overwritten
        assert_eq!(updated.handoff.attempts, 1);
        assert_eq!(updated.step(1).notes.as_deref(), Some("terms agreed"));
        assert_eq!(updated.version, 2);
        assert_eq!(other.get(record.id).await.unwrap(), updated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_persistent_contention_ends_in_conflict() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, other) = file_stores(&dir).await;
        let record = store
            .create(NewAgreement::new("Acme", "MSA", "Acme MSA"))
            .await
            .unwrap();

        let mut calls = 0;
        let result = store
            .update(
                record.id,
                Box::new(|r| {
                    calls += 1;
                    interleave_write(&other, r.id);
                    r.step_mut(1).notes = Some("never lands".to_string());
                    Ok(())
                }),
            )
            .await;

        assert!(matches!(result, Err(AgreementError::Conflict(id)) if id == record.id));
        assert_eq!(calls, MAX_CAS_RETRIES);
        let stored = store.get(record.id).await.unwrap();
        assert_eq!(stored.handoff.attempts, MAX_CAS_RETRIES as u32);
        assert!(stored.step(1).notes.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let store = memory_store().await;
        let record = store
            .create(NewAgreement::new("Acme", "MSA", "Acme MSA"))
            .await
            .unwrap();
        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert!(matches!(store.get(record.id).await, Err(AgreementError::NotFound(_))));
    }
}
