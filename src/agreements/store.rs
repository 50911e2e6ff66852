use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::types::{
    sort_for_listing, AgreementFilter, AgreementId, AgreementPage, AgreementRecord, ListCursor,
    NewAgreement, PageRequest,
};
use crate::errors::{AgreementError, Result};

/// Read-modify-write closure applied by [`AgreementStore::update`].
///
/// The closure works on a copy of the record. Returning an error discards the
/// copy, so a rejected transition never reaches storage. Stores that use
/// optimistic locking may run it again on a fresh copy after losing a race.
pub type RecordMutator<'a> = Box<dyn FnMut(&mut AgreementRecord) -> Result<()> + Send + 'a>;

/// Persistence contract for agreement records.
///
/// `update` is the only path through which step state, the current step,
/// status and the transfer flag change. It must be atomic per record: two
/// concurrent updates of the same id are serialized, updates of different ids
/// do not wait on each other.
#[async_trait]
pub trait AgreementStore: Send + Sync {
    /// Validate fields and persist a new record at step 1
    async fn create(&self, fields: NewAgreement) -> Result<AgreementRecord>;

    async fn get(&self, id: AgreementId) -> Result<AgreementRecord>;

    /// Atomically apply `mutator`. When the mutator leaves the record
    /// unchanged nothing is written and the version does not move.
    async fn update<'a>(&self, id: AgreementId, mutator: RecordMutator<'a>) -> Result<AgreementRecord>;

    /// One page of matching records in `(created_at, id)` order
    async fn list(&self, filter: &AgreementFilter, page: PageRequest) -> Result<AgreementPage>;

    /// Remove a record; returns false when it did not exist
    async fn delete(&self, id: AgreementId) -> Result<bool>;
}

/// Apply a mutator to a working copy and stamp it when something changed.
/// Returns `None` when the mutator was a no-op.
pub(crate) fn apply_mutator(
    current: &AgreementRecord,
    mutator: &mut RecordMutator<'_>,
) -> Result<Option<AgreementRecord>> {
    let mut working = current.clone();
    mutator(&mut working)?;
    // identity and bookkeeping are owned by the store
    working.id = current.id;
    working.created_at = current.created_at;
    working.version = current.version;
    working.updated_at = current.updated_at;
    if working == *current {
        return Ok(None);
    }
    working.version = current.version + 1;
    working.updated_at = Utc::now();
    Ok(Some(working))
}

/// Build a validated record for insertion
pub(crate) fn new_record(fields: NewAgreement) -> Result<AgreementRecord> {
    fields.validate()?;
    Ok(AgreementRecord::new(Uuid::new_v4(), fields, Utc::now()))
}

type RecordCell = Arc<Mutex<Option<AgreementRecord>>>;

/// Non-durable store for tests and embedding.
///
/// Each record lives in its own async mutex; the outer map lock is only held
/// long enough to find the cell.
#[derive(Debug, Default)]
pub struct InMemoryAgreementStore {
    records: RwLock<HashMap<AgreementId, RecordCell>>,
}

impl InMemoryAgreementStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, id: AgreementId) -> Result<RecordCell> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AgreementError::NotFound(id))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AgreementStore for InMemoryAgreementStore {
    async fn create(&self, fields: NewAgreement) -> Result<AgreementRecord> {
        let record = new_record(fields)?;
        self.records
            .write()
            .await
            .insert(record.id, Arc::new(Mutex::new(Some(record.clone()))));
        debug!(agreement.id = %record.id, "Created agreement in memory");
        Ok(record)
    }

    async fn get(&self, id: AgreementId) -> Result<AgreementRecord> {
        let cell = self.cell(id).await?;
        let guard = cell.lock().await;
        guard.clone().ok_or(AgreementError::NotFound(id))
    }

    async fn update<'a>(&self, id: AgreementId, mut mutator: RecordMutator<'a>) -> Result<AgreementRecord> {
        let cell = self.cell(id).await?;
        let mut guard = cell.lock().await;
        // a concurrent delete empties the cell before removing it from the map
        let next = {
            let current = guard.as_ref().ok_or(AgreementError::NotFound(id))?;
            apply_mutator(current, &mut mutator)?
        };
        match next {
            Some(next) => {
                *guard = Some(next.clone());
                Ok(next)
            }
            None => guard.clone().ok_or(AgreementError::NotFound(id)),
        }
    }

    async fn list(&self, filter: &AgreementFilter, page: PageRequest) -> Result<AgreementPage> {
        let cells: Vec<RecordCell> = self.records.read().await.values().cloned().collect();
        let mut matching = Vec::new();
        for cell in cells {
            if let Some(record) = cell.lock().await.as_ref() {
                if filter.matches(record) {
                    matching.push(record.clone());
                }
            }
        }
        sort_for_listing(&mut matching);
        Ok(AgreementPage::from_sorted(matching, &page))
    }

    async fn delete(&self, id: AgreementId) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.remove(&id) {
            Some(cell) => {
                cell.lock().await.take();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Lazy, restartable walk over every record matching a filter.
///
/// Pages are fetched on demand. The cursor of the last page served can be
/// saved and handed to [`AgreementScan::resume`] to continue later.
pub struct AgreementScan<'s> {
    store: &'s dyn AgreementStore,
    filter: AgreementFilter,
    page_size: usize,
    cursor: Option<ListCursor>,
    exhausted: bool,
}

impl<'s> AgreementScan<'s> {
    pub fn new(store: &'s dyn AgreementStore, filter: AgreementFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            cursor: None,
            exhausted: false,
        }
    }

    pub fn resume(
        store: &'s dyn AgreementStore,
        filter: AgreementFilter,
        page_size: usize,
        cursor: ListCursor,
    ) -> Self {
        let mut scan = Self::new(store, filter, page_size);
        scan.cursor = Some(cursor);
        scan
    }

    /// Position after the last page served
    pub fn cursor(&self) -> Option<ListCursor> {
        self.cursor
    }

    /// Fetch the next page; `None` once the listing is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<AgreementRecord>>> {
        if self.exhausted {
            return Ok(None);
        }
        let request = PageRequest {
            after: self.cursor,
            limit: self.page_size,
        };
        let page = self.store.list(&self.filter, request).await?;
        if let Some(last) = page.records.last() {
            self.cursor = Some(ListCursor::of(last));
        }
        self.exhausted = page.next_cursor.is_none();
        if page.records.is_empty() {
            return Ok(None);
        }
        Ok(Some(page.records))
    }

    /// Drain the remaining pages
    pub async fn collect_all(mut self) -> Result<Vec<AgreementRecord>> {
        let mut all = Vec::new();
        while let Some(records) = self.next_page().await? {
            all.extend(records);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreements::AgreementStatus;

    fn acme() -> NewAgreement {
        NewAgreement::new("Acme", "MSA", "Acme MSA")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryAgreementStore::new();
        let created = store.create(acme()).await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.version, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let store = InMemoryAgreementStore::new();
        let err = store.create(NewAgreement::new("", "MSA", "x")).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let store = InMemoryAgreementStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(AgreementError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_update_bumps_version_only_on_change() {
        let store = InMemoryAgreementStore::new();
        let record = store.create(acme()).await.unwrap();

        let unchanged = store.update(record.id, Box::new(|_| Ok(()))).await.unwrap();
        assert_eq!(unchanged.version, 0);

        let changed = store
            .update(
                record.id,
                Box::new(|r| {
                    r.step_mut(1).notes = Some("kickoff".to_string());
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(changed.version, 1);
        assert_eq!(store.get(record.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_failed_mutator_writes_nothing() {
        let store = InMemoryAgreementStore::new();
        let record = store.create(acme()).await.unwrap();
        let result = store
            .update(
                record.id,
                Box::new(|r| {
                    r.current_step = 4;
                    Err(AgreementError::Validation("rejected".to_string()))
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(record.id).await.unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn test_mutator_cannot_rewrite_identity() {
        let store = InMemoryAgreementStore::new();
        let record = store.create(acme()).await.unwrap();
        let updated = store
            .update(
                record.id,
                Box::new(|r| {
                    r.id = Uuid::new_v4();
                    r.version = 99;
                    r.title = "Renamed".to_string();
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, record.id);
        assert_eq!(updated.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_serialized() {
        let store = Arc::new(InMemoryAgreementStore::new());
        let record = store.create(acme()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        record.id,
                        Box::new(|r| {
                            r.handoff.attempts += 1;
                            Ok(())
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let final_record = store.get(record.id).await.unwrap();
        assert_eq!(final_record.handoff.attempts, 32);
        assert_eq!(final_record.version, 32);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryAgreementStore::new();
        let record = store.create(acme()).await.unwrap();
        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert!(store.get(record.id).await.is_err());
        assert!(store.update(record.id, Box::new(|_| Ok(()))).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_is_restartable() {
        let store = InMemoryAgreementStore::new();
        for i in 0..7 {
            store
                .create(NewAgreement::new(format!("Client {i}"), "NDA", format!("NDA {i}")))
                .await
                .unwrap();
        }

        let mut scan = AgreementScan::new(&store, AgreementFilter::all(), 3);
        let first = scan.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 3);
        let saved = scan.cursor().unwrap();

        let rest = AgreementScan::resume(&store, AgreementFilter::all(), 3, saved)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(rest.len(), 4);
        assert!(rest.iter().all(|r| !first.iter().any(|f| f.id == r.id)));

        let everything = AgreementScan::new(&store, AgreementFilter::all(), 3)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(everything.len(), 7);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = InMemoryAgreementStore::new();
        let a = store.create(acme()).await.unwrap();
        store.create(acme()).await.unwrap();
        store
            .update(
                a.id,
                Box::new(|r| {
                    r.status = AgreementStatus::Completed;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let filter = AgreementFilter {
            status: Some(AgreementStatus::Completed),
            ..Default::default()
        };
        let page = store.list(&filter, PageRequest::default()).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, a.id);
        assert!(page.next_cursor.is_none());
    }
}
