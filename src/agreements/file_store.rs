use async_trait::async_trait;
use fd_lock::RwLock as FileLock;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{apply_mutator, new_record, AgreementStore, RecordMutator};
use super::types::{
    sort_for_listing, AgreementFilter, AgreementId, AgreementPage, AgreementRecord, NewAgreement,
    PageRequest,
};
use crate::errors::{AgreementError, Result};

const RECORDS_DIR: &str = "agreements";
const LOCK_FILE: &str = "store.lock";

/// Durable store keeping one JSON document per agreement.
///
/// A data directory belongs to a single process at a time: opening takes an
/// exclusive lock on `store.lock` and a second open fails fast. Within the
/// process, updates of one record are serialized by a per-record mutex and
/// written with write-to-temp plus rename so readers never see a torn file.
pub struct FileSystemAgreementStore {
    root: PathBuf,
    record_locks: Mutex<HashMap<AgreementId, Arc<Mutex<()>>>>,
    // the write lock lives as long as this handle; closing it on drop releases the directory
    _dir_lock: FileLock<File>,
}

impl std::fmt::Debug for FileSystemAgreementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemAgreementStore")
            .field("root", &self.root)
            .finish()
    }
}

impl FileSystemAgreementStore {
    /// Open (creating if needed) a data directory and take ownership of it
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(RECORDS_DIR))
            .await
            .map_err(|e| AgreementError::storage(e, format!("creating {}", root.display())))?;

        let lock_file = File::create(root.join(LOCK_FILE))?;
        let mut dir_lock = FileLock::new(lock_file);
        let guard = dir_lock.try_write().map_err(|_| {
            AgreementError::Storage(format!(
                "data directory {} is already in use by another process",
                root.display()
            ))
        })?;
        // keep the lock without the borrow; it is dropped together with the file handle
        std::mem::forget(guard);

        info!("Opened agreement store at {}", root.display());
        Ok(Self {
            root,
            record_locks: Mutex::new(HashMap::new()),
            _dir_lock: dir_lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: AgreementId) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{id}.json"))
    }

    async fn record_lock(&self, id: AgreementId) -> Arc<Mutex<()>> {
        self.record_locks
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_record(&self, id: AgreementId) -> Result<AgreementRecord> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgreementError::NotFound(id))
            }
            Err(e) => return Err(AgreementError::storage(e, format!("reading {}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| AgreementError::storage(e, format!("corrupt record {}", path.display())))
    }

    async fn write_record(&self, record: &AgreementRecord) -> Result<()> {
        let path = self.record_path(record.id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, contents)
            .await
            .map_err(|e| AgreementError::storage(e, format!("writing {}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgreementError::storage(e, format!("replacing {}", path.display())))?;
        debug!(agreement.id = %record.id, version = record.version, "Persisted agreement");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AgreementRecord>> {
        let mut entries = fs::read_dir(self.root.join(RECORDS_DIR)).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // deleted between read_dir and read
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<AgreementRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AgreementStore for FileSystemAgreementStore {
    async fn create(&self, fields: NewAgreement) -> Result<AgreementRecord> {
        let record = new_record(fields)?;
        let lock = self.record_lock(record.id).await;
        let _guard = lock.lock().await;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn get(&self, id: AgreementId) -> Result<AgreementRecord> {
        self.read_record(id).await
    }

    async fn update<'a>(&self, id: AgreementId, mut mutator: RecordMutator<'a>) -> Result<AgreementRecord> {
        let lock = self.record_lock(id).await;
        let _guard = lock.lock().await;
        let current = self.read_record(id).await?;
        match apply_mutator(&current, &mut mutator)? {
            Some(next) => {
                self.write_record(&next).await?;
                Ok(next)
            }
            None => Ok(current),
        }
    }

    async fn list(&self, filter: &AgreementFilter, page: PageRequest) -> Result<AgreementPage> {
        let mut matching: Vec<AgreementRecord> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        sort_for_listing(&mut matching);
        Ok(AgreementPage::from_sorted(matching, &page))
    }

    async fn delete(&self, id: AgreementId) -> Result<bool> {
        let lock = self.record_lock(id).await;
        let removed = {
            let _guard = lock.lock().await;
            match fs::remove_file(self.record_path(id)).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            }
        };
        self.record_locks.lock().await.remove(&id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn acme() -> NewAgreement {
        NewAgreement::new("Acme", "MSA", "Acme MSA").with_amount(1200.0)
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let id = {
            let store = FileSystemAgreementStore::open(temp.path()).await.unwrap();
            let record = store.create(acme()).await.unwrap();
            store
                .update(
                    record.id,
                    Box::new(|r| {
                        r.step_mut(1).notes = Some("signed off".to_string());
                        Ok(())
                    }),
                )
                .await
                .unwrap();
            record.id
        };

        let reopened = FileSystemAgreementStore::open(temp.path()).await.unwrap();
        let record = reopened.get(id).await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.step(1).notes.as_deref(), Some("signed off"));
        assert_eq!(record.amount, Some(1200.0));
    }

    #[tokio::test]
    async fn test_second_open_is_rejected() {
        let temp = TempDir::new().unwrap();
        let _first = FileSystemAgreementStore::open(temp.path()).await.unwrap();
        let second = FileSystemAgreementStore::open(temp.path()).await;
        assert!(matches!(second, Err(AgreementError::Storage(_))));
    }

    #[tokio::test]
    async fn test_dropping_store_releases_directory() {
        let temp = TempDir::new().unwrap();
        for _ in 0..3 {
            let store = FileSystemAgreementStore::open(temp.path()).await.unwrap();
            store.create(acme()).await.unwrap();
        }
        let store = FileSystemAgreementStore::open(temp.path()).await.unwrap();
        let page = store
            .list(&AgreementFilter::all(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.records.len(), 3);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_reopening_does_not_leak_lock_files() {
        fn lock_handles(lock_path: &Path) -> usize {
            std::fs::read_dir("/proc/self/fd")
                .unwrap()
                .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
                .filter(|target| target == lock_path)
                .count()
        }

        let temp = TempDir::new().unwrap();
        let lock_path = std::fs::canonicalize(temp.path()).unwrap().join(LOCK_FILE);
        for _ in 0..20 {
            let store = FileSystemAgreementStore::open(temp.path()).await.unwrap();
            assert_eq!(lock_handles(&lock_path), 1);
            drop(store);
        }
        assert_eq!(lock_handles(&lock_path), 0);
    }

    #[tokio::test]
    async fn test_missing_and_deleted_records() {
        let temp = TempDir::new().unwrap();
        let store = FileSystemAgreementStore::open(temp.path()).await.unwrap();
        let record = store.create(acme()).await.unwrap();

        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert!(matches!(
            store.get(record.id).await,
            Err(AgreementError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_ignores_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = FileSystemAgreementStore::open(temp.path()).await.unwrap();
        store.create(acme()).await.unwrap();
        store.create(acme()).await.unwrap();
        std::fs::write(temp.path().join(RECORDS_DIR).join("stray.json.tmp"), b"{").unwrap();

        let page = store
            .list(&AgreementFilter::all(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileSystemAgreementStore::open(temp.path()).await.unwrap());
        let record = store.create(acme()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
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
        assert_eq!(store.get(record.id).await.unwrap().handoff.attempts, 10);
    }
}
