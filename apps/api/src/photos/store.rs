use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard as SyncMutexGuard, PoisonError};

use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};

use crate::models::photo::{PhotoPatch, PhotoRecord};

/// In-memory record store shared by the pipeline and the views.
///
/// Records keep upload order. Every mutation runs under the write half of a
/// single `RwLock`, so readers never observe a half-merged record. Callers that
/// need "mutate, then persist" to be atomic per photo take [`PhotoStore::lock_id`]
/// for the duration of the sequence.
pub struct PhotoStore {
    records: RwLock<Vec<PhotoRecord>>,
    notes: RwLock<HashMap<String, String>>,
    id_locks: Arc<LockTable>,
    revision: watch::Sender<u64>,
}

impl PhotoStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            notes: RwLock::new(HashMap::new()),
            id_locks: Arc::new(LockTable::default()),
            revision,
        }
    }

    /// Inserts the record, or overwrites every field of the record with the same id
    /// while keeping its position.
    pub async fn upsert(&self, record: PhotoRecord) -> PhotoRecord {
        let stored = {
            let mut records = self.records.write().await;
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => {
                    *existing = record;
                    existing.clone()
                }
                None => {
                    records.push(record.clone());
                    record
                }
            }
        };
        self.bump();
        stored
    }

    /// Applies a partial update to an existing record.
    /// Returns `None` without inserting anything when the id is unknown.
    pub async fn merge(&self, id: &str, patch: PhotoPatch) -> Option<PhotoRecord> {
        let merged = {
            let mut records = self.records.write().await;
            let existing = records.iter_mut().find(|r| r.id == id)?;
            existing.apply(patch);
            existing.clone()
        };
        self.bump();
        Some(merged)
    }

    /// Removes the record and its note. Absent ids are a no-op.
    pub async fn remove_by_id(&self, id: &str) -> Option<PhotoRecord> {
        let removed = {
            let mut records = self.records.write().await;
            let position = records.iter().position(|r| r.id == id);
            position.map(|index| records.remove(index))
        };
        let note_removed = self.notes.write().await.remove(id).is_some();
        if removed.is_some() || note_removed {
            self.bump();
        }
        removed
    }

    pub async fn find_by_id(&self, id: &str) -> Option<PhotoRecord> {
        self.records.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.iter().any(|r| r.id == id)
    }

    /// Snapshot of every record in upload order.
    pub async fn all(&self) -> Vec<PhotoRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn set_note(&self, photo_id: &str, text: &str) {
        self.notes
            .write()
            .await
            .insert(photo_id.to_string(), text.to_string());
        self.bump();
    }

    pub async fn note(&self, photo_id: &str) -> Option<String> {
        self.notes.read().await.get(photo_id).cloned()
    }

    pub async fn notes(&self) -> HashMap<String, String> {
        self.notes.read().await.clone()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.notes.write().await.clear();
        self.bump();
    }

    /// Per-photo lock. Distinct ids never contend. The entry for `id` is
    /// dropped from the table once the last holder or waiter lets go.
    pub async fn lock_id(&self, id: &str) -> PhotoLockGuard {
        let lock = Arc::clone(self.id_locks.entries().entry(id.to_string()).or_default());
        let mut held = PhotoLockGuard {
            id: id.to_string(),
            table: Arc::clone(&self.id_locks),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.id_locks.entries().len()
    }

    /// Revision counter bumped on every mutation; views re-read snapshots when it changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Id to mutex table. Only touched synchronously, never across an await.
#[derive(Default)]
struct LockTable(SyncMutex<HashMap<String, Arc<Mutex<()>>>>);

impl LockTable {
    fn entries(&self) -> SyncMutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held per-photo lock from [`PhotoStore::lock_id`].
pub struct PhotoLockGuard {
    id: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PhotoLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only handed out under the table lock, so a count of one
        // here means nobody holds or awaits this id.
        let mut entries = self.table.entries();
        if entries
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(&self.id);
        }
    }
}

impl Default for PhotoStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::photo::{sample_record, EnrichmentStatus};

    #[tokio::test]
    async fn test_upsert_inserts_then_overwrites_in_place() {
        let store = PhotoStore::new();
        store.upsert(sample_record("a", "2024-01-01")).await;
        store.upsert(sample_record("b", "2024-01-02")).await;

        let mut updated = sample_record("a", "2024-05-05");
        updated.location_name = "Lisbon".to_string();
        store.upsert(updated).await;

        let all = store.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].capture_date, "2024-05-05");
        assert_eq!(all[0].location_name, "Lisbon");
        assert_eq!(all[1].id, "b");
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = PhotoStore::new();
        let record = sample_record("a", "2024-01-01");
        store.upsert(record.clone()).await;
        let once = store.all().await;
        store.upsert(record).await;
        assert_eq!(store.all().await, once);
    }

    #[tokio::test]
    async fn test_merge_preserves_absent_fields() {
        let store = PhotoStore::new();
        let mut record = sample_record("a", "2024-01-01");
        record.description = "harbour".to_string();
        store.upsert(record).await;

        let merged = store
            .merge(
                "a",
                PhotoPatch {
                    latitude: Some(38.7),
                    longitude: Some(-9.1),
                    status: Some(EnrichmentStatus::Relocating),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(merged.latitude, 38.7);
        assert_eq!(merged.longitude, -9.1);
        assert_eq!(merged.description, "harbour");
        assert_eq!(merged.status, EnrichmentStatus::Relocating);
        assert_eq!(store.find_by_id("a").await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_merge_never_inserts() {
        let store = PhotoStore::new();
        let merged = store
            .merge(
                "ghost",
                PhotoPatch {
                    location_name: Some("Nowhere".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(merged.is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_remove_cascades_note_and_is_idempotent() {
        let store = PhotoStore::new();
        store.upsert(sample_record("a", "2024-01-01")).await;
        store.set_note("a", "first day").await;

        assert!(store.remove_by_id("a").await.is_some());
        assert!(store.find_by_id("a").await.is_none());
        assert!(store.note("a").await.is_none());

        assert!(store.remove_by_id("a").await.is_none());
        assert!(store.remove_by_id("never-existed").await.is_none());
    }

    #[tokio::test]
    async fn test_revision_bumps_on_mutation() {
        let store = PhotoStore::new();
        let rx = store.subscribe();
        let before = *rx.borrow();
        store.upsert(sample_record("a", "2024-01-01")).await;
        store.set_note("a", "hi").await;
        assert_eq!(*rx.borrow(), before + 2);

        // Removing an unknown id changes nothing.
        store.remove_by_id("zzz").await;
        assert_eq!(*rx.borrow(), before + 2);
    }

    #[tokio::test]
    async fn test_concurrent_merges_on_different_ids() {
        let store = Arc::new(PhotoStore::new());
        for i in 0..20 {
            store.upsert(sample_record(&format!("p{i}"), "2024-01-01")).await;
        }

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("p{i}");
                store
                    .merge(
                        &id,
                        PhotoPatch {
                            latitude: Some(i as f64 + 1.0),
                            description: Some(format!("photo {i}")),
                            ..Default::default()
                        },
                    )
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        for (i, record) in store.all().await.iter().enumerate() {
            assert_eq!(record.id, format!("p{i}"));
            assert_eq!(record.latitude, i as f64 + 1.0);
            assert_eq!(record.description, format!("photo {i}"));
        }
    }

    #[tokio::test]
    async fn test_lock_id_serializes_same_id_only() {
        let store = PhotoStore::new();
        let guard_a = store.lock_id("a").await;
        // A different id is immediately available.
        let guard_b = tokio::time::timeout(std::time::Duration::from_millis(50), store.lock_id("b"))
            .await
            .expect("lock for another id should not block");
        // The same id is held.
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), store.lock_id("a")).await;
        assert!(blocked.is_err());
        drop(guard_a);
        drop(guard_b);
        let _again = store.lock_id("a").await;
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow_with_unique_ids() {
        let store = PhotoStore::new();
        for i in 0..1000 {
            let _guard = store.lock_id(&format!("ghost-{i}")).await;
        }
        assert_eq!(store.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_contended_lock_is_released_after_last_holder() {
        let store = Arc::new(PhotoStore::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let first = store.lock_id("shared").await;
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = store.lock_id("shared").await;
                counter.lock().await.push(i);
            }));
        }
        tokio::task::yield_now().await;
        assert_eq!(store.tracked_locks(), 1);
        assert!(counter.lock().await.is_empty());

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.lock().await.len(), 10);
        assert_eq!(store.tracked_locks(), 0);
    }
}
