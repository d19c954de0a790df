use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use roomkeeper_core::{ResourceId, ResourceRecord};
use tokio::sync::Mutex;

use crate::error::LifecycleError;
use crate::json_file;

/// Durable storage for the whole record collection.
///
/// Backends only load and replace the full list; all read-modify-write logic
/// lives in [`RegistryStore`].
pub trait RegistryBackend: Send + Sync {
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ResourceRecord>, LifecycleError>> + Send + 'a>>;

    fn save<'a>(
        &'a self,
        records: &'a [ResourceRecord],
    ) -> Pin<Box<dyn Future<Output = Result<(), LifecycleError>> + Send + 'a>>;

    /// Backend name for logging.
    fn backend_name(&self) -> &str;
}

/// JSON file backend (`rooms.json`).
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

}

impl RegistryBackend for JsonFileBackend {
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ResourceRecord>, LifecycleError>> + Send + 'a>> {
        Box::pin(json_file::read_list::<ResourceRecord>(&self.path))
    }

    fn save<'a>(
        &'a self,
        records: &'a [ResourceRecord],
    ) -> Pin<Box<dyn Future<Output = Result<(), LifecycleError>> + Send + 'a>> {
        Box::pin(json_file::write_list(&self.path, records))
    }

    fn backend_name(&self) -> &str {
        "json-file"
    }
}

/// Volatile backend for tests and dry runs.
#[derive(Default)]
pub struct MemoryBackend {
    records: StdMutex<Vec<ResourceRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryBackend for MemoryBackend {
    fn load<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ResourceRecord>, LifecycleError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone())
        })
    }

    fn save<'a>(
        &'a self,
        records: &'a [ResourceRecord],
    ) -> Pin<Box<dyn Future<Output = Result<(), LifecycleError>> + Send + 'a>> {
        Box::pin(async move {
            *self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = records.to_vec();
            Ok(())
        })
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// The registry of managed rooms.
///
/// Every operation runs under one mutation lock, so the reconciliation loop
/// and the deletion controls never write from stale reads. A missing or
/// corrupt backing store reads as empty and is overwritten by the next write.
pub struct RegistryStore {
    backend: Arc<dyn RegistryBackend>,
    lock: Mutex<()>,
}

impl RegistryStore {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    /// File-backed registry at `path`.
    pub fn open(path: PathBuf) -> Self {
        Self::new(Arc::new(JsonFileBackend::new(path)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    async fn load_or_empty(&self) -> Vec<ResourceRecord> {
        match self.backend.load().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.backend_name(),
                    "Registry unreadable, treating as empty: {e}"
                );
                Vec::new()
            }
        }
    }

    /// All current records. Never fails.
    pub async fn list(&self) -> Vec<ResourceRecord> {
        let _guard = self.lock.lock().await;
        self.load_or_empty().await
    }

    pub async fn get(&self, id: ResourceId) -> Option<ResourceRecord> {
        self.list().await.into_iter().find(|r| r.resource_id == id)
    }

    pub async fn add(&self, record: ResourceRecord) -> Result<(), LifecycleError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load_or_empty().await;
        if records.iter().any(|r| r.resource_id == record.resource_id) {
            return Err(LifecycleError::DuplicateResource(record.resource_id));
        }
        let id = record.resource_id;
        records.push(record);
        self.backend.save(&records).await?;
        tracing::info!(resource_id = %id, total = records.len(), "Room registered");
        Ok(())
    }

    /// Remove one record. Removing an absent id is a no-op; returns whether a
    /// record was removed.
    pub async fn remove(&self, id: ResourceId) -> Result<bool, LifecycleError> {
        let removed = self.remove_many(&HashSet::from([id])).await?;
        Ok(removed > 0)
    }

    /// Remove every listed record in a single write. Returns how many were
    /// present.
    pub async fn remove_many(&self, ids: &HashSet<ResourceId>) -> Result<usize, LifecycleError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().await;
        let mut records = self.load_or_empty().await;
        let before = records.len();
        records.retain(|r| !ids.contains(&r.resource_id));
        let removed = before - records.len();
        if removed == 0 {
            return Ok(0);
        }
        self.backend.save(&records).await?;
        tracing::info!(removed, remaining = records.len(), "Rooms deregistered");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_core::{MessageId, MessageRef, SurfaceId, UserId};
    use tempfile::TempDir;

    fn record(id: u64) -> ResourceRecord {
        ResourceRecord::new(ResourceId(id), UserId(7), None)
    }

    #[tokio::test]
    async fn add_and_list() {
        let registry = RegistryStore::in_memory();
        registry.add(record(1)).await.unwrap();
        registry.add(record(2)).await.unwrap();

        let ids: Vec<_> = registry.list().await.iter().map(|r| r.resource_id).collect();
        assert_eq!(ids, vec![ResourceId(1), ResourceId(2)]);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let registry = RegistryStore::in_memory();
        registry.add(record(1)).await.unwrap();
        let err = registry.add(record(1)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateResource(ResourceId(1))));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = RegistryStore::in_memory();
        registry.add(record(1)).await.unwrap();
        registry.add(record(2)).await.unwrap();

        assert!(registry.remove(ResourceId(1)).await.unwrap());
        assert!(!registry.remove(ResourceId(1)).await.unwrap());

        let ids: Vec<_> = registry.list().await.iter().map(|r| r.resource_id).collect();
        assert_eq!(ids, vec![ResourceId(2)]);
    }

    #[tokio::test]
    async fn remove_many_removes_only_listed() {
        let registry = RegistryStore::in_memory();
        for id in 1..=4 {
            registry.add(record(id)).await.unwrap();
        }
        let removed = registry
            .remove_many(&HashSet::from([ResourceId(2), ResourceId(4), ResourceId(9)]))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let ids: Vec<_> = registry.list().await.iter().map(|r| r.resource_id).collect();
        assert_eq!(ids, vec![ResourceId(1), ResourceId(3)]);
    }

    #[tokio::test]
    async fn get_finds_record() {
        let registry = RegistryStore::in_memory();
        registry.add(record(5)).await.unwrap();
        assert!(registry.get(ResourceId(5)).await.is_some());
        assert!(registry.get(ResourceId(6)).await.is_none());
    }

    #[tokio::test]
    async fn file_registry_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rooms.json");

        let registry = RegistryStore::open(path.clone());
        registry
            .add(ResourceRecord::new(
                ResourceId(1),
                UserId(2),
                Some(MessageRef {
                    surface_id: SurfaceId(3),
                    message_id: MessageId(4),
                }),
            ))
            .await
            .unwrap();

        let reopened = RegistryStore::open(path);
        let records = reopened.list().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_owned_by(UserId(2)));
    }

    #[tokio::test]
    async fn corrupt_file_reads_empty_and_heals_on_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rooms.json");
        tokio::fs::write(&path, "this is not json").await.unwrap();

        let registry = RegistryStore::open(path.clone());
        assert!(registry.list().await.is_empty());

        registry.add(record(1)).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<ResourceRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, vec![record(1)]);
    }

    #[tokio::test]
    async fn legacy_shapes_are_rewritten_canonically() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rooms.json");
        tokio::fs::write(
            &path,
            r#"[11, {"channel_id": 12, "message_id": 5, "message_channel_id": 6}, {"channel_id": null}]"#,
        )
        .await
        .unwrap();

        let registry = RegistryStore::open(path.clone());
        let ids: Vec<_> = registry.list().await.iter().map(|r| r.resource_id).collect();
        assert_eq!(ids, vec![ResourceId(11), ResourceId(12)]);

        registry.remove(ResourceId(11)).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            raw,
            serde_json::json!([{
                "resource_id": 12,
                "owner_id": null,
                "status_message": {"surface_id": 6, "message_id": 5}
            }])
        );
    }

    #[tokio::test]
    async fn concurrent_adds_do_not_lose_updates() {
        let registry = Arc::new(RegistryStore::in_memory());
        let mut handles = Vec::new();
        for id in 0..20 {
            let r = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { r.add(record(id)).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(registry.list().await.len(), 20);
    }
}
