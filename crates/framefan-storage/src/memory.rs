//! In-memory object store for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectInfo, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: i64,
}

/// Thread-safe via `RwLock`. Not suitable for production.
///
/// Keys are kept in a `BTreeMap` so listings come back in the same
/// lexicographic order S3 uses.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    writes: Arc<AtomicU64>,
    failing_writes: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes (puts and deletes) so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` writes fail with a retryable upload error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Insert an object with an explicit modification time.
    pub fn insert_at(&self, key: &str, body: impl Into<Bytes>, last_modified: i64) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    data: body.into(),
                    last_modified,
                },
            );
        }
    }

    /// Every key currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn take_injected_failure(&self, key: &str) -> StorageResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StorageError::upload_failed(format!(
                "injected failure writing {key}"
            )));
        }
        Ok(())
    }

    fn read(
        &self,
    ) -> StorageResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>>> {
        self.objects
            .read()
            .map_err(|_| StorageError::Internal("lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> StorageResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredObject>>> {
        self.objects
            .write()
            .map_err(|_| StorageError::Internal("lock poisoned".into()))
    }
}

fn info(key: &str, object: &StoredObject) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: object.data.len() as u64,
        last_modified: Some(object.last_modified),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> StorageResult<()> {
        self.take_injected_failure(key)?;
        self.write()?.insert(
            key.to_string(),
            StoredObject {
                data: body,
                last_modified: Utc::now().timestamp_millis(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> StorageResult<bool> {
        self.take_injected_failure(key)?;
        let mut objects = self.write()?;
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                last_modified: Utc::now().timestamp_millis(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.read()?
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
        Ok(self.read()?.get(key).map(|o| info(key, o)))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        Ok(self
            .read()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| info(k, o))
            .collect())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.write()?.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut objects = self.write()?;
        for key in keys {
            objects.remove(key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(keys.len() as u32)
    }
}
