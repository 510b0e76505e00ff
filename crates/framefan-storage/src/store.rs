//! Object storage abstraction.
//!
//! Coordination only needs a small slice of object-storage semantics: plain
//! puts, a create-if-absent put, reads, metadata, prefix listing and deletes.
//! Both the S3 client and the in-memory store implement [`ObjectStore`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<i64>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<()>;

    /// Write an object only if nothing exists at `key`.
    ///
    /// Returns `false` when the object already existed. A lost race is a
    /// normal outcome, not an error.
    async fn put_if_absent(&self, key: &str, body: Bytes, content_type: &str)
        -> StorageResult<bool>;

    /// Read an object. Returns `StorageError::NotFound` if it does not exist.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Object metadata, or `None` if it does not exist.
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>>;

    /// All objects whose key starts with `prefix`, in lexicographic key order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete many objects, returning how many were requested.
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32>;

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.head(key).await?.is_some())
    }
}
