//! Typed reads and writes of coordination records.
//!
//! Every function here takes the key from [`ObjectKey`]; nothing builds a
//! path by hand.

use bytes::Bytes;
use chrono::Utc;
use framefan_models::{EncodingProgress, ErrorRecord, PostRenderData, RenderId, RenderMetadata};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::keys::{errors_prefix, render_prefix, KeyKind, ObjectKey};
use crate::store::{ObjectInfo, ObjectStore};

/// An object under a render prefix whose key parsed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderObject {
    pub key: ObjectKey,
    pub info: ObjectInfo,
}

async fn put_json<T: Serialize>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    value: &T,
) -> StorageResult<String> {
    let path = key.encode();
    let body = serde_json::to_vec(value)?;
    store
        .put(&path, Bytes::from(body), key.kind().content_type())
        .await?;
    Ok(path)
}

async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
) -> StorageResult<Option<T>> {
    match store.get(&key.encode()).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn write_render_metadata(
    store: &dyn ObjectStore,
    metadata: &RenderMetadata,
) -> StorageResult<String> {
    let key = ObjectKey::RenderMetadata {
        render_id: metadata.render_id.clone(),
    };
    put_json(store, &key, metadata).await
}

pub async fn read_render_metadata(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<RenderMetadata>> {
    let key = ObjectKey::RenderMetadata {
        render_id: render_id.clone(),
    };
    get_json(store, &key).await
}

/// Write the completion record unless one already exists.
///
/// Returns `false` if another writer got there first.
pub async fn write_post_render_data_once(
    store: &dyn ObjectStore,
    data: &PostRenderData,
) -> StorageResult<bool> {
    let key = ObjectKey::PostRenderData {
        render_id: data.render_id.clone(),
    };
    let body = serde_json::to_vec(data)?;
    store
        .put_if_absent(&key.encode(), Bytes::from(body), key.kind().content_type())
        .await
}

pub async fn read_post_render_data(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<PostRenderData>> {
    let key = ObjectKey::PostRenderData {
        render_id: render_id.clone(),
    };
    get_json(store, &key).await
}

pub async fn write_encoding_progress(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    progress: &EncodingProgress,
) -> StorageResult<String> {
    let key = ObjectKey::EncodingProgress {
        render_id: render_id.clone(),
    };
    put_json(store, &key, progress).await
}

pub async fn read_encoding_progress(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<EncodingProgress>> {
    let key = ObjectKey::EncodingProgress {
        render_id: render_id.clone(),
    };
    get_json(store, &key).await
}

/// The key an error record is stored under.
pub fn error_record_key(render_id: &RenderId, record: &ErrorRecord) -> ObjectKey {
    match record.chunk {
        Some(chunk) => ObjectKey::ChunkError {
            render_id: render_id.clone(),
            chunk,
            attempt: record.attempt,
        },
        None => ObjectKey::RenderError {
            render_id: render_id.clone(),
            attempt: record.attempt,
        },
    }
}

pub async fn write_error_record(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    record: &ErrorRecord,
) -> StorageResult<String> {
    put_json(store, &error_record_key(render_id, record), record).await
}

/// Read every error record of a render. Unreadable records are skipped.
pub async fn read_error_records(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Vec<ErrorRecord>> {
    let mut records = Vec::new();
    for object in store.list(&errors_prefix(render_id)).await? {
        match store.get(&object.key).await {
            Ok(bytes) => match serde_json::from_slice::<ErrorRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %object.key, error = %e, "Skipping unreadable error record"),
            },
            // Listed but gone: eventual consistency, not an error.
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Record that `attempt` of `chunk` has started.
///
/// Rewriting the same marker is harmless; only its presence is read.
pub async fn write_initialization_marker(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    chunk: u32,
    attempt: u32,
) -> StorageResult<String> {
    let key = ObjectKey::InitializationMarker {
        render_id: render_id.clone(),
        chunk,
        attempt,
    };
    let path = key.encode();
    let body = Utc::now().timestamp_millis().to_string();
    store
        .put(&path, Bytes::from(body), key.kind().content_type())
        .await?;
    Ok(path)
}

/// Record that `chunk` finished rendering.
pub async fn write_timing_record(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    chunk: u32,
    start: i64,
    rendered: i64,
) -> StorageResult<String> {
    let key = ObjectKey::TimingRecord {
        render_id: render_id.clone(),
        chunk,
        start,
        rendered,
    };
    let path = key.encode();
    store
        .put(&path, Bytes::from_static(b"1"), key.kind().content_type())
        .await?;
    Ok(path)
}

pub async fn write_chunk_payload(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    chunk: u32,
    body: Bytes,
) -> StorageResult<String> {
    let key = ObjectKey::ChunkPayload {
        render_id: render_id.clone(),
        chunk,
    };
    let path = key.encode();
    store.put(&path, body, key.kind().content_type()).await?;
    Ok(path)
}

/// List and decode every object under `renders/{id}/`.
///
/// Keys that do not parse are logged and skipped; they never fail the listing.
pub async fn list_render_objects(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Vec<RenderObject>> {
    let listed = store.list(&render_prefix(render_id)).await?;
    let mut objects = Vec::with_capacity(listed.len());
    for info in listed {
        match ObjectKey::decode(&info.key) {
            Ok(key) if key.render_id() == render_id => objects.push(RenderObject { key, info }),
            Ok(key) => debug!(key = %key, "Skipping key from another render"),
            Err(e) => warn!(render_id = %render_id, error = %e, "Skipping malformed key"),
        }
    }
    Ok(objects)
}

/// Keys of a given kind within a listing.
pub fn of_kind(objects: &[RenderObject], kind: KeyKind) -> impl Iterator<Item = &RenderObject> {
    objects.iter().filter(move |o| o.key.kind() == kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use framefan_models::ErrorSource;

    fn id() -> RenderId {
        RenderId::parse("abcdef").unwrap()
    }

    fn error(chunk: Option<u32>, attempt: u32) -> ErrorRecord {
        ErrorRecord {
            source: ErrorSource::Renderer,
            name: "Error".into(),
            message: "boom".into(),
            stack: String::new(),
            chunk,
            attempt,
            total_attempts: 2,
            will_retry: false,
            is_fatal: true,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_missing_records_read_as_none() {
        let store = MemoryStore::new();
        assert!(read_render_metadata(&store, &id()).await.unwrap().is_none());
        assert!(read_post_render_data(&store, &id()).await.unwrap().is_none());
        assert!(read_encoding_progress(&store, &id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_records_by_chunk_and_render() {
        let store = MemoryStore::new();
        let chunk_key = write_error_record(&store, &id(), &error(Some(2), 1)).await.unwrap();
        let render_key = write_error_record(&store, &id(), &error(None, 1)).await.unwrap();

        assert_eq!(chunk_key, "renders/abcdef/errors/chunk:00000002-attempt:1.json");
        assert_eq!(render_key, "renders/abcdef/errors/render-attempt:1.json");

        let records = read_error_records(&store, &id()).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_listing_skips_malformed_keys() {
        let store = MemoryStore::new();
        write_initialization_marker(&store, &id(), 0, 1).await.unwrap();
        write_timing_record(&store, &id(), 0, 10, 20).await.unwrap();
        store.insert_at("renders/abcdef/garbage.bin", Bytes::new(), 0);
        store.insert_at("renders/abcdefg/pre-render-metadata.json", Bytes::new(), 0);

        let objects = list_render_objects(&store, &id()).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(of_kind(&objects, KeyKind::InitializationMarker).count(), 1);
        assert_eq!(of_kind(&objects, KeyKind::TimingRecord).count(), 1);
    }

    #[tokio::test]
    async fn test_post_render_data_written_once() {
        let store = MemoryStore::new();
        let data = PostRenderData {
            render_id: id(),
            output_file: "renders/abcdef/out.mp4".into(),
            output_size: 1,
            start_time: 0,
            end_time: 1,
            time_to_finish: 1,
            chunk_count: 1,
            lambdas_invoked: 1,
            retries: vec![],
            timings: vec![],
        };
        assert!(write_post_render_data_once(&store, &data).await.unwrap());
        assert!(!write_post_render_data_once(&store, &data).await.unwrap());
        assert_eq!(read_post_render_data(&store, &id()).await.unwrap(), Some(data));
    }
}
