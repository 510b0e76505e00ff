//! Object storage layer for framefan.
//!
//! This crate provides:
//! - The key namespace: every coordination key is built and parsed here
//! - An `ObjectStore` trait with S3 and in-memory implementations
//! - Typed reads and writes of coordination records
//! - Cleanup planning and sweeping

pub mod cleanup;
pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod operations;
pub mod store;

pub use cleanup::{plan_cleanup, sweep, SweepReport};
pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use keys::{KeyKind, KeyLifetime, KeyParseError, ObjectKey};
pub use memory::MemoryStore;
pub use operations::RenderObject;
pub use store::{ObjectInfo, ObjectStore};
