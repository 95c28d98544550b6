//! Persistent upload queue for depot.
//!
//! Uploaded files go to a [`BlobStore`](depot_store::BlobStore); the queue
//! keeps one [`UploadRequest`](depot_types::UploadRequest) per file in the
//! `"cache"` container of a [`KvRoot`](depot_kv::KvRoot), keyed by blob hash.
//! Requests leave the queue oldest first. A consumer delivering a request
//! holds a lease on it in the `"cache_leases"` container, so queues in
//! several processes sharing one store never hand the same request to two
//! consumers at once.
//!
//! # Modules
//!
//! - [`error`]: Error types for queue operations
//! - [`queue`]: [`UploadQueue`] and the scoped [`Acquired`] view

pub mod error;
pub mod queue;

pub use error::{QueueError, Result};
pub use queue::{Acquired, OnDuplicate, QueueConfig, UploadQueue, CACHE_CONTAINER, LEASE_CONTAINER};
