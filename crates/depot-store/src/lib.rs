//! Content-addressed blob storage for depot.
//!
//! Uploaded files are stored as opaque byte blobs identified by their
//! [`BlobHash`]. The upload queue keeps only the hash; the bytes live here
//! until the queued request is delivered.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBlobStore`] -- sharded directory layout on the local filesystem
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written (content-addressing guarantees this).
//! 2. `put` followed by `open` with the returned hash is immediately readable.
//! 3. `delete` is idempotent: deleting a missing hash succeeds.
//! 4. The store never interprets blob contents.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod filesystem;
pub mod memory;
pub mod traits;

pub use depot_types::BlobHash;
pub use error::{BlobError, BlobResult};
pub use filesystem::FsBlobStore;
pub use memory::InMemoryBlobStore;
pub use traits::{BlobReader, BlobStore};
