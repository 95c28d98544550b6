use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use depot_types::BlobHash;

use crate::error::{BlobError, BlobResult};
use crate::traits::{BlobReader, BlobStore};

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` and
/// shared with readers through `Arc`, so opening a blob does not copy it.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobHash, Arc<[u8]>>>,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .map(|m| m.values().map(|b| b.len() as u64).sum())
            .unwrap_or(0)
    }

    fn poisoned() -> BlobError {
        BlobError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "blob store lock poisoned",
        ))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, data: &[u8]) -> BlobResult<BlobHash> {
        let hash = BlobHash::compute(data);
        let mut map = self.blobs.write().map_err(|_| Self::poisoned())?;
        // Idempotent: the same hash always maps to the same content.
        map.entry(hash).or_insert_with(|| Arc::from(data));
        Ok(hash)
    }

    fn open(&self, hash: &BlobHash) -> BlobResult<BlobReader> {
        let map = self.blobs.read().map_err(|_| Self::poisoned())?;
        let data = map.get(hash).cloned().ok_or(BlobError::NotFound(*hash))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn exists(&self, hash: &BlobHash) -> BlobResult<bool> {
        let map = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(map.contains_key(hash))
    }

    fn delete(&self, hash: &BlobHash) -> BlobResult<bool> {
        let mut map = self.blobs.write().map_err(|_| Self::poisoned())?;
        Ok(map.remove(hash).is_some())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
