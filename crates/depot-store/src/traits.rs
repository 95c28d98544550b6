use std::io::Read;

use depot_types::BlobHash;

use crate::error::{BlobError, BlobResult};

/// Boxed reader over a stored blob.
pub type BlobReader = Box<dyn Read + Send>;

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - The same bytes always produce the same hash, and writing them twice is a
///   no-op.
/// - A blob is readable as soon as `put` returns its hash.
/// - `delete` of a missing blob is not an error.
/// - Concurrent reads are always safe (blobs are immutable).
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their content hash.
    fn put(&self, data: &[u8]) -> BlobResult<BlobHash>;

    /// Open a stored blob for streaming reads.
    ///
    /// Returns `Err(BlobError::NotFound)` if the blob does not exist.
    fn open(&self, hash: &BlobHash) -> BlobResult<BlobReader>;

    /// Check whether a blob exists.
    fn exists(&self, hash: &BlobHash) -> BlobResult<bool>;

    /// Delete a blob. Returns `true` if it existed.
    fn delete(&self, hash: &BlobHash) -> BlobResult<bool>;

    /// Read a whole blob into memory.
    fn read(&self, hash: &BlobHash) -> BlobResult<Vec<u8>> {
        let mut reader = self.open(hash)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read a whole blob and check it still matches its content address.
    fn read_verified(&self, hash: &BlobHash) -> BlobResult<Vec<u8>> {
        let data = self.read(hash)?;
        let computed = BlobHash::compute(&data);
        if computed != *hash {
            return Err(BlobError::HashMismatch {
                expected: *hash,
                computed,
            });
        }
        Ok(data)
    }
}
