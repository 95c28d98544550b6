use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Domain tag prepended to every blob hash computation.
const BLOB_DOMAIN: &str = "depot-blob-v1";

/// Content address of an uploaded file.
///
/// A `BlobHash` is the domain-separated BLAKE3 hash of the file bytes.
/// Identical content always produces the same hash, so the hash doubles as
/// the primary key of the upload queue.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobHash([u8; 32]);

impl BlobHash {
    /// Hash raw file content.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(BLOB_DOMAIN.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Start an incremental hash; see [`BlobHasher`].
    pub fn hasher() -> BlobHasher {
        BlobHasher::new()
    }

    /// Create a `BlobHash` from a pre-computed hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Two-character shard directory used by on-disk layouts.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Remainder of the hex string after [`Self::shard_prefix`].
    pub fn shard_suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHash({})", self.short_hex())
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for BlobHash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Incremental blob hasher for streamed content.
///
/// Produces exactly the same hash as [`BlobHash::compute`] over the
/// concatenation of every chunk passed to [`BlobHasher::update`].
pub struct BlobHasher {
    inner: blake3::Hasher,
}

impl BlobHasher {
    fn new() -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(BLOB_DOMAIN.as_bytes());
        inner.update(b":");
        Self { inner }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(&self) -> BlobHash {
        BlobHash(*self.inner.finalize().as_bytes())
    }
}
