use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use depot_types::BlobHash;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::traits::{BlobReader, BlobStore};

/// Directory under the base path holding in-flight writes.
const TMP_DIR: &str = ".tmp";

/// Filesystem-backed content-addressed blob store.
///
/// Blobs are stored in a sharded directory layout:
/// `{base_path}/{first 2 hex chars}/{remaining 62 hex chars}`.
/// Writes go to a temporary file first and are renamed into place, so a blob
/// path is either absent or complete.
#[derive(Debug)]
pub struct FsBlobStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FsBlobStore {
    /// Open (or create) a store rooted at `base_path`.
    pub fn open(base_path: impl Into<PathBuf>, max_size: u64) -> BlobResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(base_path.join(TMP_DIR))?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Filesystem path for a given blob hash.
    pub fn blob_path(&self, hash: &BlobHash) -> PathBuf {
        self.base_path
            .join(hash.shard_prefix())
            .join(hash.shard_suffix())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> BlobResult<BlobHash> {
        if data.len() as u64 > self.max_size {
            return Err(BlobError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let hash = BlobHash::compute(data);
        let blob_path = self.blob_path(&hash);
        if blob_path.exists() {
            return Ok(hash);
        }

        // The temp file is removed on drop if anything below fails.
        let mut temp = NamedTempFile::new_in(self.base_path.join(TMP_DIR))?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&blob_path).map_err(|e| BlobError::Io(e.error))?;

        debug!(hash = %hash.short_hex(), len = data.len(), "blob stored");
        Ok(hash)
    }

    fn open(&self, hash: &BlobHash) -> BlobResult<BlobReader> {
        match File::open(self.blob_path(hash)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(*hash)),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, hash: &BlobHash) -> BlobResult<bool> {
        Ok(self.blob_path(hash).try_exists()?)
    }

    fn delete(&self, hash: &BlobHash) -> BlobResult<bool> {
        match fs::remove_file(self.blob_path(hash)) {
            Ok(()) => {
                debug!(hash = %hash.short_hex(), "blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
