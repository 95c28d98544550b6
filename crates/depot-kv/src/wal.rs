use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::error::{KvError, Result};

/// Flush/sync strategy for the WAL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every commit (safest, highest latency).
    #[default]
    EveryWrite,
    /// Flush to the OS page cache only (fastest, least durable).
    OsDefault,
}

/// Configuration for the Write-Ahead Log.
#[derive(Clone, Debug, Default)]
pub struct WalConfig {
    /// Sync/flush strategy.
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Internal mutable state for the WAL writer.
struct WalWriter {
    writer: BufWriter<File>,
    /// Current write offset in the log file.
    offset: u64,
}

/// Result of scanning a log file front-to-back.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Every intact record, in commit order.
    pub batches: Vec<Batch>,
    /// Byte length of the intact prefix of the file.
    pub valid_len: u64,
    /// Byte length of the whole file when scanned.
    pub file_len: u64,
}

impl Recovery {
    /// Returns `true` if the file ends in a torn or corrupt record.
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// How [`WriteAheadLog::lock`] shares the file with other handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Readers; excludes writers only.
    Shared,
    /// One writer; excludes everyone else.
    Exclusive,
}

/// Crash-recoverable Write-Ahead Log of committed transactions.
///
/// On-disk format, one record per committed [`Batch`]:
/// ```text
/// [4 bytes: record length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized Batch)]
/// ```
/// A record is the unit of atomicity: recovery stops at the first record that
/// is truncated or fails its CRC, so a commit torn by a crash is dropped in
/// full and never partially applied.
///
/// Several handles, in one process or many, may share a file. Writers hold
/// [`LockMode::Exclusive`] across read-modify-append; the lock is advisory
/// and lives on the open file, so it is released when the handle is dropped.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    config: WalConfig,
}

impl WriteAheadLog {
    /// Open (or create) a log file at the given path.
    pub fn open(path: &Path, config: WalConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let writer = Self::open_writer(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            config,
        })
    }

    fn open_writer(path: &Path) -> Result<WalWriter> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();
        Ok(WalWriter {
            writer: BufWriter::new(file),
            offset,
        })
    }

    /// Append one committed batch. Returns the byte offset of the record.
    ///
    /// The record lands at the current end of the file, even if another
    /// handle appended since this one last looked.
    pub fn append(&self, batch: &Batch) -> Result<u64> {
        let payload = bincode::serialize(batch)?;
        let mut w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        let length = u32::try_from(payload.len()).map_err(|_| KvError::InvalidEntryLength {
            offset: w.offset,
            length: u32::MAX,
        })?;
        let crc = crc32fast::hash(&payload);

        w.offset = w.writer.get_ref().metadata()?.len();
        let entry_offset = w.offset;

        w.writer.write_all(&length.to_le_bytes())?;
        w.writer.write_all(&crc.to_le_bytes())?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_data()?;
        }

        w.offset += HEADER_SIZE as u64 + payload.len() as u64;

        debug!(offset = entry_offset, ops = batch.len(), len = payload.len(), "WAL append");
        Ok(entry_offset)
    }

    /// Read every intact record from the log.
    pub fn recover(&self) -> Result<Recovery> {
        self.recover_from(0)
    }

    /// Read the intact records starting at byte `start`, which must be a
    /// record boundary. Reads go through this handle, so they see the file
    /// this handle has open even if the path was since replaced.
    pub fn recover_from(&self, start: u64) -> Result<Recovery> {
        let file = {
            let mut w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
            w.writer.flush()?;
            w.writer.get_ref().try_clone()?
        };
        let file_len = file.metadata()?.len();
        let mut file = BufReader::new(file);
        let mut batches = Vec::new();
        let mut offset = start;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header_buf = [0u8; HEADER_SIZE];
            file.read_exact(&mut header_buf)?;
            let length = u32::from_le_bytes([header_buf[0], header_buf[1], header_buf[2], header_buf[3]]);
            let expected_crc = u32::from_le_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "truncated WAL record; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            file.read_exact(&mut payload)?;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; stopping recovery"
                );
                break;
            }

            match bincode::deserialize::<Batch>(&payload) {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable WAL record; stopping recovery");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        debug!(start, recovered = batches.len(), valid_len = offset, file_len, "WAL scan complete");
        Ok(Recovery {
            batches,
            valid_len: offset,
            file_len,
        })
    }

    /// Cut the log back to `len` bytes, dropping a torn tail.
    pub fn truncate_to(&self, len: u64) -> Result<()> {
        let mut w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        w.writer.flush()?;
        w.writer.get_ref().set_len(len)?;
        w.writer.get_ref().sync_all()?;
        w.offset = len;
        debug!(len, "WAL truncated");
        Ok(())
    }

    /// Atomically replace the whole log with the given records. Returns the
    /// length of the new log.
    ///
    /// The new log is written next to the old one and renamed over it, so a
    /// crash leaves either the old or the new file in place. Other handles
    /// still on the old file see [`is_replaced`](Self::is_replaced) turn true.
    pub fn rewrite(&self, batches: &[Batch]) -> Result<u64> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        w.writer.flush()?;

        let mut temp = NamedTempFile::new_in(&dir)?;
        let mut written = 0u64;
        {
            let mut out = BufWriter::new(temp.as_file_mut());
            for batch in batches {
                let payload = bincode::serialize(batch)?;
                out.write_all(&(payload.len() as u32).to_le_bytes())?;
                out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
                out.write_all(&payload)?;
                written += HEADER_SIZE as u64 + payload.len() as u64;
            }
            out.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| KvError::Io(e.error))?;

        *w = Self::open_writer(&self.path)?;
        debug!(records = batches.len(), len = written, "WAL rewritten");
        Ok(written)
    }

    /// Block until this handle holds the file lock in `mode`.
    pub fn lock(&self, mode: LockMode) -> Result<()> {
        let w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        let file = w.writer.get_ref();
        match mode {
            LockMode::Shared => FileExt::lock_shared(file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(file)?,
        }
        Ok(())
    }

    /// Release the file lock. Releasing an unheld lock is not an error.
    pub fn unlock(&self) -> Result<()> {
        let mut w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        w.writer.flush()?;
        FileExt::unlock(w.writer.get_ref())?;
        Ok(())
    }

    /// `true` if the path no longer names the file this handle has open,
    /// e.g. after another handle compacted the log.
    pub fn is_replaced(&self) -> Result<bool> {
        let current = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        let open = w.writer.get_ref().metadata()?;
        Ok(!same_file(&open, &current))
    }

    /// Current length of the open file.
    pub fn file_len(&self) -> Result<u64> {
        let w = self.writer.lock().map_err(|_| KvError::LockPoisoned)?;
        Ok(w.writer.get_ref().metadata()?.len())
    }

    /// Current write offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or(0)
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}
