use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, info, warn};

use crate::batch::{Batch, Tables};
use crate::error::{KvError, Result};
use crate::wal::{LockMode, WalConfig, WriteAheadLog};

/// A live connection to durable storage.
///
/// Several connections, from one process or many, may share the same
/// storage. Every access runs between [`begin`](Backend::begin) and
/// [`end`](Backend::end): `begin` takes the storage lock and brings the
/// caller's tables up to date with batches committed through other
/// connections. A backend only ever sees whole committed batches and must
/// persist each atomically.
pub trait Backend: Send + Sync {
    /// Read the full committed state.
    fn load(&mut self) -> Result<Tables>;

    /// Take the storage lock in `mode` and apply to `tables` every batch
    /// committed elsewhere since this connection last looked. A stale
    /// connection fails with [`KvError::Disconnected`]. On error no lock is
    /// held.
    fn begin(&mut self, tables: &mut Tables, mode: LockMode) -> Result<()>;

    /// Durably record one committed batch. Requires an exclusive `begin`.
    fn append(&mut self, batch: &Batch) -> Result<()>;

    /// Release the lock taken by `begin`. Ending twice is not an error.
    fn end(&mut self) -> Result<()>;

    /// Replace the stored history with a single snapshot of `tables`.
    /// Requires an exclusive `begin`.
    fn compact(&mut self, tables: &Tables) -> Result<()>;
}

/// Opens (and reopens) backend connections.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Backend>>;

    /// Human-readable target, used in logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// WAL-backed storage
// ---------------------------------------------------------------------------

/// Backend persisting every batch as a record in a [`WriteAheadLog`].
///
/// Any number of processes may open the same file: the file lock serializes
/// writers, and each connection replays the records appended past the point
/// it has already applied. A connection whose file was compacted away by
/// someone else reports [`KvError::Disconnected`].
pub struct WalBackend {
    wal: WriteAheadLog,
    /// Length of the log prefix already applied to the caller's tables.
    applied: u64,
}

impl WalBackend {
    pub fn open(path: &Path, config: WalConfig) -> Result<Self> {
        Ok(Self {
            wal: WriteAheadLog::open(path, config)?,
            applied: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.wal.path()
    }

    fn catch_up(&mut self, tables: &mut Tables, mode: LockMode) -> Result<()> {
        if self.wal.is_replaced()? {
            return Err(KvError::Disconnected(format!(
                "{} was replaced",
                self.wal.path().display()
            )));
        }
        let len = self.wal.file_len()?;
        if len < self.applied {
            return Err(KvError::Disconnected(format!(
                "{} shrank to {len} bytes, {} already applied",
                self.wal.path().display(),
                self.applied
            )));
        }
        if len == self.applied {
            return Ok(());
        }

        let recovery = self.wal.recover_from(self.applied)?;
        for batch in &recovery.batches {
            batch.apply(tables);
        }
        // A writer holds the exclusive lock for the whole append, so a torn
        // record seen under the lock is left over from a crash.
        if recovery.has_torn_tail() && mode == LockMode::Exclusive {
            warn!(
                path = %self.wal.path().display(),
                valid_len = recovery.valid_len,
                file_len = recovery.file_len,
                "dropping torn WAL tail"
            );
            self.wal.truncate_to(recovery.valid_len)?;
        }
        if !recovery.batches.is_empty() {
            debug!(
                from = self.applied,
                to = recovery.valid_len,
                records = recovery.batches.len(),
                "caught up with WAL"
            );
        }
        self.applied = recovery.valid_len;
        Ok(())
    }
}

impl Backend for WalBackend {
    fn load(&mut self) -> Result<Tables> {
        let mut tables = Tables::new();
        self.applied = 0;
        self.begin(&mut tables, LockMode::Exclusive)?;
        self.end()?;
        info!(
            path = %self.wal.path().display(),
            len = self.applied,
            containers = tables.len(),
            "store loaded"
        );
        Ok(tables)
    }

    fn begin(&mut self, tables: &mut Tables, mode: LockMode) -> Result<()> {
        self.wal.lock(mode)?;
        let caught_up = self.catch_up(tables, mode);
        if caught_up.is_err() {
            if let Err(err) = self.wal.unlock() {
                warn!(error = %err, "could not release WAL lock");
            }
        }
        caught_up
    }

    fn append(&mut self, batch: &Batch) -> Result<()> {
        self.wal.append(batch)?;
        self.applied = self.wal.offset();
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.wal.unlock()
    }

    fn compact(&mut self, tables: &Tables) -> Result<()> {
        let before = self.applied;
        self.applied = self.wal.rewrite(&[Batch::snapshot(tables)])?;
        info!(before, after = self.applied, "store compacted");
        Ok(())
    }
}

/// Connects to a WAL file on local disk.
#[derive(Clone, Debug)]
pub struct WalConnector {
    path: PathBuf,
    config: WalConfig,
}

impl WalConnector {
    pub fn new(path: impl Into<PathBuf>, config: WalConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}

impl Connector for WalConnector {
    fn connect(&self) -> Result<Box<dyn Backend>> {
        Ok(Box::new(WalBackend::open(&self.path, self.config.clone())?))
    }

    fn describe(&self) -> String {
        format!("wal:{}", self.path.display())
    }
}

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemState {
    batches: Vec<Batch>,
    writer_held: bool,
}

#[derive(Default)]
struct SharedLog {
    state: Mutex<MemState>,
    released: Condvar,
    /// Bumped to invalidate every open connection.
    generation: AtomicU64,
    refuse: AtomicBool,
}

impl SharedLog {
    fn release_writer(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.writer_held = false;
        }
        self.released.notify_all();
    }
}

/// Backend holding its history in memory, shared by every connection made
/// through the same [`MemoryConnector`].
pub struct MemoryBackend {
    shared: Arc<SharedLog>,
    generation: u64,
    /// Number of batches already applied to the caller's tables.
    applied: usize,
    holding: bool,
}

impl MemoryBackend {
    fn check_live(&self) -> Result<()> {
        if self.shared.generation.load(Ordering::SeqCst) != self.generation {
            return Err(KvError::Disconnected("memory connection was dropped".into()));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn load(&mut self) -> Result<Tables> {
        self.check_live()?;
        let shared = Arc::clone(&self.shared);
        let state = shared.state.lock().map_err(|_| KvError::LockPoisoned)?;
        self.applied = state.batches.len();
        let tables = Batch::replay(state.batches.iter());
        Ok(tables)
    }

    fn begin(&mut self, tables: &mut Tables, mode: LockMode) -> Result<()> {
        self.check_live()?;
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock().map_err(|_| KvError::LockPoisoned)?;
        if mode == LockMode::Exclusive {
            while state.writer_held {
                state = shared.released.wait(state).map_err(|_| KvError::LockPoisoned)?;
            }
            self.check_live()?;
            state.writer_held = true;
            self.holding = true;
        }
        for batch in state.batches.get(self.applied..).unwrap_or(&[]) {
            batch.apply(tables);
        }
        self.applied = state.batches.len();
        Ok(())
    }

    fn append(&mut self, batch: &Batch) -> Result<()> {
        self.check_live()?;
        let mut state = self.shared.state.lock().map_err(|_| KvError::LockPoisoned)?;
        state.batches.push(batch.clone());
        self.applied = state.batches.len();
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if self.holding {
            self.holding = false;
            self.shared.release_writer();
        }
        Ok(())
    }

    fn compact(&mut self, tables: &Tables) -> Result<()> {
        self.check_live()?;
        let mut state = self.shared.state.lock().map_err(|_| KvError::LockPoisoned)?;
        state.batches = vec![Batch::snapshot(tables)];
        self.applied = 1;
        // Other connections counted batches of the old history.
        self.generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(())
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        if self.holding {
            self.shared.release_writer();
        }
    }
}

/// Connector for in-process storage. Clones share the same history, so a
/// second root opened from a clone sees everything the first committed.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<SharedLog>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate every open connection; their next operation fails with
    /// [`KvError::Disconnected`].
    pub fn drop_connections(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "memory connections dropped");
    }

    /// While set, new connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of batches in the shared history.
    pub fn committed(&self) -> usize {
        self.shared.state.lock().map(|s| s.batches.len()).unwrap_or(0)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Result<Box<dyn Backend>> {
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(KvError::Disconnected("memory store refused connection".into()));
        }
        Ok(Box::new(MemoryBackend {
            shared: Arc::clone(&self.shared),
            generation: self.shared.generation.load(Ordering::SeqCst),
            applied: 0,
            holding: false,
        }))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::WriteOp;

    fn put(key: &str, value: &[u8]) -> Batch {
        Batch {
            ops: vec![WriteOp::Put {
                container: "cache".into(),
                key: key.into(),
                value: value.to_vec(),
            }],
        }
    }

    fn commit(backend: &mut dyn Backend, tables: &mut Tables, batch: Batch) {
        backend.begin(tables, LockMode::Exclusive).unwrap();
        backend.append(&batch).unwrap();
        backend.end().unwrap();
        batch.apply(tables);
    }

    #[test]
    fn wal_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let connector = WalConnector::new(dir.path().join("root.wal"), WalConfig::default());

        let mut backend = connector.connect().unwrap();
        let mut tables = backend.load().unwrap();
        commit(backend.as_mut(), &mut tables, put("a", b"1"));
        commit(backend.as_mut(), &mut tables, put("b", b"2"));
        drop(backend);

        let mut backend = connector.connect().unwrap();
        let tables = backend.load().unwrap();
        assert_eq!(tables["cache"].len(), 2);
    }

    #[test]
    fn wal_backend_compaction_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let connector = WalConnector::new(dir.path().join("root.wal"), WalConfig::default());
        let mut backend = connector.connect().unwrap();
        let mut tables = backend.load().unwrap();
        for i in 0..20 {
            commit(backend.as_mut(), &mut tables, put("k", &[i]));
        }
        backend.begin(&mut tables, LockMode::Exclusive).unwrap();
        backend.compact(&tables).unwrap();
        backend.end().unwrap();
        commit(backend.as_mut(), &mut tables, put("z", b"9"));

        let mut reopened = connector.connect().unwrap();
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded["cache"]["k"], vec![19]);
        assert_eq!(loaded["cache"]["z"], b"9");
    }

    #[test]
    fn wal_connections_catch_up_with_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let connector = WalConnector::new(dir.path().join("root.wal"), WalConfig::default());
        let mut writer = connector.connect().unwrap();
        let mut reader = connector.connect().unwrap();
        let mut written = writer.load().unwrap();
        let mut seen = reader.load().unwrap();

        commit(writer.as_mut(), &mut written, put("a", b"1"));
        commit(writer.as_mut(), &mut written, put("b", b"2"));

        reader.begin(&mut seen, LockMode::Shared).unwrap();
        reader.end().unwrap();
        assert_eq!(seen, written);

        commit(reader.as_mut(), &mut seen, put("c", b"3"));
        writer.begin(&mut written, LockMode::Shared).unwrap();
        writer.end().unwrap();
        assert_eq!(written["cache"]["c"], b"3");
    }

    #[test]
    fn wal_compaction_disconnects_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let connector = WalConnector::new(dir.path().join("root.wal"), WalConfig::default());
        let mut first = connector.connect().unwrap();
        let mut second = connector.connect().unwrap();
        let mut tables = first.load().unwrap();
        let mut other = second.load().unwrap();
        commit(first.as_mut(), &mut tables, put("a", b"1"));

        first.begin(&mut tables, LockMode::Exclusive).unwrap();
        first.compact(&tables).unwrap();
        first.end().unwrap();

        assert!(matches!(
            second.begin(&mut other, LockMode::Shared),
            Err(KvError::Disconnected(_))
        ));
        // A fresh connection reads the compacted file.
        let mut fresh = connector.connect().unwrap();
        assert_eq!(fresh.load().unwrap()["cache"]["a"], b"1");
    }

    #[test]
    fn memory_connections_share_history() {
        let connector = MemoryConnector::new();
        let mut first = connector.connect().unwrap();
        let mut tables = first.load().unwrap();
        commit(first.as_mut(), &mut tables, put("a", b"1"));

        let mut second = connector.clone().connect().unwrap();
        let mut seen = second.load().unwrap();
        assert_eq!(seen["cache"]["a"], b"1");
        assert_eq!(connector.committed(), 1);

        commit(first.as_mut(), &mut tables, put("b", b"2"));
        second.begin(&mut seen, LockMode::Shared).unwrap();
        second.end().unwrap();
        assert_eq!(seen, tables);
    }

    #[test]
    fn memory_writers_take_turns() {
        let connector = MemoryConnector::new();
        let mut first = connector.connect().unwrap();
        let mut tables = first.load().unwrap();
        first.begin(&mut tables, LockMode::Exclusive).unwrap();

        let waiting = {
            let connector = connector.clone();
            std::thread::spawn(move || {
                let mut second = connector.connect().unwrap();
                let mut seen = second.load().unwrap();
                second.begin(&mut seen, LockMode::Exclusive).unwrap();
                second.end().unwrap();
                seen
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        first.append(&put("a", b"1")).unwrap();
        first.end().unwrap();

        let seen = waiting.join().unwrap();
        assert_eq!(seen["cache"]["a"], b"1");
    }

    #[test]
    fn dropping_a_writer_releases_its_lock() {
        let connector = MemoryConnector::new();
        let mut first = connector.connect().unwrap();
        let mut tables = first.load().unwrap();
        first.begin(&mut tables, LockMode::Exclusive).unwrap();
        drop(first);

        let mut second = connector.connect().unwrap();
        let mut seen = second.load().unwrap();
        commit(second.as_mut(), &mut seen, put("a", b"1"));
        assert_eq!(connector.committed(), 1);
    }

    #[test]
    fn dropped_memory_connection_reports_disconnect() {
        let connector = MemoryConnector::new();
        let mut backend = connector.connect().unwrap();
        let mut tables = backend.load().unwrap();
        connector.drop_connections();
        assert!(matches!(
            backend.begin(&mut tables, LockMode::Exclusive),
            Err(KvError::Disconnected(_))
        ));

        let mut fresh = connector.connect().unwrap();
        let mut tables = fresh.load().unwrap();
        commit(fresh.as_mut(), &mut tables, put("a", b"1"));
        assert_eq!(connector.committed(), 1);
    }

    #[test]
    fn refused_connection_fails() {
        let connector = MemoryConnector::new();
        connector.refuse_connections(true);
        assert!(connector.connect().is_err());
        connector.refuse_connections(false);
        assert!(connector.connect().is_ok());
    }
}
