use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{Backend, Connector, MemoryConnector};
use crate::batch::{Batch, Tables, WriteOp};
use crate::error::{KvError, Result};
use crate::wal::LockMode;

/// Default number of reconnect attempts before a transaction gives up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Typed handle to a named container in a [`KvRoot`].
///
/// The handle is just a name; values are encoded with bincode on write and
/// decoded on read.
pub struct Container<V> {
    name: Arc<str>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Container<V> {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<V> Clone for Container<V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<V> fmt::Debug for Container<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Container").field(&self.name).finish()
    }
}

fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    Ok(bincode::deserialize(bytes)?)
}

/// Read access shared by [`ReadTxn`] and [`Txn`].
///
/// A container that was never created reads as empty.
pub trait View {
    #[doc(hidden)]
    fn raw_get(&self, container: &str, key: &str) -> Option<&[u8]>;

    #[doc(hidden)]
    fn raw_entries(&self, container: &str) -> Vec<(&str, &[u8])>;

    fn get<V: DeserializeOwned>(&self, container: &Container<V>, key: &str) -> Result<Option<V>> {
        self.raw_get(container.name(), key).map(decode).transpose()
    }

    fn contains<V>(&self, container: &Container<V>, key: &str) -> bool {
        self.raw_get(container.name(), key).is_some()
    }

    /// All entries of a container in ascending key order.
    fn entries<V: DeserializeOwned>(&self, container: &Container<V>) -> Result<Vec<(String, V)>> {
        self.raw_entries(container.name())
            .into_iter()
            .map(|(key, bytes)| Ok((key.to_string(), decode(bytes)?)))
            .collect()
    }

    fn values<V: DeserializeOwned>(&self, container: &Container<V>) -> Result<Vec<V>> {
        self.raw_entries(container.name())
            .into_iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    fn keys<V>(&self, container: &Container<V>) -> Vec<String> {
        self.raw_entries(container.name())
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect()
    }

    fn len<V>(&self, container: &Container<V>) -> usize {
        self.raw_entries(container.name()).len()
    }
}

/// Read-only view of committed state.
pub struct ReadTxn<'a> {
    tables: &'a Tables,
}

impl View for ReadTxn<'_> {
    fn raw_get(&self, container: &str, key: &str) -> Option<&[u8]> {
        self.tables
            .get(container)
            .and_then(|table| table.get(key))
            .map(Vec::as_slice)
    }

    fn raw_entries(&self, container: &str) -> Vec<(&str, &[u8])> {
        self.tables
            .get(container)
            .map(|table| {
                table
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_slice()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A write transaction: reads see committed state plus this transaction's
/// own writes. Nothing is visible to other readers until the closure passed
/// to [`KvRoot::transact`] returns `Ok` and the batch is persisted.
pub struct Txn<'a> {
    tables: &'a Tables,
    /// container -> key -> new value (`None` = deleted)
    pending: BTreeMap<String, BTreeMap<String, Option<Vec<u8>>>>,
    ops: Vec<WriteOp>,
}

impl<'a> Txn<'a> {
    fn new(tables: &'a Tables) -> Self {
        Self {
            tables,
            pending: BTreeMap::new(),
            ops: Vec::new(),
        }
    }

    /// Insert or replace a value.
    pub fn put<V: Serialize>(&mut self, container: &Container<V>, key: &str, value: &V) -> Result<()> {
        let bytes = encode(value)?;
        self.pending
            .entry(container.name().to_string())
            .or_default()
            .insert(key.to_string(), Some(bytes.clone()));
        self.ops.push(WriteOp::Put {
            container: container.name().to_string(),
            key: key.to_string(),
            value: bytes,
        });
        Ok(())
    }

    /// Remove a value. Returns `true` if it was present.
    pub fn delete<V>(&mut self, container: &Container<V>, key: &str) -> bool {
        let existed = self.raw_get(container.name(), key).is_some();
        if existed {
            self.pending
                .entry(container.name().to_string())
                .or_default()
                .insert(key.to_string(), None);
            self.ops.push(WriteOp::Delete {
                container: container.name().to_string(),
                key: key.to_string(),
            });
        }
        existed
    }

    fn create_container(&mut self, name: &str) {
        self.pending.entry(name.to_string()).or_default();
        self.ops.push(WriteOp::CreateContainer {
            container: name.to_string(),
        });
    }

    fn into_batch(self) -> Batch {
        Batch { ops: self.ops }
    }
}

impl View for Txn<'_> {
    fn raw_get(&self, container: &str, key: &str) -> Option<&[u8]> {
        if let Some(slot) = self.pending.get(container).and_then(|p| p.get(key)) {
            return slot.as_deref();
        }
        self.tables
            .get(container)
            .and_then(|table| table.get(key))
            .map(Vec::as_slice)
    }

    fn raw_entries(&self, container: &str) -> Vec<(&str, &[u8])> {
        let mut merged: BTreeMap<&str, &[u8]> = self
            .tables
            .get(container)
            .map(|table| {
                table
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_slice()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(pending) = self.pending.get(container) {
            for (key, slot) in pending {
                match slot {
                    Some(bytes) => {
                        merged.insert(key.as_str(), bytes.as_slice());
                    }
                    None => {
                        merged.remove(key.as_str());
                    }
                }
            }
        }
        merged.into_iter().collect()
    }
}

struct Connection {
    backend: Box<dyn Backend>,
    tables: Tables,
}

/// Transactional root of named containers.
///
/// The committed state is cached in memory and brought up to date with the
/// backend at the start of every read and transaction, so several roots,
/// in one process or in separate processes, can share one store. Writers
/// hold the backend's exclusive lock from the start of a transaction until
/// its batch is persisted, so transactions never conflict.
///
/// Closures passed to [`transact`](Self::transact) and [`read`](Self::read)
/// must not call back into the same root.
pub struct KvRoot {
    inner: Mutex<Connection>,
    connector: Arc<dyn Connector>,
    reconnect_attempts: u32,
}

impl KvRoot {
    /// Connect and load the committed state.
    pub fn open(connector: Arc<dyn Connector>, reconnect_attempts: u32) -> Result<Self> {
        let mut backend = connector.connect()?;
        let tables = backend.load()?;
        info!(
            target_store = %connector.describe(),
            containers = tables.len(),
            "kv root opened"
        );
        Ok(Self {
            inner: Mutex::new(Connection { backend, tables }),
            connector,
            reconnect_attempts,
        })
    }

    /// A root over fresh in-process storage.
    pub fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryConnector::new()), DEFAULT_RECONNECT_ATTEMPTS)
    }

    /// Get the container bound to `name`, creating an empty one if nothing is
    /// bound yet. Calling this again with the same name returns a handle to
    /// the same container.
    pub fn container<V>(&self, name: &str) -> Result<Container<V>> {
        let exists = self.read(|txn| Ok::<_, KvError>(txn.tables.contains_key(name)))?;
        if !exists {
            self.transact(|txn| {
                if !txn.tables.contains_key(name) {
                    txn.create_container(name);
                }
                Ok::<_, KvError>(())
            })?;
            debug!(container = name, "container created");
        }
        Ok(Container::new(name))
    }

    /// Names of every container bound in the root.
    pub fn containers(&self) -> Result<Vec<String>> {
        self.read(|txn| Ok(txn.tables.keys().cloned().collect()))
    }

    /// Run `f` against a consistent snapshot of committed state, including
    /// everything committed through other roots on the same store.
    pub fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&ReadTxn<'_>) -> std::result::Result<T, E>,
        E: From<KvError>,
    {
        let mut guard = self.lock()?;
        let conn = &mut *guard;
        let mut attempts = 0u32;
        self.begin(conn, LockMode::Shared, &mut attempts)?;
        self.end(conn);
        f(&ReadTxn {
            tables: &conn.tables,
        })
    }

    /// Run `f` as one atomic transaction.
    ///
    /// If `f` returns `Err`, nothing is written. A connection found stale
    /// when the transaction starts is re-established before `f` runs. If the
    /// connection is lost after `f` returns but before its batch is
    /// persisted, the root reconnects, reloads committed state and runs `f`
    /// again, so `f` must not have effects outside the transaction.
    pub fn transact<T, E, F>(&self, mut f: F) -> std::result::Result<T, E>
    where
        F: FnMut(&mut Txn<'_>) -> std::result::Result<T, E>,
        E: From<KvError>,
    {
        let mut guard = self.lock()?;
        let conn = &mut *guard;
        let mut attempts = 0u32;

        loop {
            self.begin(conn, LockMode::Exclusive, &mut attempts)?;
            let mut txn = Txn::new(&conn.tables);
            let value = match f(&mut txn) {
                Ok(value) => value,
                Err(e) => {
                    self.end(conn);
                    return Err(e);
                }
            };
            let batch = txn.into_batch();
            if batch.is_empty() {
                self.end(conn);
                return Ok(value);
            }

            match conn.backend.append(&batch) {
                Ok(()) => {
                    batch.apply(&mut conn.tables);
                    self.end(conn);
                    return Ok(value);
                }
                Err(KvError::Disconnected(reason)) => {
                    self.end(conn);
                    self.reconnect(conn, reason, &mut attempts)?;
                }
                Err(e) => {
                    self.end(conn);
                    return Err(e.into());
                }
            }
        }
    }

    /// Collapse the backend history into a snapshot of the current state.
    /// Other roots on the same store reconnect on their next access.
    pub fn compact(&self) -> Result<()> {
        let mut guard = self.lock()?;
        let conn = &mut *guard;
        let mut attempts = 0u32;
        loop {
            self.begin(conn, LockMode::Exclusive, &mut attempts)?;
            let compacted = conn.backend.compact(&conn.tables);
            self.end(conn);
            match compacted {
                Ok(()) => return Ok(()),
                Err(KvError::Disconnected(reason)) => {
                    self.reconnect(conn, reason, &mut attempts)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner.lock().map_err(|_| KvError::LockPoisoned)
    }

    /// Take the backend lock, reconnecting while the connection is stale.
    fn begin(&self, conn: &mut Connection, mode: LockMode, attempts: &mut u32) -> Result<()> {
        loop {
            match conn.backend.begin(&mut conn.tables, mode) {
                Ok(()) => return Ok(()),
                Err(KvError::Disconnected(reason)) => self.reconnect(conn, reason, attempts)?,
                Err(e) => return Err(e),
            }
        }
    }

    fn end(&self, conn: &mut Connection) {
        if let Err(e) = conn.backend.end() {
            warn!(error = %e, "could not release store lock");
        }
    }

    /// Re-establish the backend connection, consuming from the shared
    /// attempt budget of the current operation.
    fn reconnect(&self, conn: &mut Connection, reason: String, attempts: &mut u32) -> Result<()> {
        let mut last_error = reason;
        while *attempts < self.reconnect_attempts {
            *attempts += 1;
            warn!(
                attempt = *attempts,
                max = self.reconnect_attempts,
                error = %last_error,
                "store connection lost; reconnecting"
            );
            let connected = self.connector.connect().and_then(|mut backend| {
                let tables = backend.load()?;
                Ok((backend, tables))
            });
            match connected {
                Ok((backend, tables)) => {
                    conn.backend = backend;
                    conn.tables = tables;
                    info!(attempt = *attempts, "store reconnected");
                    return Ok(());
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(KvError::Unavailable {
            attempts: *attempts,
            last_error,
        })
    }
}

impl fmt::Debug for KvRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvRoot")
            .field("store", &self.connector.describe())
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}
