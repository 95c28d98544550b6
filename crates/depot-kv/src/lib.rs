//! Transactional key-value root for depot.
//!
//! A [`KvRoot`] holds named containers of bincode-encoded values. Every
//! transaction commits as one [`Batch`] appended to a [`Backend`]; the
//! on-disk backend is a CRC-framed write-ahead log that drops torn tails on
//! recovery, so a crash never exposes a half-applied transaction. Several
//! processes may open roots on the same log; a file lock serializes their
//! writers and each root replays what the others appended.

pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod root;
pub mod wal;

pub use backend::{Backend, Connector, MemoryBackend, MemoryConnector, WalBackend, WalConnector};
pub use batch::{Batch, Tables, WriteOp};
pub use config::{BackendKind, StoreConfig};
pub use error::{KvError, Result};
pub use root::{Container, KvRoot, ReadTxn, Txn, View, DEFAULT_RECONNECT_ATTEMPTS};
pub use wal::{LockMode, Recovery, SyncMode, WalConfig, WriteAheadLog};
