use std::io;

/// Errors produced by the transactional key-value root.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// I/O error during WAL or file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend handle is stale; the connection must be re-established.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// Reconnecting failed after the configured number of attempts.
    #[error("store unavailable after {attempts} reconnect attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// WAL entry has an invalid length field.
    #[error("invalid WAL entry length {length} at offset {offset}")]
    InvalidEntryLength { offset: u64, length: u32 },

    /// An internal lock was poisoned by a panicking thread.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the kv crate.
pub type Result<T> = std::result::Result<T, KvError>;

impl From<bincode::Error> for KvError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
