use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("'{0}' is unknown type of message")]
    UnknownMessageType(String),

    #[error("message has no type tag")]
    MissingTypeTag,

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    FramingError(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
