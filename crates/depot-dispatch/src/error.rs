use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("queue error: {0}")]
    Queue(#[from] depot_queue::QueueError),

    #[error("status error: {0}")]
    Status(#[from] depot_status::StatusError),

    #[error("store error: {0}")]
    Kv(#[from] depot_kv::KvError),

    #[error("blob store error: {0}")]
    Blob(#[from] depot_store::BlobError),

    #[error("protocol error: {0}")]
    Protocol(#[from] depot_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
