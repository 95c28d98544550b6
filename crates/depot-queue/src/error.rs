//! Error types for upload queue operations.

use depot_kv::KvError;
use depot_store::BlobError;
use depot_types::{BlobHash, SubmissionId};
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `peek_oldest` was called on an empty queue.
    #[error("there is no queued upload request")]
    EmptyQueue,

    /// A request for byte-identical content is already queued.
    #[error("content {blob_hash} is already queued (submission {queued_submission})")]
    DuplicateContent {
        blob_hash: BlobHash,
        queued_submission: SubmissionId,
    },

    /// The transactional root failed.
    #[error("store error: {0}")]
    Kv(#[from] KvError),

    /// The blob store failed.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
}

/// Convenience type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
