use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blob::BlobHash;
use crate::identity::{SubmissionId, Username};
use crate::temporal::Timestamp;

/// Caller-owned metadata stored verbatim next to an upload.
pub type Metadata = BTreeMap<String, String>;

/// One pending delivery: an uploaded file and the metadata sent with it.
///
/// Requests are immutable once queued. The file itself lives in the blob
/// store under [`UploadRequest::blob_hash`]; the queue only keeps this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub username: Username,
    pub submission_id: SubmissionId,
    pub metadata: Metadata,
    pub blob_hash: BlobHash,
    /// Used only to order the queue.
    pub created_at: Timestamp,
}

impl UploadRequest {
    pub fn new(
        username: Username,
        submission_id: SubmissionId,
        metadata: Metadata,
        blob_hash: BlobHash,
        created_at: Timestamp,
    ) -> Self {
        Self {
            username,
            submission_id,
            metadata,
            blob_hash,
            created_at,
        }
    }
}

/// Queue order: oldest `created_at` first, ties broken by blob hash so the
/// choice is deterministic for a given store state.
pub fn oldest_first(a: &UploadRequest, b: &UploadRequest) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.blob_hash.cmp(&b.blob_hash))
}
