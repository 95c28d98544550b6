use depot_kv::KvError;
use depot_types::{SubmissionId, Username};

/// Errors produced by status ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("submission '{submission_id}' is not registered for status tracking")]
    NotFound { submission_id: SubmissionId },

    #[error("user '{username}' is not registered for status tracking")]
    UnknownUser { username: Username },

    #[error("submission '{submission_id}' is not owned by '{username}'")]
    AccessDenied {
        submission_id: SubmissionId,
        username: Username,
    },

    #[error("submission '{submission_id}' is already registered")]
    AlreadyRegistered { submission_id: SubmissionId },

    #[error("store error: {0}")]
    Kv(#[from] KvError),
}

pub type Result<T> = std::result::Result<T, StatusError>;
