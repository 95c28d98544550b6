use depot_types::{Metadata, StatusUpdate, SubmissionId, Username};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Messages the dispatcher reacts to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    /// Store or replace a user's login.
    SaveLogin {
        username: Username,
        password_hash: String,
    },
    /// Drop a user's login and everything tracked for them.
    RemoveLogin { username: Username },
    /// Permission to deliver one queued upload, if any.
    #[serde(alias = "CacheTick")]
    QueueTick,
    /// A status change for a tracked submission.
    StatusUpdate(StatusUpdate),
}

impl Inbound {
    /// Every accepted value of the `type` tag.
    pub const TYPE_NAMES: &'static [&'static str] =
        &["SaveLogin", "RemoveLogin", "QueueTick", "CacheTick", "StatusUpdate"];

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SaveLogin { .. } => "SaveLogin",
            Self::RemoveLogin { .. } => "RemoveLogin",
            Self::QueueTick => "QueueTick",
            Self::StatusUpdate(_) => "StatusUpdate",
        }
    }
}

/// Messages the dispatcher sends back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Deliver this upload.
    Upload {
        username: Username,
        submission_id: SubmissionId,
        /// File content, standard base64.
        b64_data: String,
        metadata: Metadata,
    },
    /// The user database is empty; resend every login.
    AfterDbCleanup,
}

impl Outbound {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "Upload",
            Self::AfterDbCleanup => "AfterDbCleanup",
        }
    }
}
