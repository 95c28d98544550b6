use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::SubmissionId;
use crate::temporal::Timestamp;

/// One status line reported for a submission.
///
/// Equality and ordering are by `(timestamp, text)`: re-delivering the same
/// message is a no-op in a set-based log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusMessage {
    // Field order drives the derived ordering.
    timestamp: Timestamp,
    text: String,
}

impl StatusMessage {
    /// Build a message; surrounding whitespace is trimmed from `text`.
    pub fn new(text: impl AsRef<str>, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            text: text.as_ref().trim().to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Tracked lifecycle of one submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub submission_id: SubmissionId,
    pub publication_url: Option<String>,
    pub display_name: Option<String>,
    registered_at: Timestamp,
    messages: BTreeSet<StatusMessage>,
}

impl StatusInfo {
    pub fn new(submission_id: SubmissionId, registered_at: Timestamp) -> Self {
        Self {
            submission_id,
            publication_url: None,
            display_name: None,
            registered_at,
            messages: BTreeSet::new(),
        }
    }

    pub fn registered_at(&self) -> Timestamp {
        self.registered_at
    }

    /// Append a message. Returns `false` if an identical one was already logged.
    pub fn add_message(&mut self, message: StatusMessage) -> bool {
        self.messages.insert(message)
    }

    /// Messages in ascending timestamp order.
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Apply the optional fields of an update; `None` keeps the stored value.
    pub fn apply_details(&mut self, update: &StatusUpdate) {
        if let Some(url) = &update.publication_url {
            self.publication_url = Some(url.clone());
        }
        if let Some(name) = &update.display_name {
            self.display_name = Some(name.clone());
        }
    }
}

/// Order records by registration time, then by id.
pub fn by_registration(a: &StatusInfo, b: &StatusInfo) -> Ordering {
    a.registered_at
        .cmp(&b.registered_at)
        .then_with(|| a.submission_id.cmp(&b.submission_id))
}

/// A status change reported for a submission by the delivery pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(alias = "rest_id")]
    pub submission_id: SubmissionId,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default, alias = "pub_url")]
    pub publication_url: Option<String>,
    #[serde(default, alias = "book_name")]
    pub display_name: Option<String>,
}

impl StatusUpdate {
    pub fn new(
        submission_id: impl Into<SubmissionId>,
        message: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            message: message.into(),
            timestamp,
            publication_url: None,
            display_name: None,
        }
    }

    pub fn with_publication_url(mut self, url: impl Into<String>) -> Self {
        self.publication_url = Some(url.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn to_message(&self) -> StatusMessage {
        StatusMessage::new(&self.message, self.timestamp)
    }
}
