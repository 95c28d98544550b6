//! Foundation types for depot.
//!
//! This crate provides the identity, temporal, and record types shared by the
//! blob store, the upload queue, the status ledger and the dispatcher. Every
//! other depot crate depends on `depot-types`.
//!
//! # Key Types
//!
//! - [`BlobHash`]: Content address of an uploaded file (domain-separated BLAKE3)
//! - [`SubmissionId`] / [`Username`]: Caller-supplied identities
//! - [`Timestamp`]: Wall-clock seconds with a total order
//! - [`UploadRequest`]: One pending delivery waiting in the upload queue
//! - [`StatusMessage`] / [`StatusInfo`]: Tracked lifecycle of a submission
//! - [`StatusUpdate`]: Inbound status change for a submission

pub mod blob;
pub mod error;
pub mod identity;
pub mod status;
pub mod temporal;
pub mod upload;

pub use blob::BlobHash;
pub use error::TypeError;
pub use identity::{SubmissionId, Username};
pub use status::{by_registration, StatusInfo, StatusMessage, StatusUpdate};
pub use temporal::Timestamp;
pub use upload::{oldest_first, Metadata, UploadRequest};
