//! Status tracking for depot submissions.
//!
//! The [`StatusLedger`] keeps, for every registered submission id:
//! - a [`StatusInfo`](depot_types::StatusInfo) record with an append-only
//!   message log (`"status"`)
//! - its owner (`"status_id_to_owner"`)
//! - membership in the owner's id set (`"status_owner_to_ids"`)
//!
//! All three are written in the same transaction, so no reader ever sees a
//! record without its index entries or the other way round. Reads check
//! ownership, and [`StatusLedger::garbage_collect`] drops records older than
//! a maximum age.
//!
//! [`IndexValidator`] checks that the two indices are exact inverses.

pub mod error;
pub mod ledger;
pub mod validation;

pub use error::{Result, StatusError};
pub use ledger::{
    LedgerSnapshot, StatusConfig, StatusLedger, DEFAULT_GC_MAX_AGE, ID_TO_OWNER_CONTAINER,
    OWNER_TO_IDS_CONTAINER, STATUS_CONTAINER,
};
pub use validation::{IndexReport, IndexValidator, Violation, ViolationKind};
