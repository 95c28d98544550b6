//! Reaction dispatcher for depot.
//!
//! Wires the upload queue, the status ledger and the credential store onto
//! one [`KvRoot`](depot_kv::KvRoot) and maps inbound protocol messages onto
//! them:
//!
//! - `SaveLogin` / `RemoveLogin` go to the [`CredentialStore`]; removing a
//!   user also drops their status tracking
//! - `QueueTick` delivers the oldest queued upload, base64-encoded
//! - `StatusUpdate` is recorded in the ledger
//!
//! [`DepotConfig`] holds the TOML configuration and [`Depot`] builds every
//! component from it.

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod runtime;

pub use config::{BlobBackend, BlobConfig, DepotConfig, WorkerConfig, CONFIG_RELATIVE_PATH};
pub use credentials::{CredentialStore, KvCredentialStore, USERS_CONTAINER};
pub use dispatcher::{Dispatcher, ServeStats};
pub use error::{DispatchError, DispatchResult};
pub use runtime::Depot;
