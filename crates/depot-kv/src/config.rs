use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{Connector, MemoryConnector, WalConnector};
use crate::error::Result;
use crate::root::{KvRoot, DEFAULT_RECONNECT_ATTEMPTS};
use crate::wal::{SyncMode, WalConfig};

/// Which backend a [`StoreConfig`] builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Wal,
    Memory,
}

/// Store settings, as read from the `[store]` table of the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Log file for the `wal` backend.
    pub path: PathBuf,
    pub sync: SyncMode,
    pub reconnect_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Wal,
            path: PathBuf::from("depot-data/store.wal"),
            sync: SyncMode::EveryWrite,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    pub fn wal(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Wal,
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        match self.backend {
            BackendKind::Memory => Arc::new(MemoryConnector::new()),
            BackendKind::Wal => Arc::new(WalConnector::new(
                &self.path,
                WalConfig {
                    sync_mode: self.sync,
                },
            )),
        }
    }

    /// Connect and open the root.
    pub fn build(&self) -> Result<KvRoot> {
        KvRoot::open(self.connector(), self.reconnect_attempts)
    }
}
