use std::path::{Path, PathBuf};
use std::time::Duration;

use depot_kv::StoreConfig;
use depot_queue::QueueConfig;
use depot_status::StatusConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};

/// Config file looked up under `$HOME` and `/etc`.
pub const CONFIG_RELATIVE_PATH: &str = "depot/depot.toml";

/// Which blob store a [`BlobConfig`] builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlobBackend {
    #[default]
    Fs,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub backend: BlobBackend,
    pub path: PathBuf,
    /// Largest accepted upload, in bytes.
    pub max_size: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Fs,
            path: PathBuf::from("depot-data/blobs"),
            max_size: 100 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub tick_interval_ms: u64,
    pub gc_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            gc_interval_secs: 3600,
        }
    }
}

impl WorkerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

/// Complete configuration, one table per component.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    pub store: StoreConfig,
    pub blobs: BlobConfig,
    pub queue: QueueConfig,
    pub status: StatusConfig,
    pub worker: WorkerConfig,
}

impl DepotConfig {
    /// Everything in memory; nothing touches the disk.
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig::memory(),
            blobs: BlobConfig {
                backend: BlobBackend::Memory,
                ..BlobConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> DispatchResult<Self> {
        toml::from_str(text).map_err(|e| DispatchError::Config(e.to_string()))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> DispatchResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Load `explicit` if given, else the first of `$HOME/depot/depot.toml`
    /// and `/etc/depot/depot.toml` that exists, else the defaults. Returns the
    /// file used, if any.
    pub fn discover(explicit: Option<&Path>) -> DispatchResult<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "using config file");
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(CONFIG_RELATIVE_PATH));
        }
        paths.push(Path::new("/etc").join(CONFIG_RELATIVE_PATH));
        paths
    }

    pub fn to_toml(&self) -> DispatchResult<String> {
        toml::to_string_pretty(self).map_err(|e| DispatchError::Config(e.to_string()))
    }
}
