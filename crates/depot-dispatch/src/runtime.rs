use std::sync::Arc;

use depot_kv::KvRoot;
use depot_queue::UploadQueue;
use depot_status::StatusLedger;
use depot_store::{BlobStore, FsBlobStore, InMemoryBlobStore};
use tracing::info;

use crate::config::{BlobBackend, BlobConfig, DepotConfig};
use crate::credentials::KvCredentialStore;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchResult;

/// Every component, wired once at start-up and shared by `Arc`.
pub struct Depot {
    pub root: Arc<KvRoot>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<UploadQueue>,
    pub ledger: Arc<StatusLedger>,
    pub credentials: Arc<KvCredentialStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Depot {
    pub fn open(config: &DepotConfig) -> DispatchResult<Self> {
        let root = Arc::new(config.store.build()?);
        let blobs = open_blobs(&config.blobs)?;
        let queue = Arc::new(UploadQueue::open(Arc::clone(&root), Arc::clone(&blobs), &config.queue)?);
        let ledger = Arc::new(StatusLedger::open(Arc::clone(&root))?);
        let credentials = Arc::new(KvCredentialStore::open(Arc::clone(&root))?);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&ledger),
            credentials.clone(),
        ));

        info!(
            store = ?config.store.backend,
            blobs = ?config.blobs.backend,
            on_duplicate = ?config.queue.on_duplicate,
            lease_timeout_secs = config.queue.lease_timeout_secs,
            "depot opened"
        );
        Ok(Self {
            root,
            blobs,
            queue,
            ledger,
            credentials,
            dispatcher,
        })
    }

    /// A depot that lives only in memory.
    pub fn in_memory() -> DispatchResult<Self> {
        Self::open(&DepotConfig::in_memory())
    }
}

fn open_blobs(config: &BlobConfig) -> DispatchResult<Arc<dyn BlobStore>> {
    let blobs: Arc<dyn BlobStore> = match config.backend {
        BlobBackend::Memory => Arc::new(InMemoryBlobStore::new()),
        BlobBackend::Fs => Arc::new(FsBlobStore::open(&config.path, config.max_size)?),
    };
    Ok(blobs)
}

#[cfg(test)]
mod tests {
    use depot_kv::StoreConfig;
    use depot_types::{Metadata, SubmissionId, Username};

    use super::*;

    #[test]
    fn on_disk_depot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = DepotConfig {
            store: StoreConfig::wal(dir.path().join("store.wal")),
            blobs: BlobConfig {
                path: dir.path().join("blobs"),
                ..BlobConfig::default()
            },
            ..DepotConfig::default()
        };

        {
            let depot = Depot::open(&config).unwrap();
            depot
                .queue
                .enqueue(
                    Username::from("alice"),
                    SubmissionId::from("s1"),
                    Metadata::new(),
                    b"persisted upload",
                )
                .unwrap();
            depot
                .ledger
                .register(&Username::from("alice"), &SubmissionId::from("s1"))
                .unwrap();
        }

        let depot = Depot::open(&config).unwrap();
        let request = depot.queue.peek_oldest().unwrap();
        assert_eq!(depot.queue.read_blob(&request).unwrap(), b"persisted upload");
        assert_eq!(depot.ledger.query_all(&Username::from("alice")).unwrap().len(), 1);
    }
}
