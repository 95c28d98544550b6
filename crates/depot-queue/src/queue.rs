use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depot_kv::{Container, KvError, KvRoot, View};
use depot_store::{BlobReader, BlobStore};
use depot_types::{
    oldest_first, BlobHash, Metadata, SubmissionId, Timestamp, UploadRequest, Username,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};

/// Root container holding queued requests, keyed by blob hash.
pub const CACHE_CONTAINER: &str = "cache";

/// Root container holding the leases of requests being delivered, keyed like
/// [`CACHE_CONTAINER`].
pub const LEASE_CONTAINER: &str = "cache_leases";

/// What `enqueue` does when byte-identical content is already queued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnDuplicate {
    /// Fail with [`QueueError::DuplicateContent`].
    #[default]
    Reject,
    /// Replace the queued request with the new one.
    Overwrite,
}

/// Queue settings, as read from the `[queue]` table of the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub on_duplicate: OnDuplicate,
    /// How long a consumer may hold a request in
    /// [`pop_with_cleanup`](UploadQueue::pop_with_cleanup) before it is
    /// handed out again.
    pub lease_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            on_duplicate: OnDuplicate::Reject,
            lease_timeout_secs: 300,
        }
    }
}

impl QueueConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }
}

/// A request handed to the block of [`UploadQueue::pop_with_cleanup`],
/// together with read access to its file.
pub struct Acquired<'a> {
    request: &'a UploadRequest,
    blobs: &'a dyn BlobStore,
}

impl Acquired<'_> {
    pub fn request(&self) -> &UploadRequest {
        self.request
    }

    /// Stream the uploaded file.
    pub fn open(&self) -> Result<BlobReader> {
        Ok(self.blobs.open(&self.request.blob_hash)?)
    }

    /// Read the whole uploaded file, checking it against its hash.
    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(self.blobs.read_verified(&self.request.blob_hash)?)
    }
}

/// Claim on a queued request while a consumer delivers it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Lease {
    token: String,
    acquired_at: Timestamp,
    expires_at: Timestamp,
}

impl Lease {
    fn new(now: Timestamp, timeout: Duration) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self {
            token: format!("{}-{}", std::process::id(), NEXT.fetch_add(1, Ordering::Relaxed)),
            acquired_at: now,
            expires_at: now.plus(timeout),
        }
    }

    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

/// FIFO queue of pending uploads.
///
/// Any number of queues, in one process or several, may share a root's
/// store; each request is handed to one consumer at a time.
pub struct UploadQueue {
    root: Arc<KvRoot>,
    blobs: Arc<dyn BlobStore>,
    cache: Container<UploadRequest>,
    leases: Container<Lease>,
    on_duplicate: OnDuplicate,
    lease_timeout: Duration,
}

impl UploadQueue {
    /// Bind the queue to its containers, creating them if needed.
    pub fn open(root: Arc<KvRoot>, blobs: Arc<dyn BlobStore>, config: &QueueConfig) -> Result<Self> {
        let cache = root.container(CACHE_CONTAINER)?;
        let leases = root.container(LEASE_CONTAINER)?;
        Ok(Self {
            root,
            blobs,
            cache,
            leases,
            on_duplicate: config.on_duplicate,
            lease_timeout: config.lease_timeout(),
        })
    }

    /// Store the file and queue a request for it.
    pub fn enqueue(
        &self,
        username: Username,
        submission_id: SubmissionId,
        metadata: Metadata,
        file: &[u8],
    ) -> Result<UploadRequest> {
        let blob_hash = BlobHash::compute(file);
        let key = blob_hash.to_hex();
        let mut stored_before = None;

        let outcome = self.root.transact(|txn| {
            if let Some(queued) = txn.get(&self.cache, &key)? {
                if self.on_duplicate == OnDuplicate::Reject {
                    return Err(QueueError::DuplicateContent {
                        blob_hash,
                        queued_submission: queued.submission_id,
                    });
                }
                // A consumer still delivering the replaced request loses it.
                txn.delete(&self.leases, &key);
            }

            // Written under the root's write lock, which release_blob also
            // holds while it checks for references.
            if stored_before.is_none() {
                stored_before = Some(self.blobs.exists(&blob_hash)?);
            }
            self.blobs.put(file)?;

            let mut created_at = Timestamp::now();
            if let Some(newest) = txn
                .values(&self.cache)?
                .into_iter()
                .map(|request| request.created_at)
                .max()
            {
                if newest >= created_at {
                    created_at = newest.next_tick();
                }
            }

            let request = UploadRequest::new(
                username.clone(),
                submission_id.clone(),
                metadata.clone(),
                blob_hash,
                created_at,
            );
            txn.put(&self.cache, &key, &request)?;
            Ok(request)
        });

        match outcome {
            Ok(request) => {
                info!(
                    user = %request.username,
                    submission = %request.submission_id,
                    blob = %blob_hash.short_hex(),
                    size = file.len(),
                    "upload queued"
                );
                Ok(request)
            }
            Err(err @ QueueError::DuplicateContent { .. }) => {
                warn!(blob = %blob_hash.short_hex(), "duplicate upload rejected");
                Err(err)
            }
            Err(err) => {
                if stored_before == Some(false) {
                    if let Err(cleanup) = self.release_blob(&blob_hash) {
                        warn!(blob = %blob_hash.short_hex(), error = %cleanup, "orphaned blob left behind");
                    }
                }
                Err(err)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of queued requests, including those being delivered.
    pub fn len(&self) -> Result<usize> {
        Ok(self.root.read(|txn| Ok::<_, KvError>(txn.len(&self.cache)))?)
    }

    /// The oldest request, left in place. A request being delivered still
    /// counts.
    pub fn peek_oldest(&self) -> Result<UploadRequest> {
        self.root
            .read(|txn| txn.values(&self.cache))?
            .into_iter()
            .min_by(oldest_first)
            .ok_or(QueueError::EmptyQueue)
    }

    /// Remove and return the oldest request no consumer is delivering;
    /// `None` if there is none.
    ///
    /// The blob is left in the blob store; call [`release_blob`](Self::release_blob)
    /// once the file has been handed off.
    pub fn pop_oldest(&self) -> Result<Option<UploadRequest>> {
        let now = Timestamp::now();
        let popped = self.root.transact(|txn| {
            let Some((key, request)) = self.oldest_available(&*txn, now)? else {
                return Ok::<_, QueueError>(None);
            };
            txn.delete(&self.cache, &key);
            txn.delete(&self.leases, &key);
            Ok(Some(request))
        })?;

        if let Some(request) = &popped {
            debug!(submission = %request.submission_id, blob = %request.blob_hash.short_hex(), "upload popped");
        }
        Ok(popped)
    }

    /// Hand the oldest available request to `block`, then remove it and
    /// delete its blob only if `block` returns `Ok`.
    ///
    /// The request is leased for the duration of `block`, so no other
    /// consumer receives it meanwhile, and `block` runs exactly once per
    /// call. If `block` fails, the lease is dropped and the request stays
    /// queued for a later retry. If the process dies while `block` runs, the
    /// request is handed out again once the lease times out. Returns
    /// `Ok(None)` if nothing is available.
    pub fn pop_with_cleanup<T, E, F>(&self, block: F) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(&Acquired<'_>) -> std::result::Result<T, E>,
        E: From<QueueError>,
    {
        let Some((request, lease)) = self.begin_pop()? else {
            return Ok(None);
        };

        let acquired = Acquired {
            request: &request,
            blobs: self.blobs.as_ref(),
        };
        let value = match block(&acquired) {
            Ok(value) => value,
            Err(err) => {
                if let Err(release) = self.abort_pop(&request, &lease) {
                    warn!(
                        submission = %request.submission_id,
                        error = %release,
                        "lease not released; upload waits for it to expire"
                    );
                }
                debug!(submission = %request.submission_id, "consumer failed; upload stays queued");
                return Err(err);
            }
        };

        if self.commit_pop(&request, &lease)? {
            if let Err(err) = self.release_blob(&request.blob_hash) {
                warn!(blob = %request.blob_hash.short_hex(), error = %err, "could not delete delivered blob");
            }
            info!(
                user = %request.username,
                submission = %request.submission_id,
                "upload delivered"
            );
        } else {
            warn!(
                submission = %request.submission_id,
                "lease lost during delivery; upload stays queued"
            );
        }
        Ok(Some(value))
    }

    /// Lease the oldest available request.
    fn begin_pop(&self) -> Result<Option<(UploadRequest, Lease)>> {
        let now = Timestamp::now();
        let lease = Lease::new(now, self.lease_timeout);
        let leased = self.root.transact(|txn| {
            let Some((key, request)) = self.oldest_available(&*txn, now)? else {
                return Ok::<_, QueueError>(None);
            };
            txn.put(&self.leases, &key, &lease)?;
            Ok(Some(request))
        })?;
        Ok(leased.map(|request| {
            debug!(submission = %request.submission_id, token = %lease.token, "upload leased");
            (request, lease)
        }))
    }

    /// Remove a delivered request if `lease` still holds it. Returns `false`
    /// if the lease expired and was taken over, or the request was replaced.
    fn commit_pop(&self, request: &UploadRequest, lease: &Lease) -> Result<bool> {
        let key = request.blob_hash.to_hex();
        self.root.transact(|txn| {
            if !self.holds(&*txn, &key, lease)? {
                return Ok(false);
            }
            txn.delete(&self.leases, &key);
            txn.delete(&self.cache, &key);
            Ok(true)
        })
    }

    /// Give a request back to the queue.
    fn abort_pop(&self, request: &UploadRequest, lease: &Lease) -> Result<()> {
        let key = request.blob_hash.to_hex();
        self.root.transact(|txn| {
            if self.holds(&*txn, &key, lease)? {
                txn.delete(&self.leases, &key);
            }
            Ok(())
        })
    }

    fn holds(&self, view: &impl View, key: &str, lease: &Lease) -> Result<bool> {
        Ok(view
            .get(&self.leases, key)?
            .is_some_and(|held| held.token == lease.token))
    }

    /// The oldest request without a live lease, and its key.
    fn oldest_available(
        &self,
        view: &impl View,
        now: Timestamp,
    ) -> Result<Option<(String, UploadRequest)>> {
        let leased: BTreeSet<String> = view
            .entries(&self.leases)?
            .into_iter()
            .filter(|(_, lease)| lease.is_live(now))
            .map(|(key, _)| key)
            .collect();
        Ok(view
            .entries(&self.cache)?
            .into_iter()
            .filter(|(key, _)| !leased.contains(key))
            .min_by(|(_, a), (_, b)| oldest_first(a, b)))
    }

    /// Read the file of a request.
    pub fn read_blob(&self, request: &UploadRequest) -> Result<Vec<u8>> {
        Ok(self.blobs.read_verified(&request.blob_hash)?)
    }

    /// Stream the file of a request.
    pub fn open_blob(&self, request: &UploadRequest) -> Result<BlobReader> {
        Ok(self.blobs.open(&request.blob_hash)?)
    }

    /// Delete the file of a popped request, unless a queued request refers
    /// to the same content again. Returns `true` if the file is gone.
    /// Deleting twice is not an error.
    pub fn release_blob(&self, blob_hash: &BlobHash) -> Result<bool> {
        let key = blob_hash.to_hex();
        // Writes nothing, so the check and the delete run once under the
        // root's write lock.
        let released = self.root.transact(|txn| {
            if txn.contains(&self.cache, &key) {
                return Ok::<_, QueueError>(false);
            }
            self.blobs.delete(blob_hash)?;
            Ok(true)
        })?;
        if !released {
            debug!(blob = %blob_hash.short_hex(), "blob queued again; kept");
        }
        Ok(released)
    }

    /// Every queued request, oldest first.
    pub fn requests(&self) -> Result<Vec<UploadRequest>> {
        let mut requests = self.root.read(|txn| txn.values(&self.cache))?;
        requests.sort_by(oldest_first);
        Ok(requests)
    }
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("root", &self.root)
            .field("on_duplicate", &self.on_duplicate)
            .field("lease_timeout", &self.lease_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_kv::{Connector, MemoryConnector, WalConfig, WalConnector, DEFAULT_RECONNECT_ATTEMPTS};
    use depot_store::{BlobError, InMemoryBlobStore};
    use proptest::prelude::*;

    fn setup(on_duplicate: OnDuplicate) -> (UploadQueue, Arc<InMemoryBlobStore>) {
        let root = Arc::new(KvRoot::in_memory().unwrap());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let config = QueueConfig {
            on_duplicate,
            ..QueueConfig::default()
        };
        let queue = UploadQueue::open(root, blobs.clone(), &config).unwrap();
        (queue, blobs)
    }

    /// A queue whose store connections the test can drop.
    fn droppable(config: &QueueConfig) -> (UploadQueue, MemoryConnector, Arc<InMemoryBlobStore>) {
        let connector = MemoryConnector::new();
        let root = KvRoot::open(Arc::new(connector.clone()), DEFAULT_RECONNECT_ATTEMPTS).unwrap();
        let blobs = Arc::new(InMemoryBlobStore::new());
        let queue = UploadQueue::open(Arc::new(root), blobs.clone(), config).unwrap();
        (queue, connector, blobs)
    }

    fn enqueue(queue: &UploadQueue, user: &str, id: &str, content: &[u8]) -> Result<UploadRequest> {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), format!("Title of {id}"));
        queue.enqueue(Username::from(user), SubmissionId::from(id), metadata, content)
    }

    #[derive(Debug, PartialEq)]
    struct Refused;

    impl From<QueueError> for Refused {
        fn from(_: QueueError) -> Self {
            Refused
        }
    }

    #[test]
    fn enqueue_pop_until_empty() {
        let (queue, _) = setup(OnDuplicate::Reject);
        assert!(queue.is_empty().unwrap());

        enqueue(&queue, "alice", "s1", b"F1").unwrap();
        assert!(!queue.is_empty().unwrap());

        let popped = queue.pop_oldest().unwrap().unwrap();
        assert_eq!(popped.submission_id.as_str(), "s1");
        assert_eq!(popped.username.as_str(), "alice");
        assert_eq!(popped.metadata["title"], "Title of s1");
        assert!(queue.is_empty().unwrap());
        assert!(queue.pop_oldest().unwrap().is_none());
    }

    #[test]
    fn peek_empty_is_error() {
        let (queue, _) = setup(OnDuplicate::Reject);
        assert!(matches!(queue.peek_oldest(), Err(QueueError::EmptyQueue)));
    }

    #[test]
    fn peek_returns_oldest_without_removing() {
        let (queue, _) = setup(OnDuplicate::Reject);
        enqueue(&queue, "alice", "first", b"one").unwrap();
        enqueue(&queue, "bob", "second", b"two").unwrap();

        assert_eq!(queue.peek_oldest().unwrap().submission_id.as_str(), "first");
        assert_eq!(queue.peek_oldest().unwrap().submission_id.as_str(), "first");
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn pop_leaves_blob_until_released() {
        let (queue, blobs) = setup(OnDuplicate::Reject);
        let request = enqueue(&queue, "alice", "s1", b"payload").unwrap();
        let popped = queue.pop_oldest().unwrap().unwrap();
        assert_eq!(popped, request);

        assert_eq!(queue.read_blob(&popped).unwrap(), b"payload");
        queue.release_blob(&popped.blob_hash).unwrap();
        assert!(blobs.is_empty());
        queue.release_blob(&popped.blob_hash).unwrap();
    }

    #[test]
    fn duplicate_content_rejected_by_default() {
        let (queue, blobs) = setup(OnDuplicate::Reject);
        enqueue(&queue, "alice", "s1", b"same bytes").unwrap();
        let err = enqueue(&queue, "bob", "s2", b"same bytes").unwrap_err();
        assert!(matches!(
            err,
            QueueError::DuplicateContent { ref queued_submission, .. } if queued_submission.as_str() == "s1"
        ));
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(blobs.len(), 1);
    }

    #[test]
    fn duplicate_content_overwrites_when_configured() {
        let (queue, _) = setup(OnDuplicate::Overwrite);
        enqueue(&queue, "alice", "s1", b"same bytes").unwrap();
        enqueue(&queue, "bob", "s2", b"same bytes").unwrap();
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.peek_oldest().unwrap().submission_id.as_str(), "s2");
    }

    #[test]
    fn created_at_strictly_increases() {
        let (queue, _) = setup(OnDuplicate::Reject);
        let a = enqueue(&queue, "u", "a", b"a").unwrap();
        let b = enqueue(&queue, "u", "b", b"b").unwrap();
        let c = enqueue(&queue, "u", "c", b"c").unwrap();
        assert!(a.created_at < b.created_at);
        assert!(b.created_at < c.created_at);
    }

    #[test]
    fn cleanup_on_success_removes_request_and_blob() {
        let (queue, blobs) = setup(OnDuplicate::Reject);
        enqueue(&queue, "alice", "s1", b"deliver me").unwrap();

        let delivered = queue
            .pop_with_cleanup(|acquired| {
                let data = acquired.read()?;
                Ok::<_, QueueError>((acquired.request().submission_id.clone(), data))
            })
            .unwrap()
            .unwrap();

        assert_eq!(delivered.0.as_str(), "s1");
        assert_eq!(delivered.1, b"deliver me");
        assert!(queue.is_empty().unwrap());
        assert!(blobs.is_empty());
    }

    #[test]
    fn failed_block_keeps_request_and_blob() {
        let (queue, blobs) = setup(OnDuplicate::Reject);
        let request = enqueue(&queue, "alice", "s1", b"retry me").unwrap();

        let result: std::result::Result<Option<()>, Refused> =
            queue.pop_with_cleanup(|_| Err(Refused));
        assert_eq!(result, Err(Refused));

        assert_eq!(queue.peek_oldest().unwrap(), request);
        assert!(blobs.exists(&request.blob_hash).unwrap());
        // The lease is gone, so the next consumer gets it right away.
        assert_eq!(queue.pop_oldest().unwrap(), Some(request));
    }

    #[test]
    fn cleanup_on_empty_queue_is_none() {
        let (queue, _) = setup(OnDuplicate::Reject);
        let mut called = false;
        let result = queue
            .pop_with_cleanup(|_| {
                called = true;
                Ok::<_, QueueError>(())
            })
            .unwrap();
        assert!(result.is_none());
        assert!(!called);
    }

    #[test]
    fn missing_blob_fails_block_and_keeps_request() {
        let (queue, blobs) = setup(OnDuplicate::Reject);
        let request = enqueue(&queue, "alice", "s1", b"vanishing").unwrap();
        blobs.delete(&request.blob_hash).unwrap();

        let result = queue.pop_with_cleanup(|acquired| acquired.read());
        assert!(matches!(result, Err(QueueError::Blob(BlobError::NotFound(_)))));
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn requests_are_listed_oldest_first() {
        let (queue, _) = setup(OnDuplicate::Reject);
        for id in ["a", "b", "c"] {
            enqueue(&queue, "u", id, id.as_bytes()).unwrap();
        }
        let ids: Vec<_> = queue
            .requests()
            .unwrap()
            .into_iter()
            .map(|r| r.submission_id.into_inner())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn pop_after_dropped_connection_returns_request_once() {
        let (queue, connector, _) = droppable(&QueueConfig::default());
        let request = enqueue(&queue, "alice", "s1", b"once").unwrap();

        connector.drop_connections();
        assert_eq!(queue.pop_oldest().unwrap(), Some(request));
        assert_eq!(queue.pop_oldest().unwrap(), None);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn cleanup_after_dropped_connection_runs_block_once() {
        let (queue, connector, blobs) = droppable(&QueueConfig::default());
        enqueue(&queue, "alice", "s1", b"once").unwrap();

        connector.drop_connections();
        let mut runs = 0;
        queue
            .pop_with_cleanup(|_| {
                runs += 1;
                Ok::<_, QueueError>(())
            })
            .unwrap()
            .unwrap();

        assert_eq!(runs, 1);
        assert!(queue.is_empty().unwrap());
        assert!(blobs.is_empty());
    }

    #[test]
    fn connection_dropped_during_block_still_delivers_once() {
        let (queue, connector, blobs) = droppable(&QueueConfig::default());
        enqueue(&queue, "alice", "s1", b"once").unwrap();

        let mut runs = 0;
        queue
            .pop_with_cleanup(|_| {
                runs += 1;
                connector.drop_connections();
                Ok::<_, QueueError>(())
            })
            .unwrap()
            .unwrap();

        assert_eq!(runs, 1);
        assert!(queue.is_empty().unwrap());
        assert!(blobs.is_empty());
        let mut called = false;
        let again = queue
            .pop_with_cleanup(|_| {
                called = true;
                Ok::<_, QueueError>(())
            })
            .unwrap();
        assert!(again.is_none());
        assert!(!called);
    }

    #[test]
    fn request_being_delivered_goes_to_no_other_consumer() {
        let (queue, _) = setup(OnDuplicate::Reject);
        enqueue(&queue, "alice", "first", b"one").unwrap();
        enqueue(&queue, "bob", "second", b"two").unwrap();

        let (outer, inner, nested) = queue
            .pop_with_cleanup(|acquired| {
                let inner = queue.pop_oldest()?;
                let nested = queue.pop_with_cleanup(|_| Ok::<_, QueueError>(()))?;
                // Leased requests still count as queued.
                assert_eq!(queue.len()?, 1);
                assert_eq!(queue.peek_oldest()?.submission_id.as_str(), "first");
                Ok::<_, QueueError>((acquired.request().submission_id.clone(), inner, nested))
            })
            .unwrap()
            .unwrap();

        assert_eq!(outer.as_str(), "first");
        assert_eq!(inner.unwrap().submission_id.as_str(), "second");
        assert!(nested.is_none());
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn expired_lease_is_handed_out_again() {
        let config = QueueConfig {
            lease_timeout_secs: 0,
            ..QueueConfig::default()
        };
        let (queue, _, blobs) = droppable(&config);
        let request = enqueue(&queue, "alice", "s1", b"slow").unwrap();

        let (first, stale) = queue.begin_pop().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let (second, current) = queue.begin_pop().unwrap().unwrap();
        assert_eq!(first, request);
        assert_eq!(second, request);

        assert!(!queue.commit_pop(&first, &stale).unwrap());
        assert_eq!(queue.len().unwrap(), 1);
        assert!(queue.commit_pop(&second, &current).unwrap());
        assert!(queue.is_empty().unwrap());
        assert!(blobs.exists(&request.blob_hash).unwrap());
    }

    #[test]
    fn release_keeps_blob_of_content_queued_again() {
        let (queue, blobs) = setup(OnDuplicate::Reject);
        let first = enqueue(&queue, "alice", "s1", b"same bytes").unwrap();
        let popped = queue.pop_oldest().unwrap().unwrap();
        assert_eq!(popped, first);

        let again = enqueue(&queue, "bob", "s2", b"same bytes").unwrap();
        assert!(!queue.release_blob(&popped.blob_hash).unwrap());
        assert!(blobs.exists(&again.blob_hash).unwrap());
        assert_eq!(queue.read_blob(&again).unwrap(), b"same bytes");

        queue.pop_oldest().unwrap().unwrap();
        assert!(queue.release_blob(&again.blob_hash).unwrap());
        assert!(blobs.is_empty());
    }

    #[test]
    fn overwrite_during_delivery_keeps_new_request() {
        let (queue, blobs) = setup(OnDuplicate::Overwrite);
        enqueue(&queue, "alice", "s1", b"same bytes").unwrap();

        queue
            .pop_with_cleanup(|_| {
                enqueue(&queue, "bob", "s2", b"same bytes")?;
                Ok::<_, QueueError>(())
            })
            .unwrap()
            .unwrap();

        let left = queue.peek_oldest().unwrap();
        assert_eq!(left.submission_id.as_str(), "s2");
        assert!(blobs.exists(&left.blob_hash).unwrap());
        assert_eq!(queue.pop_oldest().unwrap(), Some(left));
    }

    #[test]
    fn queues_sharing_a_wal_hand_out_each_request_once() {
        let dir = tempfile::tempdir().unwrap();
        let connector: Arc<dyn Connector> =
            Arc::new(WalConnector::new(dir.path().join("root.wal"), WalConfig::default()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let open = || {
            let root = Arc::new(KvRoot::open(Arc::clone(&connector), 3).unwrap());
            UploadQueue::open(root, blobs.clone(), &QueueConfig::default()).unwrap()
        };
        let producer = open();
        let worker = open();
        let rival = open();

        let request = enqueue(&producer, "alice", "s1", b"shared").unwrap();
        let delivered = worker
            .pop_with_cleanup(|acquired| {
                assert_eq!(rival.pop_oldest()?, None);
                assert_eq!(acquired.read()?, b"shared");
                Ok::<_, QueueError>(acquired.request().clone())
            })
            .unwrap();

        assert_eq!(delivered, Some(request));
        assert!(producer.is_empty().unwrap());
        assert!(rival.pop_oldest().unwrap().is_none());
        assert!(blobs.is_empty());
    }

    proptest! {
        #[test]
        fn pops_in_fifo_order_exactly_once(
            contents in prop::collection::hash_set(prop::collection::vec(any::<u8>(), 1..32), 1..20)
        ) {
            let (queue, _) = setup(OnDuplicate::Reject);
            let mut expected = Vec::new();
            for (i, content) in contents.iter().enumerate() {
                let request = enqueue(&queue, "u", &format!("s{i}"), content).unwrap();
                expected.push(request);
            }

            let mut popped = Vec::new();
            while let Some(request) = queue.pop_oldest().unwrap() {
                popped.push(request);
            }

            prop_assert!(popped.windows(2).all(|w| w[0].created_at <= w[1].created_at));
            prop_assert_eq!(popped, expected);
            prop_assert!(queue.is_empty().unwrap());
        }
    }
}
