use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use depot_kv::{Container, KvError, KvRoot, Txn, View};
use depot_types::{by_registration, StatusInfo, StatusMessage, StatusUpdate, SubmissionId, Timestamp, Username};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, StatusError};

pub const STATUS_CONTAINER: &str = "status";
pub const ID_TO_OWNER_CONTAINER: &str = "status_id_to_owner";
pub const OWNER_TO_IDS_CONTAINER: &str = "status_owner_to_ids";

/// Half a year.
pub const DEFAULT_GC_MAX_AGE: Duration = Duration::from_secs(15_768_000);

/// Ledger settings, as read from the `[status]` table of the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub gc_max_age_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            gc_max_age_secs: DEFAULT_GC_MAX_AGE.as_secs(),
        }
    }
}

impl StatusConfig {
    pub fn gc_max_age(&self) -> Duration {
        Duration::from_secs(self.gc_max_age_secs)
    }
}

/// Consistent copy of the ledger's three containers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub records: BTreeMap<SubmissionId, StatusInfo>,
    pub id_to_owner: BTreeMap<SubmissionId, Username>,
    pub owner_to_ids: BTreeMap<Username, BTreeSet<SubmissionId>>,
}

/// Per-submission status log with owner indices.
///
/// Every mutating call is one transaction against the [`KvRoot`]; reads see
/// a consistent snapshot.
pub struct StatusLedger {
    root: Arc<KvRoot>,
    status: Container<StatusInfo>,
    id_to_owner: Container<Username>,
    owner_to_ids: Container<BTreeSet<SubmissionId>>,
}

impl StatusLedger {
    /// Bind the ledger to its containers, creating them if needed.
    pub fn open(root: Arc<KvRoot>) -> Result<Self> {
        Ok(Self {
            status: root.container(STATUS_CONTAINER)?,
            id_to_owner: root.container(ID_TO_OWNER_CONTAINER)?,
            owner_to_ids: root.container(OWNER_TO_IDS_CONTAINER)?,
            root,
        })
    }

    /// Start tracking `submission_id` for `username`, registered now.
    pub fn register(&self, username: &Username, submission_id: &SubmissionId) -> Result<StatusInfo> {
        self.register_at(username, submission_id, Timestamp::now())
    }

    /// Start tracking `submission_id` with an explicit registration time.
    pub fn register_at(
        &self,
        username: &Username,
        submission_id: &SubmissionId,
        registered_at: Timestamp,
    ) -> Result<StatusInfo> {
        let key = submission_id.as_str();
        let info = self.root.transact(|txn| {
            if txn.contains(&self.status, key) || txn.contains(&self.id_to_owner, key) {
                return Err(StatusError::AlreadyRegistered {
                    submission_id: submission_id.clone(),
                });
            }

            let info = StatusInfo::new(submission_id.clone(), registered_at);
            txn.put(&self.status, key, &info)?;
            txn.put(&self.id_to_owner, key, username)?;

            let mut ids = txn
                .get(&self.owner_to_ids, username.as_str())?
                .unwrap_or_default();
            ids.insert(submission_id.clone());
            txn.put(&self.owner_to_ids, username.as_str(), &ids)?;
            Ok(info)
        })?;

        info!(user = %username, submission = %submission_id, "status tracking registered");
        Ok(info)
    }

    /// Append a status message. Updates for ids that are not registered are
    /// ignored; returns whether the update was applied.
    pub fn record_update(&self, update: &StatusUpdate) -> Result<bool> {
        let key = update.submission_id.as_str();
        let applied = self.root.transact(|txn| {
            let Some(mut info) = txn.get(&self.status, key)? else {
                return Ok::<_, StatusError>(false);
            };
            let fresh = info.add_message(update.to_message());
            info.apply_details(update);
            txn.put(&self.status, key, &info)?;
            if !fresh {
                debug!(submission = %update.submission_id, "duplicate status message");
            }
            Ok(true)
        })?;

        if applied {
            debug!(submission = %update.submission_id, message = %update.message.trim(), "status recorded");
        } else {
            warn!(submission = %update.submission_id, "status update for untracked submission ignored");
        }
        Ok(applied)
    }

    /// Messages of one submission, oldest first.
    ///
    /// With `username`, the submission must be owned by that user.
    pub fn query(
        &self,
        submission_id: &SubmissionId,
        username: Option<&Username>,
    ) -> Result<Vec<StatusMessage>> {
        Ok(self.info(submission_id, username)?.messages())
    }

    /// Full record of one submission, with the same checks as [`query`](Self::query).
    pub fn info(&self, submission_id: &SubmissionId, username: Option<&Username>) -> Result<StatusInfo> {
        let key = submission_id.as_str();
        self.root.read(|txn| {
            let owner = txn
                .get(&self.id_to_owner, key)?
                .ok_or_else(|| StatusError::NotFound {
                    submission_id: submission_id.clone(),
                })?;
            if let Some(username) = username {
                if *username != owner {
                    return Err(StatusError::AccessDenied {
                        submission_id: submission_id.clone(),
                        username: username.clone(),
                    });
                }
            }
            txn.get(&self.status, key)?.ok_or_else(|| StatusError::NotFound {
                submission_id: submission_id.clone(),
            })
        })
    }

    /// Every record owned by `username`, by registration time.
    ///
    /// Fails with [`StatusError::UnknownUser`] if the user tracks nothing.
    pub fn query_all(&self, username: &Username) -> Result<Vec<StatusInfo>> {
        self.root.read(|txn| {
            let ids = txn
                .get(&self.owner_to_ids, username.as_str())?
                .ok_or_else(|| StatusError::UnknownUser {
                    username: username.clone(),
                })?;

            let mut records = Vec::with_capacity(ids.len());
            for id in &ids {
                match txn.get(&self.status, id.as_str())? {
                    Some(info) => records.push(info),
                    None => warn!(submission = %id, "owner index points at a missing record"),
                }
            }
            records.sort_by(by_registration);
            Ok(records)
        })
    }

    /// Stop tracking `submission_id`.
    ///
    /// With `username`, the submission must be owned by that user; otherwise
    /// nothing is changed. Returns whether anything was removed.
    pub fn remove(&self, submission_id: &SubmissionId, username: Option<&Username>) -> Result<bool> {
        let removed = self.root.transact(|txn| {
            if let Some(username) = username {
                let owner = txn.get(&self.id_to_owner, submission_id.as_str())?;
                if owner.as_ref() != Some(username) {
                    return Err(StatusError::AccessDenied {
                        submission_id: submission_id.clone(),
                        username: username.clone(),
                    });
                }
            }
            Ok(self.remove_in(txn, submission_id)?)
        })?;

        if removed {
            info!(submission = %submission_id, "status tracking removed");
        }
        Ok(removed)
    }

    /// Stop tracking every submission owned by `username`. Returns the ids
    /// that were actually tracked; empty if the user tracks nothing.
    pub fn remove_owner(&self, username: &Username) -> Result<Vec<SubmissionId>> {
        let removed = self.root.transact(|txn| {
            let ids = txn
                .get(&self.owner_to_ids, username.as_str())?
                .unwrap_or_default();
            let mut removed = Vec::with_capacity(ids.len());
            for id in ids {
                if self.remove_in(txn, &id)? {
                    removed.push(id);
                }
            }
            // Clears the set even if it held ids without an owner entry.
            txn.delete(&self.owner_to_ids, username.as_str());
            Ok::<_, StatusError>(removed)
        })?;

        if !removed.is_empty() {
            info!(user = %username, count = removed.len(), "owner tracking removed");
        }
        Ok(removed)
    }

    /// Remove every record registered more than `max_age` ago.
    pub fn garbage_collect(&self, max_age: Duration) -> Result<Vec<SubmissionId>> {
        self.garbage_collect_at(Timestamp::now(), max_age)
    }

    /// [`garbage_collect`](Self::garbage_collect) against an explicit clock.
    pub fn garbage_collect_at(&self, now: Timestamp, max_age: Duration) -> Result<Vec<SubmissionId>> {
        let cutoff = now.minus(max_age);
        let expired: Vec<SubmissionId> = self.root.read(|txn| {
            Ok::<_, StatusError>(
                txn.values(&self.status)?
                    .into_iter()
                    .filter(|info| info.registered_at() < cutoff)
                    .map(|info| info.submission_id)
                    .collect(),
            )
        })?;

        let mut collected = Vec::with_capacity(expired.len());
        for id in expired {
            // Skip ids re-registered since the scan.
            let removed = self.root.transact(|txn| {
                match txn.get(&self.status, id.as_str())? {
                    Some(info) if info.registered_at() < cutoff => Ok(self.remove_in(txn, &id)?),
                    _ => Ok::<_, StatusError>(false),
                }
            })?;
            if removed {
                collected.push(id);
            }
        }

        info!(
            cutoff = %cutoff,
            collected = collected.len(),
            ids = ?collected.iter().map(SubmissionId::as_str).collect::<Vec<_>>(),
            "status garbage collection finished"
        );
        Ok(collected)
    }

    /// Number of tracked submissions.
    pub fn len(&self) -> Result<usize> {
        Ok(self.root.read(|txn| Ok::<_, KvError>(txn.len(&self.status)))?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy all three containers in one read.
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.root.read(|txn| {
            let records = txn
                .values(&self.status)?
                .into_iter()
                .map(|info| (info.submission_id.clone(), info))
                .collect();
            let id_to_owner = txn
                .entries(&self.id_to_owner)?
                .into_iter()
                .map(|(id, owner)| (SubmissionId::from(id), owner))
                .collect();
            let owner_to_ids = txn
                .entries(&self.owner_to_ids)?
                .into_iter()
                .map(|(owner, ids)| (Username::from(owner), ids))
                .collect();
            Ok(LedgerSnapshot {
                records,
                id_to_owner,
                owner_to_ids,
            })
        })
    }

    /// Delete the record and both index entries of one id.
    fn remove_in(&self, txn: &mut Txn<'_>, submission_id: &SubmissionId) -> std::result::Result<bool, KvError> {
        let key = submission_id.as_str();
        let had_record = txn.delete(&self.status, key);

        let Some(owner) = txn.get(&self.id_to_owner, key)? else {
            return Ok(had_record);
        };
        txn.delete(&self.id_to_owner, key);

        if let Some(mut ids) = txn.get(&self.owner_to_ids, owner.as_str())? {
            ids.remove(submission_id);
            if ids.is_empty() {
                txn.delete(&self.owner_to_ids, owner.as_str());
            } else {
                txn.put(&self.owner_to_ids, owner.as_str(), &ids)?;
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for StatusLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLedger").field("root", &self.root).finish()
    }
}
