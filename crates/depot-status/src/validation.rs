use crate::ledger::LedgerSnapshot;

/// Result of index validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexReport {
    pub record_count: usize,
    pub owner_count: usize,
    pub violations: Vec<Violation>,
}

impl IndexReport {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific inconsistency between the record container and the indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub key: String,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// A record without an owner entry.
    MissingOwner,
    /// An owner entry without a record.
    OrphanOwner,
    /// An id whose owner's set does not contain it.
    MissingFromOwnerSet,
    /// An id in an owner's set that maps to someone else (or nobody).
    StaleOwnerSetEntry,
    /// An owner with an empty id set.
    EmptyOwnerSet,
    /// A record stored under a key other than its own id.
    KeyMismatch,
}

/// Checks that `id_to_owner` and `owner_to_ids` are exact inverses and cover
/// exactly the stored records.
pub struct IndexValidator;

impl IndexValidator {
    pub fn validate(snapshot: &LedgerSnapshot) -> IndexReport {
        let mut violations = Vec::new();
        let mut push = |key: &str, kind: ViolationKind, description: String| {
            violations.push(Violation {
                key: key.to_string(),
                kind,
                description,
            });
        };

        for (id, info) in &snapshot.records {
            if info.submission_id != *id {
                push(
                    id.as_str(),
                    ViolationKind::KeyMismatch,
                    format!("record stored under '{id}' names '{}'", info.submission_id),
                );
            }
            if !snapshot.id_to_owner.contains_key(id) {
                push(id.as_str(), ViolationKind::MissingOwner, format!("record '{id}' has no owner"));
            }
        }

        for (id, owner) in &snapshot.id_to_owner {
            if !snapshot.records.contains_key(id) {
                push(
                    id.as_str(),
                    ViolationKind::OrphanOwner,
                    format!("'{id}' is owned by '{owner}' but has no record"),
                );
            }
            let listed = snapshot
                .owner_to_ids
                .get(owner)
                .is_some_and(|ids| ids.contains(id));
            if !listed {
                push(
                    id.as_str(),
                    ViolationKind::MissingFromOwnerSet,
                    format!("'{id}' is missing from the id set of '{owner}'"),
                );
            }
        }

        for (owner, ids) in &snapshot.owner_to_ids {
            if ids.is_empty() {
                push(
                    owner.as_str(),
                    ViolationKind::EmptyOwnerSet,
                    format!("'{owner}' has an empty id set"),
                );
            }
            for id in ids {
                if snapshot.id_to_owner.get(id) != Some(owner) {
                    push(
                        id.as_str(),
                        ViolationKind::StaleOwnerSetEntry,
                        format!("'{id}' is listed under '{owner}' but not owned by them"),
                    );
                }
            }
        }

        IndexReport {
            record_count: snapshot.records.len(),
            owner_count: snapshot.owner_to_ids.len(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use depot_types::{StatusInfo, SubmissionId, Timestamp, Username};

    use super::*;

    fn consistent() -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        let id = SubmissionId::from("r1");
        let owner = Username::from("alice");
        snapshot
            .records
            .insert(id.clone(), StatusInfo::new(id.clone(), Timestamp::zero()));
        snapshot.id_to_owner.insert(id.clone(), owner.clone());
        snapshot.owner_to_ids.insert(owner, BTreeSet::from([id]));
        snapshot
    }

    fn kinds(report: &IndexReport) -> Vec<ViolationKind> {
        report.violations.iter().map(|v| v.kind.clone()).collect()
    }

    #[test]
    fn consistent_snapshot_is_valid() {
        let report = IndexValidator::validate(&consistent());
        assert!(report.is_valid());
        assert_eq!(report.record_count, 1);
        assert_eq!(report.owner_count, 1);
    }

    #[test]
    fn empty_snapshot_is_valid() {
        assert!(IndexValidator::validate(&LedgerSnapshot::default()).is_valid());
    }

    #[test]
    fn detects_missing_owner() {
        let mut snapshot = consistent();
        snapshot.id_to_owner.clear();
        let report = IndexValidator::validate(&snapshot);
        assert_eq!(
            kinds(&report),
            vec![ViolationKind::MissingOwner, ViolationKind::StaleOwnerSetEntry]
        );
    }

    #[test]
    fn detects_empty_owner_set() {
        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .owner_to_ids
            .insert(Username::from("bob"), BTreeSet::new());
        let report = IndexValidator::validate(&snapshot);
        assert_eq!(kinds(&report), vec![ViolationKind::EmptyOwnerSet]);
    }

    #[test]
    fn detects_orphan_owner_entry() {
        let mut snapshot = consistent();
        snapshot.records.clear();
        let report = IndexValidator::validate(&snapshot);
        assert_eq!(kinds(&report), vec![ViolationKind::OrphanOwner]);
    }
}
