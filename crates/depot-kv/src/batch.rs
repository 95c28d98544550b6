use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Committed state: container name -> key -> encoded value.
pub type Tables = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// A single write inside a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Bind an (empty) container to a name if nothing is bound yet.
    CreateContainer { container: String },
    /// Insert or replace a value.
    Put {
        container: String,
        key: String,
        value: Vec<u8>,
    },
    /// Remove a value; removing a missing key is a no-op.
    Delete { container: String, key: String },
}

/// All writes of one transaction. A batch is persisted as one WAL record and
/// applied to the in-memory tables as a unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub ops: Vec<WriteOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Apply every write, in order, to `tables`.
    pub fn apply(&self, tables: &mut Tables) {
        for op in &self.ops {
            match op {
                WriteOp::CreateContainer { container } => {
                    tables.entry(container.clone()).or_default();
                }
                WriteOp::Put {
                    container,
                    key,
                    value,
                } => {
                    tables
                        .entry(container.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                WriteOp::Delete { container, key } => {
                    if let Some(table) = tables.get_mut(container) {
                        table.remove(key);
                    }
                }
            }
        }
    }

    /// A single batch that recreates `tables` from scratch.
    pub fn snapshot(tables: &Tables) -> Self {
        let mut batch = Self::new();
        for (container, table) in tables {
            batch.push(WriteOp::CreateContainer {
                container: container.clone(),
            });
            for (key, value) in table {
                batch.push(WriteOp::Put {
                    container: container.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        batch
    }

    /// Replay batches in commit order.
    pub fn replay<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> Tables {
        let mut tables = Tables::new();
        for batch in batches {
            batch.apply(&mut tables);
        }
        tables
    }
}
