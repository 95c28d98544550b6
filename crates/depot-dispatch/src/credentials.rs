use std::sync::Arc;

use depot_kv::{Container, KvError, KvRoot, View};
use depot_types::Username;
use tracing::info;

use crate::error::DispatchResult;

/// Root container holding `username -> password hash`.
pub const USERS_CONTAINER: &str = "users";

/// User logins, as pushed by `SaveLogin` / `RemoveLogin`.
///
/// Hashes are stored as received; verifying passwords is left to the
/// front end that owns the hashing scheme.
pub trait CredentialStore: Send + Sync {
    /// Add a user or replace their password hash.
    fn save_login(&self, username: &Username, password_hash: &str) -> DispatchResult<()>;

    /// Remove a user. Returns `true` if they were registered.
    fn remove_login(&self, username: &Username) -> DispatchResult<bool>;

    fn password_hash(&self, username: &Username) -> DispatchResult<Option<String>>;

    fn is_registered(&self, username: &Username) -> DispatchResult<bool> {
        Ok(self.password_hash(username)?.is_some())
    }

    /// `true` when no user is known, e.g. after the store was wiped.
    fn is_empty(&self) -> DispatchResult<bool>;
}

/// [`CredentialStore`] kept in the `"users"` container of a [`KvRoot`].
pub struct KvCredentialStore {
    root: Arc<KvRoot>,
    users: Container<String>,
}

impl KvCredentialStore {
    pub fn open(root: Arc<KvRoot>) -> DispatchResult<Self> {
        let users = root.container(USERS_CONTAINER)?;
        Ok(Self { root, users })
    }

    /// Every registered username, sorted.
    pub fn usernames(&self) -> DispatchResult<Vec<Username>> {
        let keys = self
            .root
            .read(|txn| Ok::<_, KvError>(txn.keys(&self.users)))?;
        Ok(keys.into_iter().map(Username::from).collect())
    }
}

impl CredentialStore for KvCredentialStore {
    fn save_login(&self, username: &Username, password_hash: &str) -> DispatchResult<()> {
        self.root
            .transact(|txn| txn.put(&self.users, username.as_str(), &password_hash.to_string()))?;
        info!(user = %username, "login saved");
        Ok(())
    }

    fn remove_login(&self, username: &Username) -> DispatchResult<bool> {
        let removed = self
            .root
            .transact(|txn| Ok::<_, KvError>(txn.delete(&self.users, username.as_str())))?;
        if removed {
            info!(user = %username, "login removed");
        }
        Ok(removed)
    }

    fn password_hash(&self, username: &Username) -> DispatchResult<Option<String>> {
        Ok(self.root.read(|txn| txn.get(&self.users, username.as_str()))?)
    }

    fn is_empty(&self) -> DispatchResult<bool> {
        Ok(self.root.read(|txn| Ok::<_, KvError>(txn.len(&self.users) == 0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KvCredentialStore {
        KvCredentialStore::open(Arc::new(KvRoot::in_memory().unwrap())).unwrap()
    }

    #[test]
    fn save_and_replace_login() {
        let store = store();
        let alice = Username::from("alice");
        assert!(store.is_empty().unwrap());

        store.save_login(&alice, "$2b$12$first").unwrap();
        store.save_login(&alice, "$2b$12$second").unwrap();

        assert!(store.is_registered(&alice).unwrap());
        assert_eq!(store.password_hash(&alice).unwrap().as_deref(), Some("$2b$12$second"));
        assert_eq!(store.usernames().unwrap(), vec![alice]);
    }

    #[test]
    fn remove_login_reports_presence() {
        let store = store();
        let bob = Username::from("bob");
        store.save_login(&bob, "hash").unwrap();
        assert!(store.remove_login(&bob).unwrap());
        assert!(!store.remove_login(&bob).unwrap());
        assert!(!store.is_registered(&bob).unwrap());
        assert!(store.is_empty().unwrap());
    }
}
