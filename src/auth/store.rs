//! Credential verification store.
//!
//! The store backing real deployments is an external collaborator; the core
//! only depends on the [`CredentialStore`] contract. [`MemoryCredentialStore`]
//! is the in-memory implementation used for wiring and tests.

use std::collections::HashMap;

/// Authenticated identity attached to a session after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Verified username.
    pub username: String,
}

/// Contract for verifying handshake credentials.
pub trait CredentialStore: Send + Sync {
    /// Verify a username/password pair.
    ///
    /// Returns the authenticated [`Principal`] on success, `None` on reject.
    fn verify(&self, username: &str, password: &str) -> Option<Principal>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: HashMap<String, String>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, replacing any existing password.
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn verify(&self, username: &str, password: &str) -> Option<Principal> {
        match self.users.get(username) {
            Some(stored) if stored == password => Some(Principal {
                username: username.to_string(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_known_user() {
        let store = MemoryCredentialStore::new().with_user("soumen", "soumen");

        let principal = store.verify("soumen", "soumen").unwrap();
        assert_eq!(principal.username, "soumen");
    }

    #[test]
    fn test_verify_wrong_password() {
        let store = MemoryCredentialStore::new().with_user("soumen", "wrong");
        assert!(store.verify("soumen", "soumen").is_none());
    }

    #[test]
    fn test_verify_unknown_user() {
        let store = MemoryCredentialStore::new().with_user("soumen", "soumen");
        assert!(store.verify("alice", "soumen").is_none());
    }

    #[test]
    fn test_empty_store_rejects_everything() {
        let store = MemoryCredentialStore::new();
        assert!(store.verify("", "").is_none());
    }
}
