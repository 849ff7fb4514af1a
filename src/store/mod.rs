//! Credential store boundary
//!
//! Session-scoped key-value persistence for the issued credential. The
//! workflow only ever writes under [`CREDENTIAL_KEY`] and reads it back as
//! the per-call bearer.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Key under which the issued credential is persisted.
pub const CREDENTIAL_KEY: &str = "token";

/// Key-value persistence for credentials.
pub trait CredentialStore: Send + Sync {
    fn set(&self, key: &str, value: &str);
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory store living for one application session.
#[derive(Default)]
pub struct SessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for SessionStore {
    fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}
