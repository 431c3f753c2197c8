//! Running object table
//!
//! Process-wide table of objects published under a name while they run.
//! The runtime creates it at bring-up and empties it at teardown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use tracing::debug;
use crate::object::ComPtr;
use crate::types::{ComError, Guid, RegistrationToken, Result};

struct RunningEntry {
    name: String,
    object: ComPtr,
}

/// Named running objects
pub struct RunningObjectTable {
    entries: Mutex<BTreeMap<RegistrationToken, RunningEntry>>,
    next_token: AtomicU64,
}

impl RunningObjectTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Publish `object` under `name`; the table holds one ownership reference
    pub fn register(&self, name: &str, object: &ComPtr) -> Result<RegistrationToken> {
        let token = {
            let mut entries = self.entries.lock();
            if entries.values().any(|entry| entry.name == name) {
                return Err(ComError::ObjectAlreadyRegistered(Guid::NIL));
            }
            let token = RegistrationToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
            entries.insert(token, RunningEntry {
                name: name.to_string(),
                object: object.clone(),
            });
            token
        };

        object.add_ref();
        debug!("Running object {:?} registered as {}", name, token);
        Ok(token)
    }

    /// Withdraw a published object
    pub fn revoke(&self, token: RegistrationToken) -> Result<()> {
        let entry = self
            .entries
            .lock()
            .remove(&token)
            .ok_or(ComError::InvalidToken(token))?;
        entry.object.release();
        Ok(())
    }

    /// The object published under `name`
    pub fn get_object(&self, name: &str) -> Option<ComPtr> {
        self.entries
            .lock()
            .values()
            .find(|entry| entry.name == name)
            .map(|entry| entry.object.clone())
    }

    /// Whether something is published under `name`
    pub fn is_running(&self, name: &str) -> bool {
        self.get_object(name).is_some()
    }

    /// Withdraw everything
    pub fn revoke_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        for entry in entries.values() {
            entry.object.release();
        }
        entries.len()
    }

    /// Number of published objects
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RunningObjectTable {
    fn default() -> Self {
        Self::new()
    }
}
