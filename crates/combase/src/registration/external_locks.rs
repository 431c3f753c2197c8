//! External lock ledger
//!
//! Tracks pins held on behalf of external parties, separately from an
//! object's own reference count. Every pin adds one ownership reference to
//! the object and every unpin releases one, so the two counts stay in step.
//! Object callbacks run outside the ledger lock.

use std::collections::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use crate::object::{ComPtr, ObjectId};

struct LockEntry {
    object: ComPtr,
    pins: u32,
}

/// Ledger of external pins
pub struct ExternalLockLedger {
    entries: Mutex<HashMap<ObjectId, LockEntry>>,
}

impl ExternalLockLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Add one pin on `object`, returning its new pin count
    ///
    /// The reference is taken before the pin becomes visible, so an unpin can
    /// never release a reference that has not been added yet.
    pub fn pin(&self, object: &ComPtr) -> u32 {
        object.add_ref();

        let pins = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(ObjectId::of(object)).or_insert_with(|| LockEntry {
                object: object.clone(),
                pins: 0,
            });
            entry.pins += 1;
            entry.pins
        };

        trace!("Pinned {:?} ({} pins)", ObjectId::of(object), pins);
        pins
    }

    /// Remove one pin, or every pin when `release_all`; returns the pins left
    ///
    /// Unpinning an object with no entry does nothing.
    pub fn unpin(&self, object: &ComPtr, release_all: bool) -> u32 {
        let id = ObjectId::of(object);
        let (released, remaining, held) = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&id) else {
                return 0;
            };

            let released = if release_all { entry.pins } else { 1 };
            entry.pins -= released;
            let remaining = entry.pins;
            let held = if remaining == 0 {
                entries.remove(&id).map(|entry| entry.object)
            } else {
                None
            };
            (released, remaining, held)
        };

        let target = held.as_ref().unwrap_or(object);
        for _ in 0..released {
            target.release();
        }
        trace!("Unpinned {:?} ({} released, {} left)", id, released, remaining);
        remaining
    }

    /// Fully unpin every tracked object
    pub fn drain_all(&self) -> usize {
        let drained: Vec<LockEntry> = self.entries.lock().drain().map(|(_, entry)| entry).collect();

        for entry in &drained {
            for _ in 0..entry.pins {
                entry.object.release();
            }
        }
        if !drained.is_empty() {
            debug!("Released external locks on {} objects", drained.len());
        }
        drained.len()
    }

    /// Current pins on `object`
    pub fn pins(&self, object: &ComPtr) -> u32 {
        self.entries
            .lock()
            .get(&ObjectId::of(object))
            .map(|entry| entry.pins)
            .unwrap_or(0)
    }

    /// Number of pinned objects
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is pinned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExternalLockLedger {
    fn default() -> Self {
        Self::new()
    }
}
