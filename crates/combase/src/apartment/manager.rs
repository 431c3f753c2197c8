//! Apartment manager
//!
//! Owns the set of per-thread apartments and the lazily created shared
//! apartment. Lock counting and process bring-up live in the runtime; this
//! type only tracks which thread is in which apartment.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use parking_lot::RwLock;
use tracing::{debug, info};
use crate::types::{Oxid, ThreadingModel};
use super::apartment::Apartment;
use super::window::ApartmentWindow;

/// Registry of live apartments
pub struct ApartmentManager {
    /// Process-wide multithreaded apartment
    shared: RwLock<Option<Arc<Apartment>>>,
    /// Apartments by owning thread
    apartments: RwLock<HashMap<ThreadId, Arc<Apartment>>>,
}

impl ApartmentManager {
    /// Create a manager with no apartments
    pub fn new() -> Self {
        Self {
            shared: RwLock::new(None),
            apartments: RwLock::new(HashMap::new()),
        }
    }

    /// The shared apartment, created on first use
    pub fn shared_or_create(&self) -> Arc<Apartment> {
        if let Some(shared) = self.shared.read().as_ref() {
            return shared.clone();
        }

        let mut shared = self.shared.write();
        shared
            .get_or_insert_with(|| {
                let apartment = Arc::new(Apartment::new_shared());
                info!("Created shared apartment {}", apartment.oxid());
                apartment
            })
            .clone()
    }

    /// The shared apartment if it exists
    pub fn shared(&self) -> Option<Arc<Apartment>> {
        self.shared.read().clone()
    }

    /// Drop the shared apartment
    pub fn destroy_shared(&self) {
        if let Some(shared) = self.shared.write().take() {
            info!("Destroyed shared apartment {}", shared.oxid());
        }
    }

    /// The calling thread's apartment
    pub fn current(&self) -> Option<Arc<Apartment>> {
        self.apartments.read().get(&thread::current().id()).cloned()
    }

    /// Create and link an apartment for the calling thread
    ///
    /// The caller has already checked that the thread owns none.
    pub fn create(&self, model: ThreadingModel) -> Arc<Apartment> {
        let shared = self.shared_or_create();
        let apartment = Arc::new(Apartment::new_for_current_thread(model, shared));

        self.apartments
            .write()
            .insert(thread::current().id(), apartment.clone());
        debug!("Thread {:?} entered {:?} apartment {}", thread::current().id(), model, apartment.oxid());
        apartment
    }

    /// Drop one initialization of the calling thread's apartment
    ///
    /// Returns the apartment once its count reaches zero; it has then been
    /// unlinked, destroyed and disassociated from the thread.
    pub fn leave(&self) -> Option<Arc<Apartment>> {
        let apartment = self.current()?;
        if apartment.release_init() > 0 {
            return None;
        }

        self.apartments.write().remove(&thread::current().id());
        apartment.destroy();
        debug!("Thread {:?} left apartment {}", thread::current().id(), apartment.oxid());
        Some(apartment)
    }

    /// Window of the single-threaded apartment exporting as `oxid`
    pub fn lookup_window(&self, oxid: Oxid) -> Option<ApartmentWindow> {
        self.apartments
            .read()
            .values()
            .filter(|apartment| apartment.oxid() == oxid)
            .find_map(|apartment| apartment.window())
    }

    /// Number of per-thread apartments
    pub fn len(&self) -> usize {
        self.apartments.read().len()
    }

    /// Whether no thread owns an apartment
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ApartmentManager {
    fn default() -> Self {
        Self::new()
    }
}
