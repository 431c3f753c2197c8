//! Cache of in-process server libraries
//!
//! Libraries loaded by activation on a caller's behalf stay loaded after the
//! class object is handed out. Reaping is advisory: a library is unloaded only
//! when its own `DllCanUnloadNow` agrees; skipping reaping just costs memory.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{debug, trace};
use crate::host::{LibraryHandle, LibraryLoader, LibraryRef};

/// Set of cached libraries, deduplicated by handle
pub struct OpenLibraryCache {
    loader: Arc<dyn LibraryLoader>,
    libraries: Mutex<HashMap<LibraryHandle, LibraryRef>>,
}

impl OpenLibraryCache {
    /// Create an empty cache unloading through `loader`
    pub fn new(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            loader,
            libraries: Mutex::new(HashMap::new()),
        }
    }

    /// Track `library`; `false` if it was already tracked
    pub fn track(&self, library: &LibraryRef) -> bool {
        let mut libraries = self.libraries.lock();
        if libraries.contains_key(&library.handle()) {
            return false;
        }
        libraries.insert(library.handle(), library.clone());
        trace!("Caching library {}", library.path());
        true
    }

    /// Unload every library that reports it can be unloaded; returns how many went
    pub fn reap_unused(&self) -> usize {
        let candidates: Vec<LibraryRef> = self.libraries.lock().values().cloned().collect();

        let mut reaped = 0;
        for library in candidates {
            // Libraries without the query are never unloaded here
            if library.can_unload_now() != Some(true) {
                continue;
            }
            if self.untrack(library.handle()).is_some() {
                debug!("Reaping unused library {}", library.path());
                self.loader.unload_library(&library);
                reaped += 1;
            }
        }
        reaped
    }

    /// Unload one cached library; `false` if it was not cached
    pub fn free(&self, handle: LibraryHandle) -> bool {
        match self.untrack(handle) {
            Some(library) => {
                self.loader.unload_library(&library);
                true
            }
            None => false,
        }
    }

    /// Unload every cached library regardless of its state
    pub fn release_all(&self) -> usize {
        let libraries: Vec<LibraryRef> = self.libraries.lock().drain().map(|(_, lib)| lib).collect();
        for library in &libraries {
            self.loader.unload_library(library);
        }
        if !libraries.is_empty() {
            debug!("Released {} cached libraries", libraries.len());
        }
        libraries.len()
    }

    fn untrack(&self, handle: LibraryHandle) -> Option<LibraryRef> {
        self.libraries.lock().remove(&handle)
    }

    /// Whether `handle` is cached
    pub fn contains(&self, handle: LibraryHandle) -> bool {
        self.libraries.lock().contains_key(&handle)
    }

    /// Number of cached libraries
    pub fn len(&self) -> usize {
        self.libraries.lock().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
