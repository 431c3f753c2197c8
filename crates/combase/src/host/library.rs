//! In-process server libraries
//!
//! A loaded library is anything exposing named entry points. The broker only
//! ever resolves two of them: [`DLL_GET_CLASS_OBJECT`] to obtain class
//! objects and [`DLL_CAN_UNLOAD_NOW`] to decide when a cached library may go.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use crate::object::ComPtr;
use crate::types::{Clsid, ComError, Iid, Result};

/// Class object entry point name
pub const DLL_GET_CLASS_OBJECT: &str = "DllGetClassObject";

/// Unload query entry point name
pub const DLL_CAN_UNLOAD_NOW: &str = "DllCanUnloadNow";

/// HRESULT_FROM_WIN32(ERROR_MOD_NOT_FOUND)
pub const E_MOD_NOT_FOUND: u32 = 0x8007007E;

/// `DllGetClassObject(clsid, iid)`
pub type GetClassObjectFn = Arc<dyn Fn(&Clsid, &Iid) -> Result<ComPtr> + Send + Sync>;

/// `DllCanUnloadNow()`, true when the library holds no live objects
pub type CanUnloadNowFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// An entry point resolved from a library
#[derive(Clone)]
pub enum ModuleExport {
    /// Class object factory
    GetClassObject(GetClassObjectFn),
    /// Unload query
    CanUnloadNow(CanUnloadNowFn),
}

impl fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleExport::GetClassObject(_) => f.write_str("GetClassObject"),
            ModuleExport::CanUnloadNow(_) => f.write_str("CanUnloadNow"),
        }
    }
}

/// Identity of a loaded library
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryHandle(pub u64);

/// A loaded library
pub trait LoadedLibrary: Send + Sync {
    /// Library identity; loading the same library twice yields the same handle
    fn handle(&self) -> LibraryHandle;

    /// Path the library was loaded from
    fn path(&self) -> &str;

    /// Resolve a named entry point
    fn resolve_export(&self, name: &str) -> Option<ModuleExport>;
}

/// Shared loaded-library reference
pub type LibraryRef = Arc<dyn LoadedLibrary>;

impl dyn LoadedLibrary {
    /// The class object entry point, if exported
    pub fn class_object_entry(&self) -> Option<GetClassObjectFn> {
        match self.resolve_export(DLL_GET_CLASS_OBJECT) {
            Some(ModuleExport::GetClassObject(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Ask the library whether it may be unloaded; `None` when it cannot say
    pub fn can_unload_now(&self) -> Option<bool> {
        match self.resolve_export(DLL_CAN_UNLOAD_NOW) {
            Some(ModuleExport::CanUnloadNow(query)) => Some(query()),
            _ => None,
        }
    }
}

/// Loads and unloads libraries
pub trait LibraryLoader: Send + Sync {
    /// Load the library at `path`
    fn load_library(&self, path: &str) -> Result<LibraryRef>;

    /// Drop one load of `library`
    fn unload_library(&self, library: &LibraryRef);
}

struct StaticModule {
    handle: LibraryHandle,
    path: String,
    exports: HashMap<String, ModuleExport>,
}

impl LoadedLibrary for StaticModule {
    fn handle(&self) -> LibraryHandle {
        self.handle
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn resolve_export(&self, name: &str) -> Option<ModuleExport> {
        self.exports.get(name).cloned()
    }
}

/// Loader over modules compiled into the binary
///
/// Modules are registered under a path; loading that path hands the module
/// out and bumps its load count, so callers can observe load/unload balance.
pub struct StaticLibraryLoader {
    modules: RwLock<HashMap<String, Arc<StaticModule>>>,
    load_counts: Mutex<HashMap<LibraryHandle, u32>>,
    next_handle: AtomicU64,
}

impl StaticLibraryLoader {
    /// Create a loader with no modules
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            load_counts: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Make a module with the given exports loadable from `path`
    pub fn add_module(&self, path: &str, exports: Vec<(&str, ModuleExport)>) -> LibraryHandle {
        let handle = LibraryHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let module = StaticModule {
            handle,
            path: path.to_string(),
            exports: exports
                .into_iter()
                .map(|(name, export)| (name.to_string(), export))
                .collect(),
        };
        self.modules.write().insert(path.to_ascii_lowercase(), Arc::new(module));
        handle
    }

    /// Convenience for a module exporting a class object entry and, optionally, an unload query
    pub fn add_server_module(
        &self,
        path: &str,
        get_class_object: GetClassObjectFn,
        can_unload_now: Option<CanUnloadNowFn>,
    ) -> LibraryHandle {
        let mut exports = vec![(DLL_GET_CLASS_OBJECT, ModuleExport::GetClassObject(get_class_object))];
        if let Some(query) = can_unload_now {
            exports.push((DLL_CAN_UNLOAD_NOW, ModuleExport::CanUnloadNow(query)));
        }
        self.add_module(path, exports)
    }

    /// Outstanding loads of `handle`
    pub fn load_count(&self, handle: LibraryHandle) -> u32 {
        self.load_counts.lock().get(&handle).copied().unwrap_or(0)
    }

    /// Total number of successful `load_library` calls still outstanding
    pub fn total_loads(&self) -> u32 {
        self.load_counts.lock().values().sum()
    }
}

impl Default for StaticLibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryLoader for StaticLibraryLoader {
    fn load_library(&self, path: &str) -> Result<LibraryRef> {
        let module = self
            .modules
            .read()
            .get(&path.to_ascii_lowercase())
            .cloned()
            .ok_or(ComError::Failed(E_MOD_NOT_FOUND))?;

        *self.load_counts.lock().entry(module.handle).or_insert(0) += 1;
        debug!("Loaded library {} ({:?})", module.path, module.handle);
        Ok(module as LibraryRef)
    }

    fn unload_library(&self, library: &LibraryRef) {
        let mut counts = self.load_counts.lock();
        if let Some(count) = counts.get_mut(&library.handle()) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&library.handle());
                debug!("Unloaded library {}", library.path());
            }
        }
    }
}
