//! Key-value registry for server locations

use std::collections::HashMap;
use parking_lot::RwLock;
use crate::types::{Clsid, Result};

/// Subkey naming a class's in-process server library
pub const INPROC_SERVER_SUBKEY: &str = "InprocServer32";

/// Subkey naming a class's local server executable
pub const LOCAL_SERVER_SUBKEY: &str = "LocalServer32";

/// Path→string lookup service
pub trait KeyValueStore: Send + Sync {
    /// Read the value at `key`, `None` when absent
    fn read_path(&self, key: &str) -> Option<String>;

    /// Write `value` at `key`
    fn write_path(&self, key: &str, value: &str) -> Result<()>;
}

/// Key under which a class's server of kind `subkey` is recorded
pub fn server_key(clsid: &Clsid, subkey: &str) -> String {
    format!("CLSID\\{}\\{}", clsid, subkey)
}

/// Record the library implementing `clsid` in-process
pub fn register_inproc_server(store: &dyn KeyValueStore, clsid: &Clsid, library: &str) -> Result<()> {
    store.write_path(&server_key(clsid, INPROC_SERVER_SUBKEY), library)
}

/// Record the executable serving `clsid` out-of-process
pub fn register_local_server(store: &dyn KeyValueStore, clsid: &Clsid, command_line: &str) -> Result<()> {
    store.write_path(&server_key(clsid, LOCAL_SERVER_SUBKEY), command_line)
}

/// In-memory registry
pub struct MemoryRegistry {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Remove a value, returning it
    pub fn delete_path(&self, key: &str) -> Option<String> {
        self.values.write().remove(&normalize(key))
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Registry paths are case-insensitive
fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

impl KeyValueStore for MemoryRegistry {
    fn read_path(&self, key: &str) -> Option<String> {
        self.values.read().get(&normalize(key)).cloned()
    }

    fn write_path(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(normalize(key), value.to_string());
        Ok(())
    }
}
