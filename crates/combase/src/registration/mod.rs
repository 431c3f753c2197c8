//! Process-wide registration tables
//!
//! - [`ClassRegistry`]: explicitly registered class objects, by revocation token
//! - [`ExternalLockLedger`]: external pins on live objects
//! - [`OpenLibraryCache`]: in-process server libraries kept loaded for reuse
//! - [`RunningObjectTable`]: named running objects

mod class_registry;
mod external_locks;
mod library_cache;
mod running_objects;

pub use class_registry::*;
pub use external_locks::*;
pub use library_cache::*;
pub use running_objects::*;
