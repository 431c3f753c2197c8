//! Host services consumed by the broker
//!
//! - [`KeyValueStore`]: the path→string registry holding server locations
//! - [`LibraryLoader`]: loading in-process server modules
//! - [`ProcessLauncher`]: starting local server executables
//! - [`PollWaiter`]: the timed, cancellable wait used while a server starts

mod launcher;
mod library;
mod regstore;

pub use launcher::*;
pub use library::*;
pub use regstore::*;
