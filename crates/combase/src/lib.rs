//! Component activation and lifetime broker
//!
//! This crate implements the per-process half of a component object runtime:
//! apartments, class object registration, class object resolution, and the
//! reference-holding tables that keep components and their server libraries
//! alive for exactly as long as something needs them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ComRuntime (process lifecycle)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Apartments          │  Registration       │  Activation    │
//! │  - STA (per thread)  │  - Class registry   │  - Resolver    │
//! │  - MTA (shared)      │  - External locks   │  - Export table│
//! │  - Message windows   │  - Library cache    │                │
//! │                      │  - Running objects  │                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Host services: registry store, library loader, launcher,   │
//! │  poll waiter, marshaler                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **Apartment**: threading context of a thread, single-threaded (STA) or
//!   the shared multithreaded apartment (MTA)
//! - **OXID**: apartment identity, process id plus thread ordinal
//! - **Class object**: the factory behind a CLSID, found through
//!   registration, an in-process library or a local server
//! - **Process lock count**: net `initialize` calls; its first and last
//!   transitions bring the process services up and down
//!
//! # Modules
//!
//! - [`types`]: identifiers, flags and errors
//! - [`object`]: the component object model
//! - [`marshal`]: marshaled interface references
//! - [`host`]: services the broker consumes from its host
//! - [`apartment`]: apartments and their message windows
//! - [`registration`]: process-wide registration tables
//! - [`activation`]: class object resolution
//! - [`runtime`]: the broker itself

pub mod types;
pub mod object;
pub mod marshal;
pub mod host;
pub mod apartment;
pub mod registration;
pub mod activation;
pub mod runtime;


use std::time::Duration;

// Re-export main types and the runtime API
pub use types::{
    ComError, Result,
    Guid, Clsid, Iid, Oxid, RegistrationToken,
    ClsCtx, RegCls, ThreadingModel,
};
pub use object::{ClassFactory, ComObject, ComPtr, RefCount};
pub use activation::{MultiQi, MultiQiStatus};
pub use runtime::{BrokerConfig, BrokerConfigBuilder, ComRuntime, ComRuntimeBuilder, InitStatus};

/// Default wait between checks for a launched local server
pub const DEFAULT_SERVER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of checks before a launched local server is given up on
pub const DEFAULT_SERVER_POLL_ATTEMPTS: u32 = 120;
