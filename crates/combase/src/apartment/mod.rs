//! Apartment threading model
//!
//! Supports both threading models:
//! - STA: one thread per apartment, cross-apartment calls routed through a message window
//! - MTA: every joining thread shares the process-wide apartment

mod apartment;
mod manager;
mod window;

pub use apartment::*;
pub use manager::*;
pub use window::*;
