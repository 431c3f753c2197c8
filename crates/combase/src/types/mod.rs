//! Core broker types
//!
//! This module contains the fundamental data structures used throughout the broker:
//! - Identifiers: GUID (CLSID/IID), OXID, registration tokens
//! - Run-context, registration and threading flags
//! - The error type and HRESULT codes

mod context;
mod error;
mod identifiers;

// Re-export all types
pub use context::*;
pub use error::*;
pub use identifiers::{
    Guid, Clsid, Iid, Oxid, RegistrationToken,
    current_thread_ordinal,
};

/// Well-known interface identifiers
pub mod iid {
    use super::Guid;

    /// IUnknown
    pub const IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_c000_000000000046);
    /// IClassFactory
    pub const ICLASSFACTORY: Guid = Guid::from_u128(0x00000001_0000_0000_c000_000000000046);
    /// IMarshal
    pub const IMARSHAL: Guid = Guid::from_u128(0x00000003_0000_0000_c000_000000000046);
    /// IRunningObjectTable
    pub const IRUNNINGOBJECTTABLE: Guid = Guid::from_u128(0x00000010_0000_0000_c000_000000000046);
}
