//! Broker error types and HRESULT mapping

use thiserror::Error;
use super::identifiers::{Clsid, Iid, RegistrationToken};
use super::context::ThreadingModel;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, ComError>;

/// Broker errors
///
/// Every variant carries a fixed HRESULT (see [`ComError::hresult`]), which is
/// the status callers across the component boundary actually observe.
#[derive(Error, Debug)]
pub enum ComError {
    /// Thread re-entered with a different threading model
    #[error("threading model cannot change from {current:?} to {requested:?}")]
    ChangedMode {
        current: ThreadingModel,
        requested: ThreadingModel,
    },

    /// Calling thread owns no apartment, or the process is not initialized
    #[error("runtime not initialized on this thread")]
    NotInitialized,

    /// No registration path knows this class
    #[error("class not registered: {0}")]
    ClassNotRegistered(Clsid),

    /// In-process server library could not be loaded
    #[error("access denied loading {0}")]
    AccessDenied(String),

    /// Library loaded but lacks the class object entry point
    #[error("library {0} does not export a class object entry point")]
    DllNotFound(String),

    /// Local server executable could not be launched
    #[error("local server could not be launched: {0}")]
    AppNotFound(String),

    /// Launched local server never exported the class
    #[error("server for {clsid} did not register after {attempts} polls")]
    AppDidNotRegister { clsid: Clsid, attempts: u32 },

    /// Object does not implement the requested interface
    #[error("interface not supported: {0}")]
    NoInterface(Iid),

    /// Factory refuses aggregation
    #[error("class does not support aggregation")]
    NoAggregation,

    /// A class object is already registered for this CLSID
    #[error("class object already registered: {0}")]
    ObjectAlreadyRegistered(Clsid),

    /// Revocation token unknown or already revoked
    #[error("invalid registration token: {0}")]
    InvalidToken(RegistrationToken),

    /// Argument precondition violated
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failed while constructing an entry
    #[error("out of memory")]
    OutOfMemory,

    /// No activation path was attempted or state was inconsistent
    #[error("unexpected failure: {0}")]
    Unexpected(String),

    /// Call made on a thread that does not own the apartment
    #[error("call made on the wrong thread")]
    WrongThread,

    /// Apartment or object behind a reference is gone
    #[error("object disconnected: {0}")]
    Disconnected(String),

    /// Waiting for a server was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Marshaled data truncated
    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    /// Marshaled data malformed
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Collaborator failure passed through as-is
    #[error("operation failed: 0x{0:08x}")]
    Failed(u32),
}

impl ComError {
    /// The HRESULT reported for this error
    pub fn hresult(&self) -> u32 {
        use hresult::*;
        match self {
            ComError::ChangedMode { .. } => RPC_E_CHANGED_MODE,
            ComError::NotInitialized => CO_E_NOTINITIALIZED,
            ComError::ClassNotRegistered(_) => REGDB_E_CLASSNOTREG,
            ComError::AccessDenied(_) => E_ACCESSDENIED,
            ComError::DllNotFound(_) => CO_E_DLLNOTFOUND,
            ComError::AppNotFound(_) => CO_E_APPNOTFOUND,
            ComError::AppDidNotRegister { .. } => CO_E_APPDIDNTREG,
            ComError::NoInterface(_) => E_NOINTERFACE,
            ComError::NoAggregation => CLASS_E_NOAGGREGATION,
            ComError::ObjectAlreadyRegistered(_) => CO_E_OBJISREG,
            ComError::InvalidToken(_) | ComError::InvalidArgument(_) => E_INVALIDARG,
            ComError::OutOfMemory => E_OUTOFMEMORY,
            ComError::Unexpected(_) => E_UNEXPECTED,
            ComError::WrongThread => RPC_E_WRONG_THREAD,
            ComError::Disconnected(_) => RPC_E_DISCONNECTED,
            ComError::Cancelled => E_CANCELLED,
            ComError::BufferUnderflow { .. } | ComError::InvalidData(_) => E_FAIL,
            ComError::Failed(code) => *code,
        }
    }
}

/// HRESULT codes produced by the broker
pub mod hresult {
    /// Operation successful
    pub const S_OK: u32 = 0x00000000;
    /// Operation successful, returning false (already initialized)
    pub const S_FALSE: u32 = 0x00000001;
    /// Object created but some requested interfaces were unavailable
    pub const CO_S_NOTALLINTERFACES: u32 = 0x00080012;
    /// Unspecified error
    pub const E_FAIL: u32 = 0x80004005;
    /// No such interface supported
    pub const E_NOINTERFACE: u32 = 0x80004002;
    /// Catastrophic failure
    pub const E_UNEXPECTED: u32 = 0x8000FFFF;
    /// Out of memory
    pub const E_OUTOFMEMORY: u32 = 0x8007000E;
    /// Invalid argument
    pub const E_INVALIDARG: u32 = 0x80070057;
    /// Access denied
    pub const E_ACCESSDENIED: u32 = 0x80070005;
    /// HRESULT_FROM_WIN32(ERROR_CANCELLED)
    pub const E_CANCELLED: u32 = 0x800704C7;
    /// Class not registered
    pub const REGDB_E_CLASSNOTREG: u32 = 0x80040154;
    /// Class does not support aggregation
    pub const CLASS_E_NOAGGREGATION: u32 = 0x80040110;
    /// Runtime not initialized
    pub const CO_E_NOTINITIALIZED: u32 = 0x800401F0;
    /// Application not found
    pub const CO_E_APPNOTFOUND: u32 = 0x800401F5;
    /// DLL for the class not found
    pub const CO_E_DLLNOTFOUND: u32 = 0x800401F8;
    /// Object already registered
    pub const CO_E_OBJISREG: u32 = 0x800401FB;
    /// Server did not register its class objects in time
    pub const CO_E_APPDIDNTREG: u32 = 0x800401FE;
    /// Threading mode cannot be changed once set
    pub const RPC_E_CHANGED_MODE: u32 = 0x80010106;
    /// Object invoked has disconnected from its clients
    pub const RPC_E_DISCONNECTED: u32 = 0x80010108;
    /// Interface was marshaled for a different thread
    pub const RPC_E_WRONG_THREAD: u32 = 0x8001010E;

    /// True for success codes (severity bit clear)
    pub fn succeeded(hr: u32) -> bool {
        hr & 0x8000_0000 == 0
    }
}
