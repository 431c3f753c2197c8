//! Run-context and threading flags

use bitflags::bitflags;

/// Threading model of an apartment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreadingModel {
    /// Single-threaded apartment, bound to its owning thread
    ApartmentThreaded,
    /// Process-wide shared multithreaded apartment
    Multithreaded,
}

bitflags! {
    /// Deployment localities a caller accepts for activation
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClsCtx: u32 {
        /// Library loaded into the calling process
        const INPROC_SERVER = 0x1;
        /// In-process handler for an out-of-process object
        const INPROC_HANDLER = 0x2;
        /// Separate process on the same machine
        const LOCAL_SERVER = 0x4;
        /// Server on another machine
        const REMOTE_SERVER = 0x10;

        /// Any in-process form
        const INPROC = Self::INPROC_SERVER.bits() | Self::INPROC_HANDLER.bits();
        /// Every server form
        const SERVER = Self::INPROC_SERVER.bits()
            | Self::LOCAL_SERVER.bits()
            | Self::REMOTE_SERVER.bits();
        /// Everything
        const ALL = Self::SERVER.bits() | Self::INPROC_HANDLER.bits();
    }
}

bitflags! {
    /// Connection flags passed at class registration
    ///
    /// The empty set means single-use.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RegCls: u32 {
        /// Many clients may connect to the class object
        const MULTIPLEUSE = 0x1;
        /// Like MULTIPLEUSE but in-process callers get a separate registration
        const MULTI_SEPARATE = 0x2;
        /// Registered but not yet visible until resumed
        const SUSPENDED = 0x4;
        /// Registered by a surrogate process
        const SURROGATE = 0x8;
    }
}

impl RegCls {
    /// Single-use registration
    pub const SINGLEUSE: Self = Self::empty();
}
