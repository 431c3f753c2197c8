//! Component object model
//!
//! Objects are shared as `Arc<dyn ComObject>`. The `Arc` keeps memory alive;
//! the explicit `add_ref`/`release` counter is the component's own ownership
//! count, which external locks and marshaled references must keep balanced.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use crate::types::{ComError, Iid, Result, iid};

/// Shared interface pointer
pub type ComPtr = Arc<dyn ComObject>;

/// Trait for component object implementations
pub trait ComObject: Send + Sync + 'static {
    /// Obtain a pointer for `iid`, or [`ComError::NoInterface`]
    fn query_interface(self: Arc<Self>, iid: &Iid) -> Result<ComPtr>;

    /// Increment the ownership count, returning the new value
    fn add_ref(&self) -> u32;

    /// Decrement the ownership count, returning the new value
    fn release(&self) -> u32;

    /// Class factory view of this object, if it is one
    fn as_class_factory(&self) -> Option<&dyn ClassFactory> {
        None
    }

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn ComObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComObject({:p})", self as *const dyn ComObject as *const ())
    }
}

/// Trait for objects able to create instances of a component
pub trait ClassFactory: Send + Sync {
    /// Create an instance, returning it as `iid`
    fn create_instance(&self, outer: Option<&ComPtr>, iid: &Iid) -> Result<ComPtr>;

    /// Keep the hosting server alive (`true`) or let it go (`false`)
    fn lock_server(&self, lock: bool) -> Result<()>;
}

/// Process-local identity of an object (its address)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Identity of the object behind `ptr`
    pub fn of(ptr: &ComPtr) -> Self {
        Self(Arc::as_ptr(ptr) as *const () as usize)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#x})", self.0)
    }
}

/// Standard `QueryInterface` for an object supporting `IUnknown` plus `supported`
pub fn query_supported<T: ComObject>(this: Arc<T>, requested: &Iid, supported: &[Iid]) -> Result<ComPtr> {
    if *requested == iid::IUNKNOWN || supported.contains(requested) {
        Ok(this as ComPtr)
    } else {
        Err(ComError::NoInterface(*requested))
    }
}

/// Ownership counter for [`ComObject`] implementors
///
/// Starts at zero; every holder that wants the component alive adds one.
#[derive(Debug, Default)]
pub struct RefCount(AtomicU32);

impl RefCount {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Increment, returning the new value
    pub fn add_ref(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement without going below zero, returning the new value
    pub fn release(&self) -> u32 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return 0;
            }
            match self.0.compare_exchange_weak(
                current, current - 1, Ordering::AcqRel, Ordering::Acquire
            ) {
                Ok(_) => return current - 1,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current value
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}
