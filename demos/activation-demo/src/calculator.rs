//! The demo's calculator component
//!
//! One factory type serves three deployments of the same component: an
//! explicit registration, an in-process library and a local server.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use combase::host::{CanUnloadNowFn, GetClassObjectFn};
use combase::object::query_supported;
use combase::types::iid;
use combase::{ClassFactory, Clsid, ComError, ComObject, ComPtr, Guid, Iid, RefCount, Result};

/// Calculator registered explicitly by the demo
pub const CLSID_CALCULATOR: Clsid = Guid::from_u128(0x2b6f_8a41_5c0e_4f8e_9d1a_7e3c_0b5a_1001);

/// Calculator served by `calc.dll`
pub const CLSID_CALCULATOR_INPROC: Clsid = Guid::from_u128(0x2b6f_8a41_5c0e_4f8e_9d1a_7e3c_0b5a_1002);

/// Calculator served by `calc-server.exe`
pub const CLSID_CALCULATOR_LOCAL: Clsid = Guid::from_u128(0x2b6f_8a41_5c0e_4f8e_9d1a_7e3c_0b5a_1003);

/// ICalculator
pub const IID_CALCULATOR: Iid = Guid::from_u128(0x2b6f_8a41_5c0e_4f8e_9d1a_7e3c_0b5a_2001);

/// IDisplay, deliberately not implemented
pub const IID_DISPLAY: Iid = Guid::from_u128(0x2b6f_8a41_5c0e_4f8e_9d1a_7e3c_0b5a_2002);

/// Library path of the in-process server
pub const CALC_DLL: &str = "C:\\Program Files\\Calc\\calc.dll";

/// Command line of the local server
pub const CALC_SERVER: &str = "calc-server.exe -Embedding";

/// A calculator instance
pub struct Calculator {
    refs: RefCount,
    live: Arc<AtomicUsize>,
}

impl Calculator {
    pub fn add(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    pub fn multiply(&self, a: i64, b: i64) -> i64 {
        a * b
    }
}

impl Drop for Calculator {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ComObject for Calculator {
    fn query_interface(self: Arc<Self>, iid: &Iid) -> Result<ComPtr> {
        query_supported(self, iid, &[IID_CALCULATOR])
    }

    fn add_ref(&self) -> u32 {
        self.refs.add_ref()
    }

    fn release(&self) -> u32 {
        self.refs.release()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Class factory for [`Calculator`]
pub struct CalculatorFactory {
    name: &'static str,
    refs: RefCount,
    live: Arc<AtomicUsize>,
    server_locks: AtomicUsize,
}

impl CalculatorFactory {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            refs: RefCount::new(),
            live: Arc::new(AtomicUsize::new(0)),
            server_locks: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn refs(&self) -> u32 {
        self.refs.get()
    }

    /// Calculators created by this factory that are still alive
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// `DllGetClassObject` of a library hosting this factory
    pub fn entry_point(self: &Arc<Self>) -> GetClassObjectFn {
        let factory = self.clone();
        Arc::new(move |clsid: &Clsid, iid: &Iid| {
            if *clsid != CLSID_CALCULATOR_INPROC {
                return Err(ComError::ClassNotRegistered(*clsid));
            }
            let factory: ComPtr = factory.clone();
            factory.query_interface(iid)
        })
    }

    /// `DllCanUnloadNow` of a library hosting this factory
    pub fn unload_query(self: &Arc<Self>) -> CanUnloadNowFn {
        let factory = self.clone();
        Arc::new(move || {
            factory.live_objects() == 0 && factory.server_locks.load(Ordering::SeqCst) == 0
        })
    }
}

impl ComObject for CalculatorFactory {
    fn query_interface(self: Arc<Self>, iid: &Iid) -> Result<ComPtr> {
        query_supported(self, iid, &[iid::ICLASSFACTORY])
    }

    fn add_ref(&self) -> u32 {
        self.refs.add_ref()
    }

    fn release(&self) -> u32 {
        self.refs.release()
    }

    fn as_class_factory(&self) -> Option<&dyn ClassFactory> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ClassFactory for CalculatorFactory {
    fn create_instance(&self, outer: Option<&ComPtr>, iid: &Iid) -> Result<ComPtr> {
        if outer.is_some() {
            return Err(ComError::NoAggregation);
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        let calculator: ComPtr = Arc::new(Calculator {
            refs: RefCount::new(),
            live: self.live.clone(),
        });
        calculator.query_interface(iid)
    }

    fn lock_server(&self, lock: bool) -> Result<()> {
        if lock {
            self.server_locks.fetch_add(1, Ordering::SeqCst);
        } else {
            self.server_locks.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Borrow the calculator behind an interface pointer
pub fn as_calculator(object: &ComPtr) -> Result<&Calculator> {
    object
        .as_any()
        .downcast_ref::<Calculator>()
        .ok_or(ComError::NoInterface(IID_CALCULATOR))
}
