//! Shared test infrastructure
//!
//! Test components, a recording launcher and waiter, and a launcher that
//! starts a simulated local server process: a second `ComRuntime` on its own
//! thread, talking to the client runtime only through a shared export table.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use combase::activation::LocalExportTable;
use combase::host::{GetClassObjectFn, PollWaiter, ProcessLauncher};
use combase::object::query_supported;
use combase::types::iid;
use combase::{
    ClassFactory, ClsCtx, Clsid, ComError, ComObject, ComPtr, ComRuntime, Guid, Iid, RefCount,
    RegCls, Result, ThreadingModel,
};

static INIT: Once = Once::new();

/// Install a test-friendly subscriber once per binary
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Interface implemented by [`Counter`]
pub const IID_COUNTER: Iid = Guid::from_u128(0x636f_756e_7465_7200_0000_000000000001);

/// Interface nobody implements
pub const IID_MISSING: Iid = Guid::from_u128(0x6d69_7373_696e_6700_0000_000000000001);

/// Component whose ownership count is observable
pub struct Counter {
    pub refs: RefCount,
}

impl Counter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { refs: RefCount::new() })
    }

    pub fn refs(&self) -> u32 {
        self.refs.get()
    }
}

impl ComObject for Counter {
    fn query_interface(self: Arc<Self>, iid: &Iid) -> Result<ComPtr> {
        query_supported(self, iid, &[IID_COUNTER])
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

/// Factory producing [`Counter`]s
pub struct CounterFactory {
    refs: RefCount,
    created: AtomicUsize,
    server_locks: AtomicUsize,
}

impl CounterFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refs: RefCount::new(),
            created: AtomicUsize::new(0),
            server_locks: AtomicUsize::new(0),
        })
    }

    pub fn refs(&self) -> u32 {
        self.refs.get()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn server_locks(&self) -> usize {
        self.server_locks.load(Ordering::SeqCst)
    }
}

impl ComObject for CounterFactory {
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

impl ClassFactory for CounterFactory {
    fn create_instance(&self, outer: Option<&ComPtr>, iid: &Iid) -> Result<ComPtr> {
        if outer.is_some() {
            return Err(ComError::NoAggregation);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let counter: ComPtr = Counter::new();
        counter.query_interface(iid)
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

/// `DllGetClassObject` serving `factory` for any CLSID, counting calls
pub fn serve_factory(factory: Arc<CounterFactory>, calls: Arc<AtomicUsize>) -> GetClassObjectFn {
    Arc::new(move |_clsid: &Clsid, iid: &Iid| {
        calls.fetch_add(1, Ordering::SeqCst);
        let factory: ComPtr = factory.clone();
        factory.query_interface(iid)
    })
}

/// Launcher that only records what it was asked to start
#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn count(&self) -> usize {
        self.launched.lock().len()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn spawn(&self, command_line: &str) -> Result<()> {
        self.launched.lock().push(command_line.to_string());
        Ok(())
    }
}

/// Waiter that returns at once and records every requested interval
#[derive(Default)]
pub struct RecordingWaiter {
    pub waits: Mutex<Vec<Duration>>,
}

impl PollWaiter for RecordingWaiter {
    fn wait(&self, interval: Duration) -> bool {
        self.waits.lock().push(interval);
        true
    }
}

/// Launcher starting a simulated local server
///
/// The server runs its own runtime on a new thread, waits `startup_delay`,
/// registers `factory` for `clsid` as a local server and then keeps running
/// until [`shutdown`](Self::shutdown).
pub struct LocalServerLauncher {
    exports: Arc<LocalExportTable>,
    clsid: Clsid,
    factory: Arc<CounterFactory>,
    startup_delay: Duration,
    launches: AtomicUsize,
    servers: Mutex<Vec<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl LocalServerLauncher {
    pub fn new(
        exports: Arc<LocalExportTable>,
        clsid: Clsid,
        factory: Arc<CounterFactory>,
        startup_delay: Duration,
    ) -> Self {
        Self {
            exports,
            clsid,
            factory,
            startup_delay,
            launches: AtomicUsize::new(0),
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Stop every server started so far and wait for them to exit
    pub fn shutdown(&self) {
        let servers = std::mem::take(&mut *self.servers.lock());
        for (stop, handle) in servers {
            let _ = stop.send(());
            handle.join().expect("server thread panicked");
        }
    }
}

impl ProcessLauncher for LocalServerLauncher {
    fn spawn(&self, _command_line: &str) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let exports = self.exports.clone();
        let clsid = self.clsid;
        let factory: ComPtr = self.factory.clone();
        let delay = self.startup_delay;

        let handle = thread::spawn(move || {
            let server = ComRuntime::builder().exporter(exports).build();
            server.initialize(ThreadingModel::Multithreaded).expect("server initialize");
            thread::sleep(delay);

            let token = server
                .register_class_object(&clsid, &factory, ClsCtx::LOCAL_SERVER, RegCls::MULTIPLEUSE)
                .expect("server registration");

            let _ = stop_rx.blocking_recv();
            server.revoke_class_object(token).expect("server revoke");
            server.uninitialize().expect("server uninitialize");
        });

        self.servers.lock().push((stop_tx, handle));
        Ok(())
    }
}
