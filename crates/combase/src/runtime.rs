//! Broker runtime
//!
//! [`ComRuntime`] owns every process-wide table and drives the process lock
//! count: the first `initialize` of the process brings the shared services
//! up, the last `uninitialize` tears everything down again.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use crate::activation::{
    ClassExporter, ClassResolver, LocalExportTable, MultiQi, MultiQiStatus, ResolverParts,
};
use crate::apartment::{Apartment, ApartmentManager, ApartmentWindow};
use crate::host::{
    CancellableWait, KeyValueStore, LibraryHandle, LibraryLoader, MemoryRegistry, PollWaiter,
    ProcessLauncher, StaticLibraryLoader, SystemLauncher,
};
use crate::marshal::{InProcMarshaler, Marshaler};
use crate::object::ComPtr;
use crate::registration::{ClassRegistry, ExternalLockLedger, OpenLibraryCache, RunningObjectTable};
use crate::types::{
    hresult, ClsCtx, Clsid, ComError, Iid, Oxid, RegCls, RegistrationToken, Result, ThreadingModel,
};
use crate::{DEFAULT_SERVER_POLL_ATTEMPTS, DEFAULT_SERVER_POLL_INTERVAL};

/// Broker configuration
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Wait between checks for a launched local server
    pub server_poll_interval: Duration,
    /// Checks before giving up on a launched local server
    pub server_poll_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server_poll_interval: DEFAULT_SERVER_POLL_INTERVAL,
            server_poll_attempts: DEFAULT_SERVER_POLL_ATTEMPTS,
        }
    }
}

impl BrokerConfig {
    /// Start from the defaults
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::default()
    }

    /// Longest time a local server launch may block the caller
    pub fn server_start_timeout(&self) -> Duration {
        self.server_poll_interval * self.server_poll_attempts
    }
}

/// Builder for [`BrokerConfig`]
#[derive(Default)]
pub struct BrokerConfigBuilder {
    config: BrokerConfig,
}

impl BrokerConfigBuilder {
    /// Set the poll interval
    pub fn server_poll_interval(mut self, interval: Duration) -> Self {
        self.config.server_poll_interval = interval;
        self
    }

    /// Set the number of polls
    pub fn server_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.server_poll_attempts = attempts;
        self
    }

    /// Finish the configuration
    pub fn build(self) -> BrokerConfig {
        self.config
    }
}

/// Success status of [`ComRuntime::initialize`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStatus {
    /// The calling thread entered a new apartment
    Initialized,
    /// The calling thread was already in an apartment of that model
    AlreadyInitialized,
}

impl InitStatus {
    /// The HRESULT reported for this status
    pub fn hresult(&self) -> u32 {
        match self {
            InitStatus::Initialized => hresult::S_OK,
            InitStatus::AlreadyInitialized => hresult::S_FALSE,
        }
    }
}

/// Builder for [`ComRuntime`]
///
/// Collaborators left unset get the in-process defaults.
#[derive(Default)]
pub struct ComRuntimeBuilder {
    config: BrokerConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    marshaler: Option<Arc<dyn Marshaler>>,
    exporter: Option<Arc<dyn ClassExporter>>,
    loader: Option<Arc<dyn LibraryLoader>>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    waiter: Option<Arc<dyn PollWaiter>>,
}

impl ComRuntimeBuilder {
    /// Use `config`
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry store holding server locations
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Marshaler for class registrations
    pub fn marshaler(mut self, marshaler: Arc<dyn Marshaler>) -> Self {
        self.marshaler = Some(marshaler);
        self
    }

    /// Export table for local server class objects
    pub fn exporter(mut self, exporter: Arc<dyn ClassExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Loader for in-process server libraries
    pub fn loader(mut self, loader: Arc<dyn LibraryLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Launcher for local server executables
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Wait used between local server polls
    pub fn waiter(mut self, waiter: Arc<dyn PollWaiter>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    /// Build the runtime
    pub fn build(self) -> ComRuntime {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryRegistry::new()));
        let marshaler = self.marshaler.unwrap_or_else(|| Arc::new(InProcMarshaler::new()));
        let exporter = self.exporter.unwrap_or_else(|| Arc::new(LocalExportTable::new()));
        let loader = self.loader.unwrap_or_else(|| Arc::new(StaticLibraryLoader::new()));
        let launcher = self.launcher.unwrap_or_else(|| Arc::new(SystemLauncher));
        let waiter = self.waiter.unwrap_or_else(|| Arc::new(CancellableWait::new()));

        let registry = Arc::new(ClassRegistry::new(marshaler, exporter.clone()));
        let libraries = Arc::new(OpenLibraryCache::new(loader.clone()));
        let resolver = ClassResolver::new(
            ResolverParts {
                registry: registry.clone(),
                libraries: libraries.clone(),
                store: store.clone(),
                loader,
                launcher,
                waiter,
                exporter,
            },
            &self.config,
        );

        ComRuntime {
            config: self.config,
            store,
            apartments: ApartmentManager::new(),
            lock_count: AtomicI64::new(0),
            transition: Mutex::new(()),
            registry,
            libraries,
            external_locks: ExternalLockLedger::new(),
            running_objects: RwLock::new(None),
            resolver,
        }
    }
}

/// Component activation and lifetime broker
///
/// One instance stands for one process. Threads join it with
/// [`initialize`](Self::initialize) and leave with
/// [`uninitialize`](Self::uninitialize); every successful `initialize` must
/// be balanced by one `uninitialize` on the same thread.
pub struct ComRuntime {
    config: BrokerConfig,
    store: Arc<dyn KeyValueStore>,
    apartments: ApartmentManager,
    /// Net `initialize` calls across all threads
    lock_count: AtomicI64,
    /// Serializes bring-up against teardown
    transition: Mutex<()>,
    registry: Arc<ClassRegistry>,
    libraries: Arc<OpenLibraryCache>,
    external_locks: ExternalLockLedger,
    running_objects: RwLock<Option<Arc<RunningObjectTable>>>,
    resolver: ClassResolver,
}

impl ComRuntime {
    /// Runtime with default configuration and collaborators
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Runtime with `config` and default collaborators
    pub fn with_config(config: BrokerConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start building a runtime
    pub fn builder() -> ComRuntimeBuilder {
        ComRuntimeBuilder::default()
    }

    /// Configuration in use
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Registry store holding server locations
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // === Process lifecycle ===

    /// Enter an apartment of `model` on the calling thread
    pub fn initialize(&self, model: ThreadingModel) -> Result<InitStatus> {
        if let Some(apartment) = self.apartments.current() {
            if apartment.model() != model {
                warn!(
                    "Thread {:?} is {:?}, cannot re-initialize as {:?}",
                    std::thread::current().id(),
                    apartment.model(),
                    model
                );
                return Err(ComError::ChangedMode {
                    current: apartment.model(),
                    requested: model,
                });
            }
            apartment.add_init();
            self.acquire_process();
            return Ok(InitStatus::AlreadyInitialized);
        }

        self.acquire_process();
        self.apartments.create(model);
        Ok(InitStatus::Initialized)
    }

    /// Leave the calling thread's apartment once
    pub fn uninitialize(&self) -> Result<()> {
        if self.apartments.current().is_none() {
            error!(
                "Uninitialize on thread {:?}, which is not initialized",
                std::thread::current().id()
            );
            return Err(ComError::NotInitialized);
        }

        if let Some(apartment) = self.apartments.leave() {
            debug!("Apartment {} destroyed", apartment.oxid());
        }
        self.release_process()
    }

    /// Net outstanding `initialize` calls
    pub fn lock_count(&self) -> i64 {
        self.lock_count.load(Ordering::Acquire)
    }

    /// Whether the process-wide services are up
    pub fn is_running(&self) -> bool {
        self.running_objects.read().is_some()
    }

    fn acquire_process(&self) {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        // Also when the count was not zero: a teardown racing with this call
        // may have taken the services down after another thread's bring-up
        self.bring_up();
    }

    fn release_process(&self) -> Result<()> {
        let previous = self.lock_count.fetch_sub(1, Ordering::AcqRel);
        if previous <= 0 {
            self.lock_count.fetch_add(1, Ordering::AcqRel);
            error!("Unbalanced uninitialize: process lock count was {}", previous);
            return Err(ComError::NotInitialized);
        }
        if previous == 1 {
            self.teardown();
        }
        Ok(())
    }

    fn bring_up(&self) {
        let _transition = self.transition.lock();
        if self.lock_count() <= 0 {
            return;
        }

        let mut running_objects = self.running_objects.write();
        if running_objects.is_none() {
            self.apartments.shared_or_create();
            *running_objects = Some(Arc::new(RunningObjectTable::new()));
            info!("Process services started");
        }
    }

    fn teardown(&self) {
        let _transition = self.transition.lock();
        // A concurrent initialize got in first; the process stays up
        if self.lock_count() != 0 {
            return;
        }

        let running_objects = self.running_objects.write().take();
        let objects = running_objects.map_or(0, |table| table.revoke_all());
        let classes = self.registry.revoke_all();
        let libraries = self.libraries.release_all();
        let pins = self.external_locks.drain_all();
        self.apartments.destroy_shared();

        info!(
            "Process services stopped: {} classes revoked, {} libraries released, {} objects pinned, {} running objects",
            classes, libraries, pins, objects
        );
    }

    // === Apartments ===

    /// The calling thread's apartment
    pub fn current_apartment(&self) -> Option<Arc<Apartment>> {
        self.apartments.current()
    }

    /// Threading model of the calling thread's apartment
    pub fn apartment_type(&self) -> Result<ThreadingModel> {
        self.require_apartment().map(|apartment| apartment.model())
    }

    /// Message window of the single-threaded apartment exporting as `oxid`
    pub fn lookup_apartment_window(&self, oxid: Oxid) -> Option<ApartmentWindow> {
        self.apartments.lookup_window(oxid)
    }

    /// Number of threads currently in an apartment
    pub fn apartment_count(&self) -> usize {
        self.apartments.len()
    }

    fn require_apartment(&self) -> Result<Arc<Apartment>> {
        self.apartments.current().ok_or(ComError::NotInitialized)
    }

    // === Class registration ===

    /// Register `factory` as the class object for `clsid`
    pub fn register_class_object(
        &self,
        clsid: &Clsid,
        factory: &ComPtr,
        context: ClsCtx,
        flags: RegCls,
    ) -> Result<RegistrationToken> {
        self.require_apartment()?;
        self.registry.register(*clsid, factory, context, flags)
    }

    /// Withdraw a class registration
    pub fn revoke_class_object(&self, token: RegistrationToken) -> Result<()> {
        self.registry.revoke(token)
    }

    /// Explicitly registered classes
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    // === Activation ===

    /// Obtain the class object for `clsid` as `iid`
    pub fn get_class_object(&self, clsid: &Clsid, context: ClsCtx, iid: &Iid) -> Result<ComPtr> {
        self.require_apartment()?;
        self.resolver.get_class_object(clsid, context, iid)
    }

    /// Create an instance of `clsid` as `iid`
    pub fn create_instance(
        &self,
        clsid: &Clsid,
        outer: Option<&ComPtr>,
        context: ClsCtx,
        iid: &Iid,
    ) -> Result<ComPtr> {
        self.require_apartment()?;
        self.resolver.create_instance(clsid, outer, context, iid)
    }

    /// Create an instance of `clsid` and query it for every entry of `results`
    pub fn create_instance_ex(
        &self,
        clsid: &Clsid,
        outer: Option<&ComPtr>,
        context: ClsCtx,
        results: &mut [MultiQi],
    ) -> Result<MultiQiStatus> {
        self.require_apartment()?;
        self.resolver.create_instance_ex(clsid, outer, context, results)
    }

    // === External locks ===

    /// Pin (`lock`) or unpin `object` on behalf of an external party
    ///
    /// When unpinning with `last_unlock_releases`, every pin goes at once.
    pub fn lock_object_external(&self, object: &ComPtr, lock: bool, last_unlock_releases: bool) -> Result<()> {
        if lock {
            self.external_locks.pin(object);
        } else {
            self.external_locks.unpin(object, last_unlock_releases);
        }
        Ok(())
    }

    /// External pins held on objects
    pub fn external_locks(&self) -> &ExternalLockLedger {
        &self.external_locks
    }

    // === Libraries ===

    /// Unload cached libraries that report they are unused
    pub fn free_unused_libraries(&self) -> usize {
        self.libraries.reap_unused()
    }

    /// Unload every cached library
    pub fn free_all_libraries(&self) -> usize {
        self.libraries.release_all()
    }

    /// Unload one cached library; `false` if it was not cached
    pub fn free_library(&self, handle: LibraryHandle) -> bool {
        self.libraries.free(handle)
    }

    /// Libraries loaded by activation
    pub fn libraries(&self) -> &OpenLibraryCache {
        &self.libraries
    }

    // === Running objects ===

    /// The process running object table
    pub fn running_object_table(&self) -> Result<Arc<RunningObjectTable>> {
        self.running_objects
            .read()
            .clone()
            .ok_or(ComError::NotInitialized)
    }
}

impl Default for ComRuntime {
    fn default() -> Self {
        Self::new()
    }
}
