//! Class object resolution
//!
//! `GetClassObject` tries each activation path in a fixed order and stops at
//! the first that produces an object:
//!
//! 1. A class object registered in this process
//! 2. An in-process server library named in the registry store
//! 3. A local server, already running or launched on demand and polled
//! 4. A remote server (not supported; always `NoInterface`)
//!
//! Paths 2 to 4 are only attempted when the caller's run context asks for them.
//! An unusable in-process library moves on to the next path; the entry point's
//! own answer and the local server's outcome are final.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use crate::host::{
    server_key, GetClassObjectFn, KeyValueStore, LibraryLoader, PollWaiter, ProcessLauncher,
    INPROC_SERVER_SUBKEY, LOCAL_SERVER_SUBKEY,
};
use crate::object::ComPtr;
use crate::registration::{ClassRegistry, OpenLibraryCache};
use crate::runtime::BrokerConfig;
use crate::types::{hresult, iid, ClsCtx, Clsid, ComError, Iid, Result};
use super::ClassExporter;

/// One interface requested from `CreateInstanceEx`
#[derive(Debug)]
pub struct MultiQi {
    /// Requested interface
    pub iid: Iid,
    /// Outcome for this interface, filled in by the call
    pub result: Option<Result<ComPtr>>,
}

impl MultiQi {
    /// Request `iid`
    pub fn new(iid: Iid) -> Self {
        Self { iid, result: None }
    }

    /// The obtained interface, if the query succeeded
    pub fn interface(&self) -> Option<&ComPtr> {
        match &self.result {
            Some(Ok(object)) => Some(object),
            _ => None,
        }
    }
}

/// Success status of `CreateInstanceEx`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultiQiStatus {
    /// Every requested interface was obtained
    AllInterfaces,
    /// At least one, but not every, requested interface was obtained
    NotAllInterfaces,
}

impl MultiQiStatus {
    /// The HRESULT reported for this status
    pub fn hresult(&self) -> u32 {
        match self {
            MultiQiStatus::AllInterfaces => hresult::S_OK,
            MultiQiStatus::NotAllInterfaces => hresult::CO_S_NOTALLINTERFACES,
        }
    }
}

/// Collaborators the resolver searches through
pub struct ResolverParts {
    pub registry: Arc<ClassRegistry>,
    pub libraries: Arc<OpenLibraryCache>,
    pub store: Arc<dyn KeyValueStore>,
    pub loader: Arc<dyn LibraryLoader>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub waiter: Arc<dyn PollWaiter>,
    pub exporter: Arc<dyn ClassExporter>,
}

/// Resolves class objects and creates instances
pub struct ClassResolver {
    registry: Arc<ClassRegistry>,
    libraries: Arc<OpenLibraryCache>,
    store: Arc<dyn KeyValueStore>,
    loader: Arc<dyn LibraryLoader>,
    launcher: Arc<dyn ProcessLauncher>,
    waiter: Arc<dyn PollWaiter>,
    exporter: Arc<dyn ClassExporter>,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl ClassResolver {
    /// Create a resolver over `parts`
    pub fn new(parts: ResolverParts, config: &BrokerConfig) -> Self {
        Self {
            registry: parts.registry,
            libraries: parts.libraries,
            store: parts.store,
            loader: parts.loader,
            launcher: parts.launcher,
            waiter: parts.waiter,
            exporter: parts.exporter,
            poll_interval: config.server_poll_interval,
            poll_attempts: config.server_poll_attempts,
        }
    }

    /// Obtain the class object for `clsid` as `iid`
    pub fn get_class_object(&self, clsid: &Clsid, context: ClsCtx, iid: &Iid) -> Result<ComPtr> {
        if let Some(factory) = self.registry.lookup(clsid)? {
            debug!("Class {} resolved from local registration", clsid);
            return factory.query_interface(iid);
        }

        let mut last_error = None;

        if context.intersects(ClsCtx::INPROC) {
            match self.inproc_entry(clsid) {
                Ok(entry) => return entry(clsid, iid),
                Err(e) => {
                    debug!("No usable in-process server for {}: {}", clsid, e);
                    last_error = Some(e);
                }
            }
        }

        if context.contains(ClsCtx::LOCAL_SERVER) {
            let result = self.local_server(clsid, iid);
            if let Err(e) = &result {
                debug!("Local server activation of {} failed: {}", clsid, e);
            }
            return result;
        }

        if context.contains(ClsCtx::REMOTE_SERVER) {
            warn!("Remote activation of {} is not supported", clsid);
            // An earlier path's failure is more specific than the stub's
            return Err(last_error.unwrap_or(ComError::NoInterface(*iid)));
        }

        Err(last_error.unwrap_or_else(|| {
            ComError::Unexpected(format!("no activation path for {} in {:?}", clsid, context))
        }))
    }

    /// Create an instance of `clsid` through its class factory
    pub fn create_instance(
        &self,
        clsid: &Clsid,
        outer: Option<&ComPtr>,
        context: ClsCtx,
        iid: &Iid,
    ) -> Result<ComPtr> {
        let factory = self.get_class_object(clsid, context, &iid::ICLASSFACTORY)?;
        let factory = factory
            .as_class_factory()
            .ok_or(ComError::NoInterface(iid::ICLASSFACTORY))?;
        factory.create_instance(outer, iid)
    }

    /// Create an instance and query it for several interfaces at once
    ///
    /// Each entry of `results` gets its own outcome.
    pub fn create_instance_ex(
        &self,
        clsid: &Clsid,
        outer: Option<&ComPtr>,
        context: ClsCtx,
        results: &mut [MultiQi],
    ) -> Result<MultiQiStatus> {
        let first = results
            .first()
            .map(|request| request.iid)
            .ok_or_else(|| ComError::InvalidArgument("no interfaces requested".to_string()))?;

        let object = self.create_instance(clsid, outer, context, &first)?;

        let mut obtained = 0;
        for request in results.iter_mut() {
            let outcome = object.clone().query_interface(&request.iid);
            if outcome.is_ok() {
                obtained += 1;
            }
            request.result = Some(outcome);
        }

        if obtained == results.len() {
            Ok(MultiQiStatus::AllInterfaces)
        } else if obtained > 0 {
            Ok(MultiQiStatus::NotAllInterfaces)
        } else {
            Err(ComError::NoInterface(first))
        }
    }

    /// Load the in-process library for `clsid` and return its class object entry
    fn inproc_entry(&self, clsid: &Clsid) -> Result<GetClassObjectFn> {
        let path = self
            .store
            .read_path(&server_key(clsid, INPROC_SERVER_SUBKEY))
            .ok_or(ComError::ClassNotRegistered(*clsid))?;

        let library = self.loader.load_library(&path).map_err(|e| {
            warn!("Could not load {} for {}: {}", path, clsid, e);
            ComError::AccessDenied(path.clone())
        })?;

        let Some(entry) = library.class_object_entry() else {
            warn!("{} has no class object entry point", path);
            self.loader.unload_library(&library);
            return Err(ComError::DllNotFound(path));
        };

        if !self.libraries.track(&library) {
            // Already cached; the cache keeps exactly one load alive
            self.loader.unload_library(&library);
        }

        debug!("Class {} served by in-process library {}", clsid, path);
        Ok(entry)
    }

    fn local_server(&self, clsid: &Clsid, iid: &Iid) -> Result<ComPtr> {
        if let Some(object) = self.exporter.try_import(clsid, iid)? {
            debug!("Class {} served by a running local server", clsid);
            return Ok(object);
        }

        let command = self
            .store
            .read_path(&server_key(clsid, LOCAL_SERVER_SUBKEY))
            .ok_or(ComError::ClassNotRegistered(*clsid))?;

        info!("Launching local server for {}: {}", clsid, command);
        self.launcher.spawn(&command).map_err(|e| match e {
            ComError::AppNotFound(_) => e,
            other => {
                warn!("Launch of {} failed: {}", command, other);
                ComError::AppNotFound(command.clone())
            }
        })?;

        for attempt in 1..=self.poll_attempts {
            if !self.waiter.wait(self.poll_interval) {
                info!("Wait for local server of {} cancelled", clsid);
                return Err(ComError::Cancelled);
            }
            if let Some(object) = self.exporter.try_import(clsid, iid)? {
                debug!("Local server for {} registered after {} polls", clsid, attempt);
                return Ok(object);
            }
            trace!("Local server for {} not registered yet ({}/{})", clsid, attempt, self.poll_attempts);
        }

        warn!("Local server for {} did not register after {} polls", clsid, self.poll_attempts);
        Err(ComError::AppDidNotRegister {
            clsid: *clsid,
            attempts: self.poll_attempts,
        })
    }
}
