//! Explicitly registered class objects
//!
//! Each entry holds a table-strong marshaled snapshot of the registered
//! factory rather than the pointer itself, so a live reference can be
//! recovered on demand from any apartment. Marshaling, unmarshaling and the
//! export notifications all run outside the table lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use crate::activation::ClassExporter;
use crate::marshal::{MarshalContext, MarshalSnapshot, Marshaler};
use crate::object::ComPtr;
use crate::types::{iid, ClsCtx, Clsid, ComError, RegCls, RegistrationToken, Result};

/// One registered class object
#[derive(Clone, Debug)]
pub struct RegisteredClass {
    /// Component identifier
    pub clsid: Clsid,
    /// Contexts the registration serves
    pub context: ClsCtx,
    /// Connection flags
    pub flags: RegCls,
    /// Revocation token
    pub token: RegistrationToken,
    /// Marshaled factory
    snapshot: MarshalSnapshot,
}

#[derive(Default)]
struct ClassTable {
    /// Entries in registration order (tokens only grow)
    entries: BTreeMap<RegistrationToken, RegisteredClass>,
    by_clsid: HashMap<Clsid, RegistrationToken>,
}

/// Table of registered class objects
pub struct ClassRegistry {
    marshaler: Arc<dyn Marshaler>,
    exporter: Arc<dyn ClassExporter>,
    table: Mutex<ClassTable>,
    next_token: AtomicU64,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new(marshaler: Arc<dyn Marshaler>, exporter: Arc<dyn ClassExporter>) -> Self {
        Self {
            marshaler,
            exporter,
            table: Mutex::new(ClassTable::default()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register `factory` as the class object for `clsid`
    ///
    /// Concurrent registrations of one CLSID resolve first-registrant-wins:
    /// the loser's snapshot is released and it gets `ObjectAlreadyRegistered`.
    pub fn register(
        &self,
        clsid: Clsid,
        factory: &ComPtr,
        context: ClsCtx,
        flags: RegCls,
    ) -> Result<RegistrationToken> {
        if context.is_empty() {
            return Err(ComError::InvalidArgument("empty run context".to_string()));
        }
        if self.contains(&clsid) {
            warn!("Class {} is already registered", clsid);
            return Err(ComError::ObjectAlreadyRegistered(clsid));
        }

        let marshal_context = if context.intersects(ClsCtx::LOCAL_SERVER | ClsCtx::REMOTE_SERVER) {
            MarshalContext::Local
        } else {
            MarshalContext::InProcess
        };
        let snapshot = MarshalSnapshot::capture(
            self.marshaler.as_ref(),
            &iid::IUNKNOWN,
            factory,
            marshal_context,
        )?;

        let token = RegistrationToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
        let entry = RegisteredClass {
            clsid,
            context,
            flags,
            token,
            snapshot,
        };

        if let Err(e) = self.insert(entry.clone()) {
            self.discard_snapshot(entry.snapshot);
            return Err(e);
        }

        if let Err(e) = self.exporter.export(&clsid, context, factory.clone()) {
            warn!("Export of {} failed, rolling back registration: {}", clsid, e);
            if let Some(entry) = self.remove(token) {
                self.discard_snapshot(entry.snapshot);
            }
            return Err(e);
        }

        debug!("Registered class {} ({:?}) as {}", clsid, context, token);
        Ok(token)
    }

    fn insert(&self, entry: RegisteredClass) -> Result<()> {
        let mut table = self.table.lock();
        if table.by_clsid.contains_key(&entry.clsid) {
            warn!("Class {} registered concurrently; keeping the first", entry.clsid);
            return Err(ComError::ObjectAlreadyRegistered(entry.clsid));
        }
        table
            .by_clsid
            .try_reserve(1)
            .map_err(|_| ComError::OutOfMemory)?;

        table.by_clsid.insert(entry.clsid, entry.token);
        table.entries.insert(entry.token, entry);
        Ok(())
    }

    fn remove(&self, token: RegistrationToken) -> Option<RegisteredClass> {
        let mut table = self.table.lock();
        let entry = table.entries.remove(&token)?;
        table.by_clsid.remove(&entry.clsid);
        Some(entry)
    }

    fn discard_snapshot(&self, snapshot: MarshalSnapshot) {
        if let Err(e) = snapshot.release(self.marshaler.as_ref()) {
            error!("Failed to release marshaled class object: {}", e);
        }
    }

    /// Revoke the registration identified by `token`
    pub fn revoke(&self, token: RegistrationToken) -> Result<()> {
        let entry = self.remove(token).ok_or_else(|| {
            warn!("Revoke of unknown registration {}", token);
            ComError::InvalidToken(token)
        })?;

        self.exporter.unexport(&entry.clsid, entry.context);
        self.discard_snapshot(entry.snapshot);
        debug!("Revoked class {} ({})", entry.clsid, token);
        Ok(())
    }

    /// Recover a live reference to the class object registered for `clsid`
    ///
    /// The registration is not consumed. `Ok(None)` when nothing is registered,
    /// including when a concurrent revoke wins the race.
    pub fn lookup(&self, clsid: &Clsid) -> Result<Option<ComPtr>> {
        let snapshot = {
            let table = self.table.lock();
            let Some(token) = table.by_clsid.get(clsid) else {
                return Ok(None);
            };
            match table.entries.get(token) {
                Some(entry) => entry.snapshot.clone(),
                None => return Ok(None),
            }
        };

        match snapshot.unmarshal(self.marshaler.as_ref()) {
            Ok(object) => Ok(Some(object)),
            // Revoked between the copy and the unmarshal
            Err(ComError::Disconnected(reason)) => {
                debug!("Registration of {} went away during lookup: {}", clsid, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Revoke every registration, oldest first
    pub fn revoke_all(&self) -> usize {
        let mut revoked = 0;
        loop {
            let head = self.table.lock().entries.keys().next().copied();
            let Some(token) = head else {
                break;
            };
            // A concurrent revoke may win the race for this token; just move on
            if self.revoke(token).is_ok() {
                revoked += 1;
            }
        }
        revoked
    }

    /// Whether `clsid` has a live registration
    pub fn contains(&self, clsid: &Clsid) -> bool {
        self.table.lock().by_clsid.contains_key(clsid)
    }

    /// Registration details for `token`
    pub fn get(&self, token: RegistrationToken) -> Option<RegisteredClass> {
        self.table.lock().entries.get(&token).cloned()
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether no class is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
