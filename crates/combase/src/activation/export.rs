//! Class object export table
//!
//! A local server makes its class objects reachable from other processes by
//! exporting them. Activation polls the same table after launching a server.

use std::collections::HashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};
use crate::object::ComPtr;
use crate::types::{ClsCtx, Clsid, Iid, Result};

/// Advertises class objects to out-of-process activation
pub trait ClassExporter: Send + Sync {
    /// Advertise `factory` as the class object for `clsid` in `context`
    fn export(&self, clsid: &Clsid, context: ClsCtx, factory: ComPtr) -> Result<()>;

    /// Stop advertising `clsid`
    fn unexport(&self, clsid: &Clsid, context: ClsCtx);

    /// The advertised class object for `clsid` as `iid`, or `None` if nothing
    /// is currently exported
    fn try_import(&self, clsid: &Clsid, iid: &Iid) -> Result<Option<ComPtr>>;
}

/// In-process export table
///
/// Only registrations whose context includes [`ClsCtx::LOCAL_SERVER`] are
/// advertised. The table holds one ownership reference per export.
pub struct LocalExportTable {
    exports: RwLock<HashMap<Clsid, ComPtr>>,
}

impl LocalExportTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            exports: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `clsid` is currently advertised
    pub fn is_exported(&self, clsid: &Clsid) -> bool {
        self.exports.read().contains_key(clsid)
    }

    /// Number of advertised classes
    pub fn len(&self) -> usize {
        self.exports.read().len()
    }

    /// Whether nothing is advertised
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalExportTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassExporter for LocalExportTable {
    fn export(&self, clsid: &Clsid, context: ClsCtx, factory: ComPtr) -> Result<()> {
        if !context.contains(ClsCtx::LOCAL_SERVER) {
            trace!("Class {} not exported for {:?}", clsid, context);
            return Ok(());
        }

        factory.add_ref();
        if let Some(previous) = self.exports.write().insert(*clsid, factory) {
            previous.release();
        }
        debug!("Exported class {}", clsid);
        Ok(())
    }

    fn unexport(&self, clsid: &Clsid, context: ClsCtx) {
        if !context.contains(ClsCtx::LOCAL_SERVER) {
            return;
        }
        if let Some(factory) = self.exports.write().remove(clsid) {
            factory.release();
            debug!("Unexported class {}", clsid);
        }
    }

    fn try_import(&self, clsid: &Clsid, iid: &Iid) -> Result<Option<ComPtr>> {
        let factory = self.exports.read().get(clsid).cloned();
        match factory {
            Some(factory) => factory.query_interface(iid).map(Some),
            None => Ok(None),
        }
    }
}
