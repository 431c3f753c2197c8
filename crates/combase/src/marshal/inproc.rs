//! In-process marshaler
//!
//! Keeps marshaled objects in a handle table and writes only the handle into
//! the stream. Good enough for every apartment of one process, which is all
//! the broker itself ever needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::trace;
use crate::object::ComPtr;
use crate::types::{ComError, Iid, Result};
use super::{MarshalContext, MarshalFlags, Marshaler, ObjRefRecord};

struct TableEntry {
    object: ComPtr,
    flags: MarshalFlags,
}

/// Handle-table marshaler for same-process references
pub struct InProcMarshaler {
    table: Mutex<HashMap<u64, TableEntry>>,
    next_handle: AtomicU64,
}

impl InProcMarshaler {
    /// Create an empty marshaler
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Number of outstanding marshaled references
    pub fn outstanding(&self) -> usize {
        self.table.lock().len()
    }
}

impl Default for InProcMarshaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaler for InProcMarshaler {
    fn marshal_interface(
        &self,
        stream: &mut BytesMut,
        iid: &Iid,
        object: &ComPtr,
        context: MarshalContext,
        flags: MarshalFlags,
    ) -> Result<()> {
        if context == MarshalContext::DifferentMachine {
            return Err(ComError::InvalidArgument(
                "in-process marshaler cannot target another machine".to_string(),
            ));
        }

        // Validate the interface before handing out a reference to it
        let object = object.clone().query_interface(iid)?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        if flags != MarshalFlags::TableWeak {
            object.add_ref();
        }
        self.table.lock().insert(handle, TableEntry { object, flags });

        ObjRefRecord::new(flags, *iid, handle).encode(stream);
        trace!("Marshaled {} as handle {} ({:?})", iid, handle, flags);
        Ok(())
    }

    fn unmarshal_interface(&self, stream: &mut Bytes, iid: &Iid) -> Result<ComPtr> {
        let record = ObjRefRecord::decode(stream)?;

        let object = {
            let mut table = self.table.lock();
            match record.flags {
                MarshalFlags::Normal => table.remove(&record.handle).map(|entry| {
                    entry.object.release();
                    entry.object
                }),
                _ => table.get(&record.handle).map(|entry| entry.object.clone()),
            }
        };

        let object = object.ok_or_else(|| {
            ComError::Disconnected(format!("marshal handle {} not found", record.handle))
        })?;
        object.query_interface(iid)
    }

    fn release_marshal_data(&self, stream: &mut Bytes) -> Result<()> {
        let record = ObjRefRecord::decode(stream)?;
        let entry = self
            .table
            .lock()
            .remove(&record.handle)
            .ok_or_else(|| {
                ComError::Disconnected(format!("marshal handle {} not found", record.handle))
            })?;

        if entry.flags != MarshalFlags::TableWeak {
            entry.object.release();
        }
        trace!("Released marshal handle {}", record.handle);
        Ok(())
    }
}
