//! Interface marshaling
//!
//! The broker never interprets marshaled bytes itself; it hands a stream to a
//! [`Marshaler`] and later asks the same marshaler to turn the bytes back into
//! a live pointer. Class registrations keep such a stream as a table-strong
//! [`MarshalSnapshot`] so the factory can be recovered any number of times.

mod inproc;
mod objref;

pub use inproc::*;
pub use objref::*;

use bytes::{Bytes, BytesMut};
use crate::object::ComPtr;
use crate::types::{ComError, Iid, Result};

/// How a marshaled reference may be consumed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MarshalFlags {
    /// Unmarshaled exactly once
    Normal = 0,
    /// Unmarshaled any number of times, keeps the object alive
    TableStrong = 1,
    /// Unmarshaled any number of times, does not keep the object alive
    TableWeak = 2,
}

impl MarshalFlags {
    /// Parse the wire value
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MarshalFlags::Normal),
            1 => Ok(MarshalFlags::TableStrong),
            2 => Ok(MarshalFlags::TableWeak),
            other => Err(ComError::InvalidData(format!("unknown marshal flags {}", other))),
        }
    }
}

/// Destination of a marshaled reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarshalContext {
    /// Another apartment in this process
    InProcess,
    /// Another process on this machine
    Local,
    /// Another machine
    DifferentMachine,
}

/// Codec between live pointers and scoped byte streams
pub trait Marshaler: Send + Sync {
    /// Write a reference to `object` (as `iid`) into `stream`
    fn marshal_interface(
        &self,
        stream: &mut BytesMut,
        iid: &Iid,
        object: &ComPtr,
        context: MarshalContext,
        flags: MarshalFlags,
    ) -> Result<()>;

    /// Read a reference from `stream` and return a live pointer for `iid`
    fn unmarshal_interface(&self, stream: &mut Bytes, iid: &Iid) -> Result<ComPtr>;

    /// Free whatever the marshaled reference in `stream` holds
    fn release_marshal_data(&self, stream: &mut Bytes) -> Result<()>;
}

/// Immutable marshaled form of a pointer
///
/// Every call to [`reader`](Self::reader) starts at the beginning of the data,
/// which is what "rewinding" the stream means here.
#[derive(Clone, Debug)]
pub struct MarshalSnapshot {
    iid: Iid,
    data: Bytes,
}

impl MarshalSnapshot {
    /// Marshal `object` table-strong into a fresh snapshot
    pub fn capture(
        marshaler: &dyn Marshaler,
        iid: &Iid,
        object: &ComPtr,
        context: MarshalContext,
    ) -> Result<Self> {
        let mut stream = BytesMut::with_capacity(ObjRefRecord::SIZE);
        marshaler.marshal_interface(&mut stream, iid, object, context, MarshalFlags::TableStrong)?;
        Ok(Self {
            iid: *iid,
            data: stream.freeze(),
        })
    }

    /// Interface the snapshot was taken for
    pub fn iid(&self) -> &Iid {
        &self.iid
    }

    /// A rewound view of the data
    pub fn reader(&self) -> Bytes {
        self.data.clone()
    }

    /// Recover a live pointer without consuming the snapshot
    pub fn unmarshal(&self, marshaler: &dyn Marshaler) -> Result<ComPtr> {
        marshaler.unmarshal_interface(&mut self.reader(), &self.iid)
    }

    /// Release the table entry behind the snapshot
    pub fn release(self, marshaler: &dyn Marshaler) -> Result<()> {
        marshaler.release_marshal_data(&mut self.reader())
    }
}
