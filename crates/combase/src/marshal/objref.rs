//! Object reference record
//!
//! The byte form written into a marshal stream by [`InProcMarshaler`](super::InProcMarshaler):
//!
//! ```text
//! +-----------+-----------+----------------+------------+
//! | signature | flags     | IID            | handle     |
//! | u32 LE    | u32 LE    | 16 bytes       | u64 LE     |
//! +-----------+-----------+----------------+------------+
//! ```

use bytes::{Buf, BufMut};
use crate::types::{ComError, Iid, Result, Guid};
use super::MarshalFlags;

/// OBJREF signature ("MEOW" in little-endian)
pub const OBJREF_SIGNATURE: u32 = 0x574F454D;

/// Marshaled reference to an entry in a marshaler's object table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjRefRecord {
    /// How the reference may be consumed
    pub flags: MarshalFlags,
    /// Interface the reference was marshaled for
    pub iid: Iid,
    /// Slot in the marshaler's table
    pub handle: u64,
}

impl ObjRefRecord {
    /// Encoded size in bytes
    pub const SIZE: usize = 4 + 4 + Guid::SIZE + 8;

    /// Create a new record
    pub fn new(flags: MarshalFlags, iid: Iid, handle: u64) -> Self {
        Self { flags, iid, handle }
    }

    /// Encode to buffer
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(OBJREF_SIGNATURE);
        buf.put_u32_le(self.flags as u32);
        self.iid.encode(buf);
        buf.put_u64_le(self.handle);
    }

    /// Decode from buffer
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(ComError::BufferUnderflow {
                needed: Self::SIZE,
                have: buf.remaining(),
            });
        }

        let signature = buf.get_u32_le();
        if signature != OBJREF_SIGNATURE {
            return Err(ComError::InvalidData(format!(
                "invalid OBJREF signature: 0x{:08x}",
                signature
            )));
        }

        let flags = MarshalFlags::from_u32(buf.get_u32_le())?;
        let iid = Guid::decode(buf)?;
        let handle = buf.get_u64_le();

        Ok(Self { flags, iid, handle })
    }
}
