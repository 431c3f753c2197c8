//! Identifier types
//!
//! - GUID: component (CLSID) and interface (IID) identity
//! - OXID: apartment (object exporter) identity
//! - Registration tokens returned by class registration

use bytes::{Buf, BufMut};
use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use super::error::{ComError, Result};

/// Globally unique identifier (16 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid(pub uuid::Uuid);

/// Component implementation identifier
pub type Clsid = Guid;

/// Interface identifier
pub type Iid = Guid;

impl Guid {
    /// Size of a GUID in bytes
    pub const SIZE: usize = 16;

    /// The nil GUID
    pub const NIL: Self = Self(uuid::Uuid::nil());

    /// Build from the numeric value
    pub const fn from_u128(value: u128) -> Self {
        Self(uuid::Uuid::from_u128(value))
    }

    /// Build from the classic field layout
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Self {
        Self(uuid::Uuid::from_fields(d1, d2, d3, &d4))
    }

    /// Generate a random v4 GUID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Check if this is the nil GUID
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Encode in wire layout (first three fields little-endian)
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let (d1, d2, d3, d4) = self.0.as_fields();
        buf.put_u32_le(d1);
        buf.put_u16_le(d2);
        buf.put_u16_le(d3);
        buf.put_slice(d4);
    }

    /// Decode from wire layout
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(ComError::BufferUnderflow {
                needed: Self::SIZE,
                have: buf.remaining(),
            });
        }
        let d1 = buf.get_u32_le();
        let d2 = buf.get_u16_le();
        let d3 = buf.get_u16_le();
        let mut d4 = [0u8; 8];
        buf.copy_to_slice(&mut d4);
        Ok(Self::from_fields(d1, d2, d3, d4))
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self.0)
    }
}

/// Registry form: `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}` in upper case
impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = uuid::Uuid::encode_buffer();
        write!(f, "{{{}}}", self.0.hyphenated().encode_upper(&mut buf))
    }
}

impl FromStr for Guid {
    type Err = ComError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
        uuid::Uuid::parse_str(trimmed)
            .map(Self)
            .map_err(|e| ComError::InvalidArgument(format!("bad GUID {s:?}: {e}")))
    }
}

/// Apartment (object exporter) identifier
///
/// Upper half is the process id. Single-threaded apartments use the owning
/// thread's ordinal as the lower half; the shared multithreaded apartment
/// uses a fixed marker.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Oxid(pub u64);

impl Oxid {
    /// Lower half used by the multithreaded apartment
    pub const MTA_MARKER: u32 = 0xcafe;

    /// Create a new OXID
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// OXID of a single-threaded apartment owned by `thread`
    pub fn for_sta(thread: u32) -> Self {
        Self(((std::process::id() as u64) << 32) | thread as u64)
    }

    /// OXID of the process-wide multithreaded apartment
    pub fn for_mta() -> Self {
        Self(((std::process::id() as u64) << 32) | Self::MTA_MARKER as u64)
    }

    /// Process id half
    pub fn process_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Oxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OXID({:016x})", self.0)
    }
}

impl fmt::Display for Oxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Token identifying one class registration until it is revoked
///
/// Tokens come from a monotonically increasing counter and are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationToken(pub u64);

impl RegistrationToken {
    /// Create a token from its raw value
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_THREAD_ORDINAL: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ORDINAL: Cell<u32> = const { Cell::new(0) };
}

/// Small non-zero number unique to the calling thread for the process lifetime
pub fn current_thread_ordinal() -> u32 {
    THREAD_ORDINAL.with(|slot| {
        if slot.get() == 0 {
            slot.set(NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed));
        }
        slot.get()
    })
}
