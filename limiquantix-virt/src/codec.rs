//! Fixed-capacity buffer marshalling.
//!
//! Several native calls write their results into a caller-supplied array
//! instead of allocating one: the caller passes the capacity in, the native
//! layer returns how many slots it filled. This module owns both halves of
//! that exchange so callers never do pointer arithmetic themselves.
//!
//! Decoding reads exactly the first `count` slots and ignores the rest. ID
//! slots are native `int`s read in the host's own width and byte order, so
//! no byte-level reinterpretation (and no endianness assumption) is
//! involved. String slots are separately allocated native strings: each one
//! is copied and then released exactly once, while the slot array itself is
//! ours and needs no release.
//!
//! A negative count means the native call failed; callers handle it through
//! the [`ErrorChannel`](crate::ErrorChannel) before touching the buffer.

use std::ffi::{c_char, c_int, CStr};
use std::ptr;

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::VirtError;
use crate::native::{NativeApi, NativeString};
use crate::types::DomainId;

/// Slots offered to every list call.
///
/// A host with more entries than this gets truncated to the first
/// `LIST_CAPACITY` the native layer reports. There is no size-then-fetch
/// round trip.
pub const LIST_CAPACITY: usize = 1024;

/// Size of a UUID string buffer including the terminating NUL
/// (`VIR_UUID_STRING_BUFLEN`).
pub const UUID_STRING_BUFLEN: usize = 37;

/// A native result that does not fit the buffer contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reported count {count} is outside buffer capacity {capacity}")]
    CountOutOfRange { count: c_int, capacity: usize },

    #[error("slot {slot} holds invalid domain id {value}")]
    InvalidId { slot: usize, value: c_int },

    #[error("slot {slot} holds a NULL string")]
    NullSlot { slot: usize },

    #[error("buffer is not NUL terminated")]
    Unterminated,

    #[error("invalid UUID string: {0}")]
    InvalidUuid(String),

    #[error("{what} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        what: &'static str,
        source: std::str::Utf8Error,
    },
}

impl From<DecodeError> for VirtError {
    fn from(e: DecodeError) -> Self {
        VirtError::InvalidResponse(e.to_string())
    }
}

/// Validate a reported count against the buffer capacity.
pub fn checked_count(count: c_int, capacity: usize) -> Result<usize, DecodeError> {
    match usize::try_from(count) {
        Ok(n) if n <= capacity => Ok(n),
        _ => Err(DecodeError::CountOutOfRange { count, capacity }),
    }
}

/// A slot count as the native `int` the list calls take.
pub fn capacity_arg(capacity: usize) -> c_int {
    c_int::try_from(capacity).unwrap_or(c_int::MAX)
}

fn note_if_full(count: usize, capacity: usize, what: &str) {
    if count == capacity {
        warn!(
            capacity,
            what,
            "List filled every slot; any further entries on the host were truncated"
        );
    }
}

// =============================================================================
// DOMAIN IDS
// =============================================================================

/// Buffer of native `int` slots for active domain IDs.
pub struct IdBuffer {
    slots: Vec<c_int>,
}

impl IdBuffer {
    /// A buffer with [`LIST_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(LIST_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The slot array handed to the native call.
    pub fn slots_mut(&mut self) -> &mut [c_int] {
        &mut self.slots
    }

    /// Decode the first `count` slots, in the order the native layer wrote them.
    pub fn decode(&self, count: c_int) -> Result<Vec<DomainId>, DecodeError> {
        let count = checked_count(count, self.slots.len())?;
        note_if_full(count, self.slots.len(), "domain ids");

        self.slots[..count]
            .iter()
            .enumerate()
            .map(|(slot, &value)| {
                u32::try_from(value)
                    .map(DomainId)
                    .map_err(|_| DecodeError::InvalidId { slot, value })
            })
            .collect()
    }
}

impl Default for IdBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// DOMAIN NAMES
// =============================================================================

/// Buffer of native string slots for defined domain names.
///
/// Every slot starts out NULL. After a successful call the first `count`
/// slots own one native string each; [`NameBuffer::decode`] copies and
/// releases them.
pub struct NameBuffer {
    slots: Vec<*mut c_char>,
}

impl NameBuffer {
    /// A buffer with [`LIST_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(LIST_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![ptr::null_mut(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slots_mut(&mut self) -> &mut [*mut c_char] {
        &mut self.slots
    }

    /// Copy out and release the first `count` strings.
    ///
    /// Every string the native layer handed over is released exactly once,
    /// including when decoding fails part-way.
    pub fn decode<N: NativeApi>(mut self, count: c_int, api: &N) -> Result<Vec<String>, DecodeError> {
        let capacity = self.slots.len();
        let taken = match checked_count(count, capacity) {
            Ok(n) => n,
            Err(e) => {
                // The count is unusable, but whatever was written is still ours.
                drop(self.take_slots(api, capacity));
                return Err(e);
            }
        };
        note_if_full(taken, capacity, "defined domain names");

        let owned = self.take_slots(api, taken);
        let mut names = Vec::with_capacity(taken);
        for (slot, entry) in owned.iter().enumerate() {
            match entry {
                Some(s) => names.push(s.decode("domain name")?),
                None => return Err(DecodeError::NullSlot { slot }),
            }
        }
        Ok(names)
    }

    /// Move the first `n` slots into release guards, leaving NULL behind.
    fn take_slots<'a, N: NativeApi>(&mut self, api: &'a N, n: usize) -> Vec<Option<NativeString<'a, N>>> {
        self.slots[..n]
            .iter_mut()
            .map(|slot| {
                let p = std::mem::replace(slot, ptr::null_mut());
                // SAFETY: a non-NULL slot was written by the native layer and
                // handed to us; replacing it with NULL keeps it from being
                // taken twice.
                unsafe { NativeString::from_owned(api, p) }
            })
            .collect()
    }
}

impl Default for NameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// FIXED STRINGS
// =============================================================================

/// Buffer for a UUID rendered as a string by the native layer.
pub struct UuidBuffer {
    bytes: [c_char; UUID_STRING_BUFLEN],
}

impl UuidBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0; UUID_STRING_BUFLEN],
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [c_char] {
        &mut self.bytes
    }

    pub fn decode(&self) -> Result<Uuid, DecodeError> {
        let text = terminated_str(&self.bytes)?;
        Uuid::parse_str(&text).map_err(|e| DecodeError::InvalidUuid(format!("{}: {}", text, e)))
    }
}

impl Default for UuidBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn as_bytes(buf: &[c_char]) -> &[u8] {
    // SAFETY: c_char and u8 have the same size and alignment.
    unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), buf.len()) }
}

/// Copy a native string, rejecting bytes that are not UTF-8.
pub fn decode_cstr(what: &'static str, s: &CStr) -> Result<String, DecodeError> {
    s.to_str()
        .map(str::to_owned)
        .map_err(|source| DecodeError::InvalidUtf8 { what, source })
}

/// Read a NUL-terminated string that must fit inside `buf`.
fn terminated_str(buf: &[c_char]) -> Result<String, DecodeError> {
    let s = CStr::from_bytes_until_nul(as_bytes(buf)).map_err(|_| DecodeError::Unterminated)?;
    decode_cstr("uuid", s)
}

/// Read a NUL-padded fixed-width text field.
///
/// The field may use its full width with no terminator. Truncation can cut
/// a multi-byte character, so invalid bytes are replaced rather than
/// rejected.
pub fn decode_fixed_str(buf: &[c_char]) -> String {
    let bytes = as_bytes(buf);
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Write `value` into a fixed-width field, truncating and NUL padding.
///
/// Keeps one byte for the terminator.
pub(crate) fn encode_fixed_str(value: &str, buf: &mut [c_char]) {
    buf.fill(0);
    let max = buf.len().saturating_sub(1);
    for (dst, &src) in buf.iter_mut().zip(value.as_bytes().iter().take(max)) {
        *dst = src as c_char;
    }
}
