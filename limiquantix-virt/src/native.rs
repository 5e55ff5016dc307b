//! The native management API seam.
//!
//! [`NativeApi`] lists every native call the core makes. It mirrors the
//! libvirt C API closely: results come back as handles, NULL pointers and
//! `-1` return codes, and error details are left in a per-thread slot that
//! [`ErrorChannel`](crate::ErrorChannel) drains.
//!
//! Two kinds of strings cross this boundary:
//!
//! | Call | Ownership |
//! |------|-----------|
//! | `get_capabilities`, `get_hostname`, `list_defined_domains` slots | owned by the caller, released once with `free_string` |
//! | `domain_get_name` | borrowed from the domain handle, never released |
//!
//! [`NativeString`] and [`borrowed_cstr`] encode the two policies so call
//! sites cannot mix them up.

use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::ptr::NonNull;

use crate::codec::{decode_cstr, DecodeError};
use crate::error::{ErrorRecord, Result, VirtError};

/// Length of the fixed CPU model field in [`RawNodeInfo`].
pub const NODE_MODEL_LEN: usize = 32;

/// Fixed-layout node information as filled in by the native layer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawNodeInfo {
    /// CPU model, NUL padded
    pub model: [c_char; NODE_MODEL_LEN],
    /// Memory size in KiB
    pub memory: u64,
    /// Number of active CPUs
    pub cpus: c_uint,
    /// Expected CPU frequency in MHz
    pub mhz: c_uint,
    /// Number of NUMA cells
    pub nodes: c_uint,
    /// Sockets per NUMA cell
    pub sockets: c_uint,
    /// Cores per socket
    pub cores: c_uint,
    /// Threads per core
    pub threads: c_uint,
}

impl Default for RawNodeInfo {
    fn default() -> Self {
        Self {
            model: [0; NODE_MODEL_LEN],
            memory: 0,
            cpus: 0,
            mhz: 0,
            nodes: 0,
            sockets: 0,
            cores: 0,
            threads: 0,
        }
    }
}

/// The native hypervisor-management API.
///
/// Handles are opaque: the core never looks inside them, only hands them
/// back. Every fallible call signals failure through its return value
/// (`None`, a NULL pointer or a negative count) and records details in the
/// calling thread's error slot.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - every non-NULL pointer returned by `get_capabilities`, `get_hostname`
///   and written into the `list_defined_domains` buffer is a NUL-terminated
///   string that the caller owns and may pass to `free_string` exactly once;
/// - the pointer returned by `domain_get_name` is a NUL-terminated string
///   that stays valid while the domain handle is alive and is never passed
///   to `free_string`;
/// - list calls write at most `buffer.len()` slots and return either a
///   negative value or the number of slots written;
/// - `domain_get_uuid` writes a NUL-terminated string into `buf` on success.
///
/// # Releasing handles
///
/// `close`, `domain_free` and `snapshot_free` take their handle by value,
/// and handles are neither `Clone` nor `Copy`. A released handle can no
/// longer be named, so safe code cannot use or release it a second time:
///
/// ```compile_fail
/// use std::ffi::CString;
/// use limiquantix_virt::{MockNative, NativeApi};
///
/// let api = MockNative::new();
/// let session = api.open(&CString::new("test:///default").unwrap()).unwrap();
/// api.close(session);
/// api.get_hostname(&session);
/// ```
///
/// ```compile_fail
/// use std::ffi::CString;
/// use limiquantix_virt::{MockNative, NativeApi};
///
/// let api = MockNative::new();
/// api.add_domain("web-01", true);
/// let session = api.open(&CString::new("test:///default").unwrap()).unwrap();
/// let domain = api
///     .lookup_domain_by_name(&session, &CString::new("web-01").unwrap())
///     .unwrap();
/// api.domain_free(domain);
/// api.domain_free(domain);
/// ```
pub unsafe trait NativeApi: Send + Sync {
    /// Open session handle.
    type Session: Send;
    /// Domain handle.
    type Domain;
    /// Snapshot handle.
    type Snapshot;

    fn open(&self, uri: &CStr) -> Option<Self::Session>;
    /// Close a session, consuming the handle.
    fn close(&self, session: Self::Session) -> c_int;

    fn get_capabilities(&self, session: &Self::Session) -> *mut c_char;
    fn get_hostname(&self, session: &Self::Session) -> *mut c_char;
    fn get_node_info(&self, session: &Self::Session, info: &mut RawNodeInfo) -> c_int;

    fn list_domains(&self, session: &Self::Session, ids: &mut [c_int]) -> c_int;
    fn list_defined_domains(&self, session: &Self::Session, names: &mut [*mut c_char]) -> c_int;

    fn lookup_domain_by_id(&self, session: &Self::Session, id: c_int) -> Option<Self::Domain>;
    fn lookup_domain_by_name(&self, session: &Self::Session, name: &CStr) -> Option<Self::Domain>;
    fn lookup_domain_by_uuid(&self, session: &Self::Session, uuid: &CStr) -> Option<Self::Domain>;

    /// Restore a domain from a saved state image.
    fn domain_restore(&self, session: &Self::Session, path: &CStr) -> c_int;

    fn domain_get_name(&self, domain: &Self::Domain) -> *const c_char;
    fn domain_get_uuid(&self, domain: &Self::Domain, buf: &mut [c_char]) -> c_int;
    fn domain_snapshot_create_xml(
        &self,
        domain: &Self::Domain,
        xml: &CStr,
        flags: c_uint,
    ) -> Option<Self::Snapshot>;
    fn domain_save(&self, domain: &Self::Domain, path: &CStr) -> c_int;
    fn domain_save_flags(
        &self,
        domain: &Self::Domain,
        path: &CStr,
        dxml: Option<&CStr>,
        flags: c_uint,
    ) -> c_int;

    /// Release a domain reference.
    fn domain_free(&self, domain: Self::Domain);
    /// Release a snapshot reference.
    fn snapshot_free(&self, snapshot: Self::Snapshot);

    /// Release a string handed over by the native layer.
    ///
    /// # Safety
    ///
    /// `s` must come from one of the owned-string calls and must not have
    /// been released before.
    unsafe fn free_string(&self, s: *mut c_char);

    /// Read the calling thread's last error, if any.
    fn last_error(&self) -> Option<ErrorRecord>;
    /// Clear the calling thread's error slot.
    fn reset_error(&self);
}

/// A string owned by the caller, released exactly once on drop.
pub(crate) struct NativeString<'a, N: NativeApi> {
    api: &'a N,
    ptr: NonNull<c_char>,
}

impl<'a, N: NativeApi> NativeString<'a, N> {
    /// Take ownership of `ptr`. Returns `None` for NULL.
    ///
    /// # Safety
    ///
    /// `ptr` must be NULL or an owned string from `api` that nobody else
    /// will release.
    pub(crate) unsafe fn from_owned(api: &'a N, ptr: *mut c_char) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { api, ptr })
    }

    pub(crate) fn as_cstr(&self) -> &CStr {
        // SAFETY: the NativeApi contract guarantees a NUL-terminated string
        // that lives until we release it in Drop.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Copy the string out. `what` names it in the error.
    pub(crate) fn decode(&self, what: &'static str) -> std::result::Result<String, DecodeError> {
        decode_cstr(what, self.as_cstr())
    }
}

impl<N: NativeApi> Drop for NativeString<'_, N> {
    fn drop(&mut self) {
        // SAFETY: we took sole ownership in from_owned and drop runs once.
        unsafe { self.api.free_string(self.ptr.as_ptr()) }
    }
}

/// View a string borrowed from a native handle. Returns `None` for NULL.
///
/// # Safety
///
/// `ptr` must be NULL or a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn borrowed_cstr<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr))
    }
}

/// Marshal a Rust string argument for the native layer.
pub(crate) fn to_cstring(what: &str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|e| {
        VirtError::InvalidArgument(format!(
            "{} contains a NUL byte at position {}",
            what,
            e.nul_position()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_cstring_rejects_interior_nul() {
        assert!(to_cstring("path", "/var/lib/save.img").is_ok());

        let err = to_cstring("path", "/var/\0lib").unwrap_err();
        assert!(matches!(err, VirtError::InvalidArgument(ref m) if m.contains("position 5")));
    }

    #[test]
    fn test_borrowed_null_is_none() {
        assert!(unsafe { borrowed_cstr(std::ptr::null()) }.is_none());

        let owned = CString::new("web-01").unwrap();
        let view = unsafe { borrowed_cstr(owned.as_ptr()) }.unwrap();
        assert_eq!(view.to_str().unwrap(), "web-01");
    }
}
