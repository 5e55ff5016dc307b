//! Libvirt native layer implementation.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::Arc;

use virt::sys;

use crate::codec::{capacity_arg, UUID_STRING_BUFLEN};
use crate::connection::Connection;
use crate::error::{ErrorRecord, Result};
use crate::native::{NativeApi, RawNodeInfo};

/// Open libvirt connection pointer.
#[derive(Debug)]
pub struct ConnectPtr(sys::virConnectPtr);

// SAFETY: libvirt connection objects are thread safe; only the error slot
// is per thread, and Connection keeps that on one thread at a time.
unsafe impl Send for ConnectPtr {}

/// Libvirt domain pointer.
#[derive(Debug)]
pub struct DomainPtr(sys::virDomainPtr);

/// Libvirt snapshot pointer.
#[derive(Debug)]
pub struct SnapshotPtr(sys::virDomainSnapshotPtr);

fn non_null<T>(p: *mut T) -> Option<*mut T> {
    if p.is_null() {
        None
    } else {
        Some(p)
    }
}

/// The libvirt C API.
///
/// A zero-sized binding: all state lives inside libvirt. Errors are read
/// from libvirt's thread-local error slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct Libvirt;

impl Libvirt {
    /// Open a libvirt connection to `uri`.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    pub fn connect(uri: &str) -> Result<Connection<Libvirt>> {
        Connection::open(Arc::new(Libvirt), uri)
    }
}

// SAFETY: every method forwards to the libvirt function of the same
// contract; libvirt documents the ownership of each returned string.
unsafe impl NativeApi for Libvirt {
    type Session = ConnectPtr;
    type Domain = DomainPtr;
    type Snapshot = SnapshotPtr;

    fn open(&self, uri: &CStr) -> Option<ConnectPtr> {
        non_null(unsafe { sys::virConnectOpen(uri.as_ptr()) }).map(ConnectPtr)
    }

    fn close(&self, session: ConnectPtr) -> c_int {
        unsafe { sys::virConnectClose(session.0) }
    }

    fn get_capabilities(&self, session: &ConnectPtr) -> *mut c_char {
        unsafe { sys::virConnectGetCapabilities(session.0) }
    }

    fn get_hostname(&self, session: &ConnectPtr) -> *mut c_char {
        unsafe { sys::virConnectGetHostname(session.0) }
    }

    fn get_node_info(&self, session: &ConnectPtr, info: &mut RawNodeInfo) -> c_int {
        // SAFETY: virNodeInfo is plain data; all-zero is a valid value.
        let mut raw: sys::virNodeInfo = unsafe { MaybeUninit::zeroed().assume_init() };
        let rc = unsafe { sys::virNodeGetInfo(session.0, &mut raw) };
        if rc < 0 {
            return rc;
        }

        info.model = raw.model;
        info.memory = u64::from(raw.memory);
        info.cpus = raw.cpus;
        info.mhz = raw.mhz;
        info.nodes = raw.nodes;
        info.sockets = raw.sockets;
        info.cores = raw.cores;
        info.threads = raw.threads;
        rc
    }

    fn list_domains(&self, session: &ConnectPtr, ids: &mut [c_int]) -> c_int {
        unsafe { sys::virConnectListDomains(session.0, ids.as_mut_ptr(), capacity_arg(ids.len())) }
    }

    fn list_defined_domains(&self, session: &ConnectPtr, names: &mut [*mut c_char]) -> c_int {
        unsafe {
            sys::virConnectListDefinedDomains(session.0, names.as_mut_ptr(), capacity_arg(names.len()))
        }
    }

    fn lookup_domain_by_id(&self, session: &ConnectPtr, id: c_int) -> Option<DomainPtr> {
        non_null(unsafe { sys::virDomainLookupByID(session.0, id) }).map(DomainPtr)
    }

    fn lookup_domain_by_name(&self, session: &ConnectPtr, name: &CStr) -> Option<DomainPtr> {
        non_null(unsafe { sys::virDomainLookupByName(session.0, name.as_ptr()) }).map(DomainPtr)
    }

    fn lookup_domain_by_uuid(&self, session: &ConnectPtr, uuid: &CStr) -> Option<DomainPtr> {
        non_null(unsafe { sys::virDomainLookupByUUIDString(session.0, uuid.as_ptr()) }).map(DomainPtr)
    }

    fn domain_restore(&self, session: &ConnectPtr, path: &CStr) -> c_int {
        unsafe { sys::virDomainRestore(session.0, path.as_ptr()) }
    }

    fn domain_get_name(&self, domain: &DomainPtr) -> *const c_char {
        unsafe { sys::virDomainGetName(domain.0) }
    }

    fn domain_get_uuid(&self, domain: &DomainPtr, buf: &mut [c_char]) -> c_int {
        if buf.len() < UUID_STRING_BUFLEN {
            return -1;
        }
        unsafe { sys::virDomainGetUUIDString(domain.0, buf.as_mut_ptr()) }
    }

    fn domain_snapshot_create_xml(
        &self,
        domain: &DomainPtr,
        xml: &CStr,
        flags: c_uint,
    ) -> Option<SnapshotPtr> {
        non_null(unsafe { sys::virDomainSnapshotCreateXML(domain.0, xml.as_ptr(), flags) })
            .map(SnapshotPtr)
    }

    fn domain_save(&self, domain: &DomainPtr, path: &CStr) -> c_int {
        unsafe { sys::virDomainSave(domain.0, path.as_ptr()) }
    }

    fn domain_save_flags(
        &self,
        domain: &DomainPtr,
        path: &CStr,
        dxml: Option<&CStr>,
        flags: c_uint,
    ) -> c_int {
        let dxml = dxml.map_or(ptr::null(), CStr::as_ptr);
        unsafe { sys::virDomainSaveFlags(domain.0, path.as_ptr(), dxml, flags) }
    }

    fn domain_free(&self, domain: DomainPtr) {
        unsafe {
            sys::virDomainFree(domain.0);
        }
    }

    fn snapshot_free(&self, snapshot: SnapshotPtr) {
        unsafe {
            sys::virDomainSnapshotFree(snapshot.0);
        }
    }

    unsafe fn free_string(&self, s: *mut c_char) {
        libc::free(s.cast::<c_void>());
    }

    fn last_error(&self) -> Option<ErrorRecord> {
        let err = unsafe { sys::virGetLastError() };
        if err.is_null() {
            return None;
        }

        // SAFETY: virGetLastError returns the thread's live error object,
        // valid until the next reset on this thread.
        let err = unsafe { &*err };
        let message = if err.message.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(err.message) }
                .to_string_lossy()
                .into_owned()
        };

        Some(ErrorRecord::new(err.code, err.domain, message))
    }

    fn reset_error(&self) {
        unsafe { sys::virResetLastError() }
    }
}
