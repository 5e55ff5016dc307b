//! Connections to a hypervisor.

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::codec::{IdBuffer, NameBuffer};
use crate::config::VirtConfig;
use crate::domain::Domain;
use crate::error::{ErrorRecord, Result, VirtError};
use crate::error_channel::ErrorChannel;
use crate::native::{to_cstring, NativeApi, NativeString, RawNodeInfo};
use crate::types::{DomainId, NodeInfo};

/// An open session with a hypervisor.
///
/// A `Connection` only exists once the native open succeeded, and it
/// closes itself when dropped. Domains borrow it, so it cannot be closed
/// while any of them are alive.
///
/// # Threads
///
/// The native error slot is per thread and is not safe to interleave, so
/// a `Connection` is `Send` but not `Sync`: it can move to another thread,
/// but sharing one between threads requires wrapping it in a `Mutex`.
/// Alternatively, open one connection per thread.
pub struct Connection<N: NativeApi> {
    api: Arc<N>,
    session: ManuallyDrop<N::Session>,
    uri: String,
    closed: bool,
    _not_sync: PhantomData<Cell<()>>,
}

impl<N: NativeApi> Connection<N> {
    /// Open a connection to `uri`.
    ///
    /// The URI is passed through unchanged. Common forms:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    /// - `test:///default` - libvirt test driver
    #[instrument(skip(api))]
    pub fn open(api: Arc<N>, uri: &str) -> Result<Self> {
        info!("Connecting to hypervisor");

        let c_uri = to_cstring("uri", uri)?;
        let session = api.open(&c_uri).ok_or_else(|| VirtError::OpenFailed {
            uri: uri.to_string(),
            record: ErrorChannel::new(api.as_ref()).fetch_and_clear(),
        })?;

        info!("Connected to hypervisor");

        Ok(Self {
            api,
            session: ManuallyDrop::new(session),
            uri: uri.to_string(),
            closed: false,
            _not_sync: PhantomData,
        })
    }

    /// Open a connection to the URI selected by `config`.
    pub fn open_with_config(api: Arc<N>, config: &VirtConfig) -> Result<Self> {
        Self::open(api, &config.resolved_uri())
    }

    /// The URI this connection was opened with.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Close the connection.
    ///
    /// Errors are whatever the native layer reports; there is no retry.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        // SAFETY: `closed` is set, so Drop will not take the session again.
        let session = unsafe { ManuallyDrop::take(&mut self.session) };

        if self.api.close(session) < 0 {
            return Err(VirtError::CloseFailed(self.fetch_error()));
        }

        info!("Connection closed");
        Ok(())
    }

    pub(crate) fn api(&self) -> &N {
        &self.api
    }

    pub(crate) fn fetch_error(&self) -> ErrorRecord {
        ErrorChannel::new(self.api.as_ref()).fetch_and_clear()
    }

    // =========================================================================
    // Host queries
    // =========================================================================

    /// Get the host capabilities document (XML, passed through unparsed).
    ///
    /// A document that is not UTF-8 is an `InvalidResponse`.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn capabilities(&self) -> Result<String> {
        let raw = self.api.get_capabilities(&self.session);
        // SAFETY: get_capabilities hands over an owned string or NULL.
        let owned = unsafe { NativeString::from_owned(self.api.as_ref(), raw) }.ok_or_else(|| {
            VirtError::QueryFailed {
                what: "capabilities",
                record: self.fetch_error(),
            }
        })?;

        let caps = owned.decode("capabilities")?;
        debug!(len = caps.len(), "Fetched capabilities");
        Ok(caps)
    }

    /// Get the hypervisor host's name.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn hostname(&self) -> Result<String> {
        let raw = self.api.get_hostname(&self.session);
        // SAFETY: get_hostname hands over an owned string or NULL.
        let owned = unsafe { NativeString::from_owned(self.api.as_ref(), raw) }.ok_or_else(|| {
            VirtError::QueryFailed {
                what: "hostname",
                record: self.fetch_error(),
            }
        })?;

        let hostname = owned.decode("hostname")?;
        debug!(hostname = %hostname, "Fetched hostname");
        Ok(hostname)
    }

    /// Get host hardware information.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn node_info(&self) -> Result<NodeInfo> {
        let mut raw = RawNodeInfo::default();
        if self.api.get_node_info(&self.session, &mut raw) < 0 {
            return Err(VirtError::QueryFailed {
                what: "node info",
                record: self.fetch_error(),
            });
        }

        let info = NodeInfo::from(&raw);
        debug!(model = %info.model, cpus = info.cpus, memory_kib = info.memory_kib, "Fetched node info");
        Ok(info)
    }

    // =========================================================================
    // Domain enumeration
    // =========================================================================

    /// List the IDs of active domains, in the order the hypervisor reports them.
    ///
    /// At most [`LIST_CAPACITY`](crate::codec::LIST_CAPACITY) IDs are returned;
    /// a host running more domains is truncated.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn list_domains(&self) -> Result<Vec<DomainId>> {
        let mut buffer = IdBuffer::new();
        let count = self.api.list_domains(&self.session, buffer.slots_mut());
        if count < 0 {
            return Err(VirtError::ListFailed {
                what: "active domains",
                record: self.fetch_error(),
            });
        }

        let ids = buffer.decode(count)?;
        debug!(count = ids.len(), "Listed active domains");
        Ok(ids)
    }

    /// List the names of defined but inactive domains.
    ///
    /// Same [`LIST_CAPACITY`](crate::codec::LIST_CAPACITY) cap as
    /// [`list_domains`](Self::list_domains). A name that is not UTF-8 fails
    /// the whole call with `InvalidResponse`; every string is still released.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn list_defined_domains(&self) -> Result<Vec<String>> {
        let mut buffer = NameBuffer::new();
        let count = self.api.list_defined_domains(&self.session, buffer.slots_mut());
        if count < 0 {
            return Err(VirtError::ListFailed {
                what: "defined domains",
                record: self.fetch_error(),
            });
        }

        let names = buffer.decode(count, self.api.as_ref())?;
        debug!(count = names.len(), "Listed defined domains");
        Ok(names)
    }

    // =========================================================================
    // Domain lookup
    // =========================================================================

    /// Look up an active domain by its runtime ID.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn lookup_domain_by_id(&self, id: DomainId) -> Result<Domain<'_, N>> {
        let native_id = i32::try_from(id.get())
            .map_err(|_| VirtError::InvalidArgument(format!("domain id {} is out of range", id)))?;

        let handle = self
            .api
            .lookup_domain_by_id(&self.session, native_id)
            .ok_or_else(|| self.not_found(format!("id {}", id)))?;

        debug!("Found domain");
        Ok(Domain::new(self, handle))
    }

    /// Look up a domain by name.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn lookup_domain_by_name(&self, name: &str) -> Result<Domain<'_, N>> {
        let c_name = to_cstring("domain name", name)?;
        let handle = self
            .api
            .lookup_domain_by_name(&self.session, &c_name)
            .ok_or_else(|| self.not_found(name.to_string()))?;

        debug!("Found domain");
        Ok(Domain::new(self, handle))
    }

    /// Look up a domain by UUID.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub fn lookup_domain_by_uuid(&self, uuid: &Uuid) -> Result<Domain<'_, N>> {
        let c_uuid = to_cstring("uuid", &uuid.to_string())?;
        let handle = self
            .api
            .lookup_domain_by_uuid(&self.session, &c_uuid)
            .ok_or_else(|| self.not_found(uuid.to_string()))?;

        debug!("Found domain");
        Ok(Domain::new(self, handle))
    }

    fn not_found(&self, key: String) -> VirtError {
        VirtError::NotFound {
            key,
            record: self.fetch_error(),
        }
    }

    // =========================================================================
    // Save images
    // =========================================================================

    /// Restore a domain from an image written by [`Domain::save`].
    ///
    /// Blocks for the whole state transfer.
    #[instrument(skip(self, path), fields(uri = %self.uri, image = %path.as_ref().display()))]
    pub fn restore(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let c_path = to_cstring("path", &path)?;

        info!("Restoring domain");
        if self.api.domain_restore(&self.session, &c_path) < 0 {
            return Err(VirtError::RestoreFailed {
                path,
                record: self.fetch_error(),
            });
        }

        info!("Domain restored");
        Ok(())
    }
}

impl<N: NativeApi> Drop for Connection<N> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // SAFETY: the session was not taken by close() and drop runs once.
        let session = unsafe { ManuallyDrop::take(&mut self.session) };

        if self.api.close(session) < 0 {
            let record = self.fetch_error();
            warn!(uri = %self.uri, error = %record, "Failed to close connection on drop");
        } else {
            debug!(uri = %self.uri, "Connection closed on drop");
        }
    }
}

impl<N: NativeApi> std::fmt::Debug for Connection<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}
