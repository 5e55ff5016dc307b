//! Domain (virtual machine) handles.

use std::fmt;
use std::mem::ManuallyDrop;
use std::path::Path;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::codec::{decode_cstr, UuidBuffer};
use crate::connection::Connection;
use crate::error::{Result, VirtError};
use crate::native::{borrowed_cstr, to_cstring, NativeApi};
use crate::snapshot::Snapshot;

/// A handle to a single virtual machine.
///
/// Obtained only through [`Connection`] lookups and borrows that connection,
/// so it can never outlive it. The native reference is released when the
/// `Domain` is dropped.
pub struct Domain<'conn, N: NativeApi> {
    conn: &'conn Connection<N>,
    handle: ManuallyDrop<N::Domain>,
}

impl<'conn, N: NativeApi> Domain<'conn, N> {
    pub(crate) fn new(conn: &'conn Connection<N>, handle: N::Domain) -> Self {
        Self {
            conn,
            handle: ManuallyDrop::new(handle),
        }
    }

    /// The connection this domain was looked up on.
    pub fn connection(&self) -> &'conn Connection<N> {
        self.conn
    }

    pub(crate) fn api(&self) -> &'conn N {
        self.conn.api()
    }

    /// Get the domain name.
    ///
    /// The native layer lends the string for as long as the handle lives;
    /// it is copied here and never released. A name that is not UTF-8 is an
    /// `InvalidResponse`.
    #[instrument(skip(self))]
    pub fn name(&self) -> Result<String> {
        let raw = self.api().domain_get_name(&self.handle);
        // SAFETY: the name is borrowed from `self.handle`, which outlives
        // this call; we only copy it.
        let name = unsafe { borrowed_cstr(raw) }.ok_or_else(|| VirtError::QueryFailed {
            what: "domain name",
            record: self.conn.fetch_error(),
        })?;

        Ok(decode_cstr("domain name", name)?)
    }

    /// Get the domain UUID.
    #[instrument(skip(self))]
    pub fn uuid(&self) -> Result<Uuid> {
        let mut buffer = UuidBuffer::new();
        if self.api().domain_get_uuid(&self.handle, buffer.bytes_mut()) < 0 {
            return Err(VirtError::QueryFailed {
                what: "domain uuid",
                record: self.conn.fetch_error(),
            });
        }

        Ok(buffer.decode()?)
    }

    /// Create a snapshot from an XML descriptor.
    ///
    /// `xml` and `flags` are passed through uninterpreted. Depending on the
    /// flags the hypervisor may pause or quiesce the domain while the
    /// snapshot is taken.
    #[instrument(skip(self, xml), fields(xml_len = xml.len()))]
    pub fn create_snapshot_xml(&self, xml: &str, flags: u32) -> Result<Snapshot<'_, 'conn, N>> {
        let c_xml = to_cstring("snapshot xml", xml)?;

        info!("Creating snapshot");
        let handle = self
            .api()
            .domain_snapshot_create_xml(&self.handle, &c_xml, flags)
            .ok_or_else(|| VirtError::SnapshotFailed(self.conn.fetch_error()))?;

        info!("Snapshot created");
        Ok(Snapshot::new(self, handle))
    }

    /// Save the running state to `path` on the host.
    ///
    /// Blocks for the whole state transfer. The domain usually stops as a
    /// result; [`Connection::restore`] brings it back.
    #[instrument(skip(self, path), fields(image = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let c_path = to_cstring("path", &path)?;

        info!("Saving domain state");
        if self.api().domain_save(&self.handle, &c_path) < 0 {
            return Err(VirtError::SaveFailed {
                path,
                record: self.conn.fetch_error(),
            });
        }

        info!("Domain state saved");
        Ok(())
    }

    /// Save the running state, overriding the stored descriptor.
    ///
    /// An empty `dxml` is sent as NULL, which keeps the domain's current
    /// descriptor; libvirt rejects an empty XML string. `flags` are passed
    /// through uninterpreted.
    #[instrument(skip(self, path, dxml), fields(image = %path.as_ref().display()))]
    pub fn save_flags(&self, path: impl AsRef<Path>, dxml: &str, flags: u32) -> Result<()> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let c_path = to_cstring("path", &path)?;
        let c_dxml = if dxml.is_empty() {
            None
        } else {
            Some(to_cstring("domain xml", dxml)?)
        };

        info!(override_xml = c_dxml.is_some(), "Saving domain state");
        if self
            .api()
            .domain_save_flags(&self.handle, &c_path, c_dxml.as_deref(), flags)
            < 0
        {
            return Err(VirtError::SaveFailed {
                path,
                record: self.conn.fetch_error(),
            });
        }

        info!("Domain state saved");
        Ok(())
    }
}

impl<N: NativeApi> Drop for Domain<'_, N> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and nothing touches the handle afterwards.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        self.api().domain_free(handle);
        debug!("Released domain handle");
    }
}

impl<N: NativeApi> fmt::Debug for Domain<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("uri", &self.conn.uri())
            .finish_non_exhaustive()
    }
}
