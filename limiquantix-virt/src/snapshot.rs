//! Snapshot handles.

use std::fmt;
use std::mem::ManuallyDrop;

use tracing::debug;

use crate::domain::Domain;
use crate::native::NativeApi;

/// A handle to a point-in-time snapshot of a domain.
///
/// Created by [`Domain::create_snapshot_xml`] and bound to that domain's
/// lifetime. Revert and delete belong to the hypervisor and are not
/// exposed here; the handle only keeps the native reference alive until
/// it is dropped.
pub struct Snapshot<'dom, 'conn, N: NativeApi> {
    domain: &'dom Domain<'conn, N>,
    handle: ManuallyDrop<N::Snapshot>,
}

impl<'dom, 'conn, N: NativeApi> Snapshot<'dom, 'conn, N> {
    pub(crate) fn new(domain: &'dom Domain<'conn, N>, handle: N::Snapshot) -> Self {
        Self {
            domain,
            handle: ManuallyDrop::new(handle),
        }
    }

    /// The domain this snapshot was taken of.
    pub fn domain(&self) -> &'dom Domain<'conn, N> {
        self.domain
    }
}

impl<N: NativeApi> Drop for Snapshot<'_, '_, N> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and nothing touches the handle afterwards.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        self.domain.api().snapshot_free(handle);
        debug!("Released snapshot handle");
    }
}

impl<N: NativeApi> fmt::Debug for Snapshot<'_, '_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("domain", self.domain)
            .finish_non_exhaustive()
    }
}
