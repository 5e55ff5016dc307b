//! Libvirt native layer.
//!
//! This module binds [`NativeApi`](crate::NativeApi) to the libvirt C
//! library. It requires the `libvirt` feature to be enabled and the system
//! to have libvirt installed.

#[cfg(feature = "libvirt")]
mod backend;

#[cfg(feature = "libvirt")]
pub use backend::{ConnectPtr, DomainPtr, Libvirt, SnapshotPtr};

/// Check if the libvirt native layer is compiled in.
pub fn is_available() -> bool {
    cfg!(feature = "libvirt")
}
