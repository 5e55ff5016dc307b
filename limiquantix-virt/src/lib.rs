//! # limiquantix Virt
//!
//! Safe client-side handles over the libvirt management API.
//!
//! The crate wraps the native session, domain and snapshot handles with
//! explicit ownership:
//!
//! ```text
//! ┌────────────────┐  lookup   ┌────────────────┐  snapshot  ┌────────────────┐
//! │   Connection   │──────────▶│   Domain<'c>   │───────────▶│ Snapshot<'d,'c>│
//! │ (owns session) │           │ (borrows conn) │            │ (borrows dom)  │
//! └───────┬────────┘           └───────┬────────┘            └───────┬────────┘
//!         │                            │                             │
//!         ▼                            ▼                             ▼
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                         NativeApi (libvirt / mock)                        │
//! │          failures leave {code, domain, message} in a per-thread slot      │
//! └───────────────────────────────────────────────────────────────────────────┘
//!                                      │
//!                                      ▼
//!                         ErrorChannel::fetch_and_clear
//! ```
//!
//! - Every factory returns `Result`, so an invalid handle never reaches
//!   the caller.
//! - Every failure drains the native error slot immediately, before any
//!   other native call.
//! - Strings the native layer hands over are released exactly once;
//!   strings it only lends are never released.
//! - List calls use a fixed buffer of [`LIST_CAPACITY`] slots and truncate
//!   beyond it.
//!
//! All calls block the calling thread. A [`Connection`] is `Send` but not
//! `Sync`; share one between threads only behind a `Mutex`.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use limiquantix_virt::{Connection, MockNative};
//!
//! let api = Arc::new(MockNative::new());
//! api.add_domain("web-01", true);
//!
//! let conn = Connection::open(api, "test:///default").unwrap();
//! for id in conn.list_domains().unwrap() {
//!     let domain = conn.lookup_domain_by_id(id).unwrap();
//!     println!("{} {}", id, domain.name().unwrap());
//! }
//! conn.close().unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod error_channel;
pub mod libvirt;
pub mod mock;
pub mod native;
pub mod snapshot;
pub mod types;

pub use codec::LIST_CAPACITY;
pub use config::{LogFormat, VirtConfig};
pub use connection::Connection;
pub use domain::Domain;
pub use error::{ErrorRecord, Result, VirtError};
pub use error_channel::ErrorChannel;
pub use mock::{MockCall, MockNative};
pub use native::{NativeApi, RawNodeInfo};
pub use snapshot::Snapshot;
pub use types::{DomainId, NodeInfo};

// Re-export the libvirt native layer when available
#[cfg(feature = "libvirt")]
pub use libvirt::Libvirt;
