//! # limiquantix Common
//!
//! Shared utilities for the limiquantix libraries.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use limiquantix_common::init_logging;
//!
//! // Initialize with level; RUST_LOG overrides it when set
//! init_logging("info").unwrap();
//! tracing::info!("ready");
//! ```

pub mod logging;

// Re-export logging functions
pub use logging::{
    init_logging,
    init_logging_json,
    init_test_logging,
    is_valid_level,
    LOG_LEVELS,
};
