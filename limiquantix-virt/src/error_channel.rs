//! Draining the native error slot.
//!
//! The native layer keeps a single error slot per thread. A second failing
//! call overwrites whatever the first one left, so every failure path must
//! call [`ErrorChannel::fetch_and_clear`] right after the native call that
//! failed and before any other native call on the same thread.

use tracing::debug;

use crate::error::ErrorRecord;
use crate::native::NativeApi;

/// Narrow accessor for the calling thread's native error slot.
pub struct ErrorChannel<'a, N: NativeApi> {
    api: &'a N,
}

impl<'a, N: NativeApi> ErrorChannel<'a, N> {
    pub fn new(api: &'a N) -> Self {
        Self { api }
    }

    /// Read the last error and reset the slot.
    ///
    /// Never fails. If nothing was recorded the zeroed
    /// [`ErrorRecord::none`] is returned; callers only get here after the
    /// native call already signalled failure.
    pub fn fetch_and_clear(&self) -> ErrorRecord {
        let record = self.api.last_error().unwrap_or_else(ErrorRecord::none);
        self.api.reset_error();

        debug!(
            code = record.code,
            domain = record.domain,
            message = %record.message,
            "Fetched native error"
        );

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockNative};
    use std::ffi::CString;

    #[test]
    fn test_fetch_reads_then_clears() {
        let api = MockNative::new();
        api.fail_next(MockCall::Open);
        let uri = CString::new("test:///default").unwrap();
        assert!(api.open(&uri).is_none());

        let channel = ErrorChannel::new(&api);
        let record = channel.fetch_and_clear();
        assert!(record.is_set());
        assert!(api.last_error().is_none());

        // A second fetch sees the empty slot
        assert_eq!(channel.fetch_and_clear(), ErrorRecord::none());
    }

    #[test]
    fn test_second_failure_overwrites_first() {
        let api = MockNative::new();
        let bad = CString::new("bogus://nowhere").unwrap();
        assert!(api.open(&bad).is_none());

        let session = api.open(&CString::new("test:///default").unwrap()).unwrap();
        let missing = CString::new("missing").unwrap();
        assert!(api.lookup_domain_by_name(&session, &missing).is_none());

        let record = ErrorChannel::new(&api).fetch_and_clear();
        assert_eq!(record.code, crate::mock::VIR_ERR_NO_DOMAIN);
        api.close(session);
    }
}
