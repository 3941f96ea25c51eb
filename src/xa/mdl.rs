//! Metadata lock acquisition gating `XA COMMIT`/`XA ROLLBACK`.
//!
//! A two-phase commit must not run concurrently with a DDL statement that
//! would change the schema an already-prepared branch was validated against.
//! The coordinator acquires a short commit-scoped lock before fanning the
//! decision out to RMs.

use std::time::Duration;

use super::error::XaError;
use crate::common::SessionId;

pub trait MetadataLockManager: Send + Sync {
    /// Blocks up to `timeout` acquiring the commit lock for `session`. Returns
    /// `XAER_RMERR` if the wait times out.
    fn acquire_commit_lock(&self, session: SessionId, timeout: Duration) -> Result<(), XaError>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// A `MetadataLockManager` fake that always grants immediately, unless the
    /// test tells it to deny.
    #[derive(Default)]
    pub struct FakeMetadataLockManager {
        deny: AtomicBool,
    }

    impl FakeMetadataLockManager {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_deny(&self, deny: bool) {
            self.deny.store(deny, Ordering::SeqCst);
        }
    }

    impl MetadataLockManager for FakeMetadataLockManager {
        fn acquire_commit_lock(&self, _session: SessionId, _timeout: Duration) -> Result<(), XaError> {
            if self.deny.load(Ordering::SeqCst) {
                Err(XaError::RmErr {
                    reason: "metadata lock wait timed out".into(),
                })
            } else {
                Ok(())
            }
        }
    }
}
