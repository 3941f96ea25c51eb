//! The coordinator's own durable commit/rollback decision log.
//!
//! Before fanning a 2PC commit out to every RM, the coordinator must durably
//! record that it decided to commit — otherwise a crash between "all RMs
//! voted yes" and "all RMs told to commit" leaves no way to tell committed
//! branches from ones that should be rolled back during recovery.

use super::error::XaError;
use crate::common::SessionId;

/// The coordinator's durable transaction log (a write-ahead log, binlog, or
/// equivalent — this crate only needs the commit/rollback decision point).
pub trait CoordinatorLog: Send + Sync {
    /// Durably records the commit decision for `session`. `all` distinguishes
    /// a 2PC commit (`true`) from a one-phase commit that never prepared
    /// (`false`); some implementations skip logging in the latter case.
    /// Returns `Ok(true)` if the session actually had something to log,
    /// `Ok(false)` if there was nothing pending (a no-op commit).
    fn log_commit(&self, session: SessionId, all: bool) -> Result<bool, XaError>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// An in-memory `CoordinatorLog` whose `log_commit` outcome is controlled
    /// by the test.
    #[derive(Default)]
    pub struct FakeCoordinatorLog {
        fail: AtomicBool,
        commits: AtomicUsize,
    }

    impl FakeCoordinatorLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn commit_count(&self) -> usize {
            self.commits.load(Ordering::SeqCst)
        }
    }

    impl CoordinatorLog for FakeCoordinatorLog {
        fn log_commit(&self, _session: SessionId, _all: bool) -> Result<bool, XaError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(XaError::RmErr {
                    reason: "coordinator log write failed".into(),
                });
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }
}
