//! The resource manager (RM) collaborator interface.
//!
//! Each registered RM is a local 2PC-capable storage engine. This crate never
//! implements one; it only calls through this trait, fanned out by
//! [`RmFanout`](super::fanout::RmFanout).

use crate::common::SessionId;
use super::error::XaError;
use super::xid::Xid;

/// Whether an RM currently participates in 2PC fanout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmState {
    /// The RM is registered and has a working `recover` hook.
    Enabled,
    /// The RM is registered but temporarily or permanently excluded from 2PC
    /// (e.g. it does not support XA, or was administratively disabled).
    Disabled,
}

/// A local transactional storage engine capable of participating in 2PC.
pub trait ResourceManager: Send + Sync {
    /// A short, stable name used in diagnostics.
    fn name(&self) -> &str;

    fn state(&self) -> RmState;

    /// True iff this RM should be included in prepare/commit/rollback/recover
    /// fanout (`state == Enabled`, per §4.4/§4.5 of the spec).
    fn is_2pc_capable(&self) -> bool {
        self.state() == RmState::Enabled
    }

    /// `ha_prepare`: prepares the session's local branch on this RM.
    fn prepare(&self, session: SessionId) -> Result<(), XaError>;

    /// `ha_commit_trans`: one-phase commit of the session's local branch.
    fn commit_trans(&self, session: SessionId, all: bool) -> Result<(), XaError>;

    /// `ha_rollback_trans`: rollback of the session's local branch.
    fn rollback_trans(&self, session: SessionId, all: bool) -> Result<(), XaError>;

    /// Two-phase commit of a branch by xid, independent of any live session —
    /// used for recovered/foreign branches and for the normal 2PC commit path.
    fn commit_by_xid(&self, xid: &Xid) -> Result<(), XaError>;

    /// Two-phase rollback of a branch by xid.
    fn rollback_by_xid(&self, xid: &Xid) -> Result<(), XaError>;

    /// Drains up to `max` still-prepared-but-unresolved XIDs from this RM's own
    /// durable log. Returns fewer than `max` once exhausted (the fanout loop
    /// uses that as the stop condition, never an explicit end-of-stream marker).
    fn recover(&self, max: usize) -> Vec<Xid>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! In-memory `ResourceManager` fake for unit and integration tests.

    use std::collections::HashSet;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Prepare,
        CommitTrans,
        RollbackTrans,
        CommitByXid(Vec<u8>),
        RollbackByXid(Vec<u8>),
    }

    /// A fake RM whose behavior (vote, fail commit/rollback, prepared-xid
    /// inventory for recovery) is fully controlled by the test.
    pub struct FakeResourceManager {
        name: String,
        state: RmState,
        fail_prepare: Mutex<bool>,
        fail_commit: Mutex<bool>,
        prepared_inventory: Mutex<Vec<Xid>>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeResourceManager {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                state: RmState::Enabled,
                fail_prepare: Mutex::new(false),
                fail_commit: Mutex::new(false),
                prepared_inventory: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn disabled(name: impl Into<String>) -> Self {
            Self {
                state: RmState::Disabled,
                ..Self::new(name)
            }
        }

        pub fn set_fail_prepare(&self, fail: bool) {
            *self.fail_prepare.lock() = fail;
        }

        pub fn set_fail_commit(&self, fail: bool) {
            *self.fail_commit.lock() = fail;
        }

        /// Seeds this RM's durable log with xids `recover()` should report as
        /// still prepared (simulating a crash before resolution).
        pub fn seed_prepared(&self, xids: Vec<Xid>) {
            *self.prepared_inventory.lock() = xids;
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn committed_xids(&self) -> HashSet<Vec<u8>> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Call::CommitByXid(k) => Some(k.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn rolled_back_xids(&self) -> HashSet<Vec<u8>> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Call::RollbackByXid(k) => Some(k.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl ResourceManager for FakeResourceManager {
        fn name(&self) -> &str {
            &self.name
        }

        fn state(&self) -> RmState {
            self.state
        }

        fn prepare(&self, _session: SessionId) -> Result<(), XaError> {
            self.calls.lock().push(Call::Prepare);
            if *self.fail_prepare.lock() {
                Err(XaError::RmErr {
                    reason: "fake prepare failure".into(),
                })
            } else {
                Ok(())
            }
        }

        fn commit_trans(&self, _session: SessionId, _all: bool) -> Result<(), XaError> {
            self.calls.lock().push(Call::CommitTrans);
            if *self.fail_commit.lock() {
                Err(XaError::RmErr {
                    reason: "fake commit failure".into(),
                })
            } else {
                Ok(())
            }
        }

        fn rollback_trans(&self, _session: SessionId, _all: bool) -> Result<(), XaError> {
            self.calls.lock().push(Call::RollbackTrans);
            Ok(())
        }

        fn commit_by_xid(&self, xid: &Xid) -> Result<(), XaError> {
            self.calls.lock().push(Call::CommitByXid(xid.key()));
            Ok(())
        }

        fn rollback_by_xid(&self, xid: &Xid) -> Result<(), XaError> {
            self.calls.lock().push(Call::RollbackByXid(xid.key()));
            Ok(())
        }

        fn recover(&self, max: usize) -> Vec<Xid> {
            let mut inventory = self.prepared_inventory.lock();
            let take = max.min(inventory.len());
            inventory.drain(..take).collect()
        }
    }
}
