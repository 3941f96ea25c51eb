//! `XaSessionOps`: the user-facing `XA START/END/PREPARE/COMMIT/ROLLBACK/
//! RECOVER` verbs.
//!
//! One [`XaSession`] exists per client connection and is driven serially by
//! that connection's thread; the verbs mutate the session's own
//! [`BranchState`] directly and only touch the shared [`XidRegistry`] at
//! insert/remove boundaries.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{instrument, warn};

use super::branch_state::{BranchState, XaPhase};
use super::config::XaConfig;
use super::error::XaError;
use super::fanout::RmFanout;
use super::registry::XidRegistry;
use super::stats::XaStats;
use super::tc_log::CoordinatorLog;
use super::mdl::MetadataLockManager;
use super::xid::Xid;
use crate::common::SessionId;

/// The host server's ordinary (non-XA) transaction lifecycle, out of this
/// crate's scope beyond the calls `XA START`/`XA ROLLBACK` must make into it.
pub trait LocalTransaction: Send + Sync {
    /// True if `session` currently has an active non-XA transaction (or holds
    /// locked tables), the genuine `XAER_OUTSIDE` condition `XA START` must
    /// reject.
    fn is_active(&self, session: SessionId) -> bool;

    /// Begins the session's local transaction. Called before registering a
    /// new branch.
    fn begin(&self, session: SessionId) -> Result<(), XaError>;

    /// Rolls back and clears the session's local transaction, used both when
    /// `XA START` fails to register its branch and for `XA ROLLBACK`.
    fn force_rollback(&self, session: SessionId) -> Result<(), XaError>;
}

/// A row of the `XA RECOVER` result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverRow {
    pub format_id: i32,
    pub gtrid_length: usize,
    pub bqual_length: usize,
    pub data: Vec<u8>,
}

impl From<&Xid> for RecoverRow {
    fn from(xid: &Xid) -> Self {
        Self {
            format_id: xid.format_id,
            gtrid_length: xid.gtrid_length(),
            bqual_length: xid.bqual_length(),
            data: xid.recover_row_data(),
        }
    }
}

/// Shared coordinator state: one instance serves every session on this
/// server.
pub struct XaCoordinator {
    registry: Arc<XidRegistry>,
    fanout: Arc<RmFanout>,
    tc_log: Option<Arc<dyn CoordinatorLog>>,
    mdl: Arc<dyn MetadataLockManager>,
    stats: Arc<XaStats>,
    config: XaConfig,
}

impl XaCoordinator {
    /// Builds a coordinator with a fresh, empty `XaStats`. Use
    /// [`with_stats`](Self::with_stats) when crash recovery already produced
    /// one (so recovery counters and live-traffic counters land in the same
    /// place).
    pub fn new(
        registry: Arc<XidRegistry>,
        fanout: Arc<RmFanout>,
        tc_log: Option<Arc<dyn CoordinatorLog>>,
        mdl: Arc<dyn MetadataLockManager>,
        config: XaConfig,
    ) -> Self {
        Self::with_stats(registry, fanout, tc_log, mdl, config, Arc::new(XaStats::new()))
    }

    pub fn with_stats(
        registry: Arc<XidRegistry>,
        fanout: Arc<RmFanout>,
        tc_log: Option<Arc<dyn CoordinatorLog>>,
        mdl: Arc<dyn MetadataLockManager>,
        config: XaConfig,
        stats: Arc<XaStats>,
    ) -> Self {
        Self {
            registry,
            fanout,
            tc_log,
            mdl,
            stats,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<XidRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<XaStats> {
        &self.stats
    }
}

/// One client session's view onto the coordinator. Not `Sync`: a session's
/// verbs are driven serially by the owning connection thread (§5, "within a
/// session, verbs are serial").
pub struct XaSession {
    coordinator: Arc<XaCoordinator>,
    session_id: SessionId,
    local_tx: Arc<dyn LocalTransaction>,
    current: Mutex<Option<Arc<BranchState>>>,
}

impl XaSession {
    pub fn new(coordinator: Arc<XaCoordinator>, session_id: SessionId, local_tx: Arc<dyn LocalTransaction>) -> Self {
        Self {
            coordinator,
            session_id,
            local_tx,
            current: Mutex::new(None),
        }
    }

    /// `XA START xid`.
    #[instrument(skip(self, xid))]
    pub fn xa_start(&self, xid: Xid) -> Result<(), XaError> {
        let mut current = self.current.lock();
        if let Some(branch) = current.as_ref() {
            return Err(XaError::RmFail { state: branch.phase() });
        }
        if self.local_tx.is_active(self.session_id) {
            return Err(XaError::Outside);
        }
        self.local_tx.begin(self.session_id)?;
        let branch = Arc::new(BranchState::start_live(xid));
        match self.coordinator.registry.insert_live(branch.clone()) {
            Ok(()) => {
                self.coordinator.stats.incr_started();
                *current = Some(branch);
                Ok(())
            }
            Err(e) => {
                // Best-effort: report the original DUPID regardless of
                // whether the subsequent cleanup rollback itself succeeds.
                let _ = self.local_tx.force_rollback(self.session_id);
                Err(e)
            }
        }
    }

    /// `XA START xid RESUME`.
    #[instrument(skip(self, xid))]
    pub fn xa_start_resume(&self, xid: Xid) -> Result<(), XaError> {
        let current = self.current.lock();
        let branch = current.as_ref().ok_or(XaError::Nota)?;
        branch.resume(&xid)
    }

    /// `XA END xid`.
    #[instrument(skip(self, xid))]
    pub fn xa_end(&self, xid: &Xid) -> Result<(), XaError> {
        let current = self.current.lock();
        let branch = current.as_ref().ok_or(XaError::Nota)?;
        if branch.xid() != *xid {
            return Err(XaError::Nota);
        }
        branch.end()
    }

    /// `XA PREPARE xid`.
    #[instrument(skip(self, xid))]
    pub fn xa_prepare(&self, xid: &Xid) -> Result<(), XaError> {
        let mut current = self.current.lock();
        let branch = current.as_ref().ok_or(XaError::Nota)?.clone();
        if branch.xid() != *xid {
            return Err(XaError::Nota);
        }
        branch.require_phase(XaPhase::Idle)?;
        if let Some(err) = branch.check_rolled_back() {
            return Err(err);
        }
        match self.coordinator.fanout.prepare_all(self.session_id) {
            Ok(()) => {
                branch.mark_prepared();
                Ok(())
            }
            Err(_) => {
                self.coordinator.registry.remove(&branch.xid().key());
                branch.force_notr();
                *current = None;
                self.coordinator.stats.incr_prepare_failures();
                Err(XaError::RbRollback)
            }
        }
    }

    /// `XA COMMIT xid [ONE PHASE]`. Handles both the case where this session
    /// owns `xid` and the case where it names a recovered branch belonging to
    /// a different (or no) session.
    #[instrument(skip(self, xid))]
    pub fn xa_commit(&self, xid: Xid, one_phase: bool) -> Result<(), XaError> {
        let owned = {
            let current = self.current.lock();
            current.as_ref().filter(|b| b.xid() == xid).cloned()
        };
        match owned {
            Some(branch) => self.commit_owned(branch, one_phase),
            None => self.commit_recovered(&xid),
        }
    }

    fn commit_owned(&self, branch: Arc<BranchState>, one_phase: bool) -> Result<(), XaError> {
        if let Some(err) = branch.check_rolled_back() {
            self.force_rollback_current(&branch);
            self.finalize_owned_branch(&branch);
            return Err(err);
        }

        let result = if one_phase {
            branch.require_phase(XaPhase::Idle)?;
            self.coordinator.fanout.commit_trans_all(self.session_id)
        } else {
            branch.require_phase(XaPhase::Prepared)?;
            self.coordinator
                .mdl
                .acquire_commit_lock(self.session_id, self.coordinator.config.lock_wait_timeout)
                .and_then(|()| match &self.coordinator.tc_log {
                    Some(log) => log.log_commit(self.session_id, true).map(|_| ()),
                    None => self.coordinator.fanout.commit_all(&branch.xid()),
                })
        };

        if let Err(e) = result {
            self.force_rollback_current(&branch);
            self.finalize_owned_branch(&branch);
            self.coordinator.stats.incr_commit_failures();
            return Err(e);
        }

        self.finalize_owned_branch(&branch);
        self.coordinator.stats.incr_committed();
        Ok(())
    }

    /// Removes `branch` from the registry, forces it to `NOTR`, and clears
    /// this session's current-branch slot. Shared by every path that ends a
    /// session-owned branch, whether by success, RM failure, or forced
    /// rollback of a poisoned branch.
    fn finalize_owned_branch(&self, branch: &Arc<BranchState>) {
        self.coordinator.registry.remove(&branch.xid().key());
        branch.force_notr();
        *self.current.lock() = None;
    }

    fn commit_recovered(&self, xid: &Xid) -> Result<(), XaError> {
        let branch = self.coordinator.registry.lookup(&xid.key()).ok_or(XaError::Nota)?;
        if !branch.in_recovery() {
            return Err(XaError::Nota);
        }
        let result = match branch.check_rolled_back() {
            Some(_) => self.coordinator.fanout.rollback_all(xid),
            None => self.coordinator.fanout.commit_all(xid),
        };
        self.coordinator.registry.remove(&xid.key());
        if result.is_ok() {
            self.coordinator.stats.incr_committed();
        }
        result
    }

    /// `XA ROLLBACK xid`.
    #[instrument(skip(self, xid))]
    pub fn xa_rollback(&self, xid: Xid) -> Result<(), XaError> {
        let owned = {
            let current = self.current.lock();
            current.as_ref().filter(|b| b.xid() == xid).cloned()
        };
        match owned {
            Some(branch) => self.rollback_owned(branch),
            None => self.rollback_recovered(&xid),
        }
    }

    fn rollback_owned(&self, branch: Arc<BranchState>) -> Result<(), XaError> {
        let phase = branch.phase();
        if !matches!(phase, XaPhase::Idle | XaPhase::Prepared | XaPhase::RollbackOnly) {
            return Err(XaError::RmFail { state: phase });
        }
        self.force_rollback_current(&branch);
        self.finalize_owned_branch(&branch);
        self.coordinator.stats.incr_rolled_back();
        Ok(())
    }

    fn rollback_recovered(&self, xid: &Xid) -> Result<(), XaError> {
        let branch = self.coordinator.registry.lookup(&xid.key()).ok_or(XaError::Nota)?;
        if !branch.in_recovery() {
            return Err(XaError::Nota);
        }
        let result = self.coordinator.fanout.rollback_all(xid);
        self.coordinator.registry.remove(&xid.key());
        result
    }

    fn force_rollback_current(&self, branch: &Arc<BranchState>) {
        branch.reset_error();
        if let Err(e) = self.coordinator.fanout.rollback_trans_all(self.session_id) {
            warn!(error = %e, "forced rollback of local transaction reported an error");
        }
        if let Err(e) = self.local_tx.force_rollback(self.session_id) {
            warn!(error = %e, "local transaction rollback reported an error");
        }
    }

    /// `XA RECOVER`: one row per `PREPARED` branch currently registered.
    #[instrument(skip(self))]
    pub fn xa_recover(&self) -> Vec<RecoverRow> {
        self.coordinator
            .registry
            .snapshot_prepared()
            .iter()
            .map(RecoverRow::from)
            .collect()
    }
}

// Options the SQL surface allows on `START`/`END` but this coordinator does
// not implement; kept as explicit variants so unsupported options fail
// loudly (`INVAL`) rather than being silently ignored (per the design note on
// deprecated branches).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOption {
    None,
    Join,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOption {
    None,
    Suspend,
    SuspendForMigrate,
}

/// Validates a `START` option, converting the unsupported ones to `INVAL`.
pub fn check_start_option(option: StartOption) -> Result<(), XaError> {
    match option {
        StartOption::None | StartOption::Resume => Ok(()),
        StartOption::Join => Err(XaError::Inval { option: "JOIN" }),
    }
}

/// Validates an `END` option, converting the unsupported ones to `INVAL`.
pub fn check_end_option(option: EndOption) -> Result<(), XaError> {
    match option {
        EndOption::None => Ok(()),
        EndOption::Suspend => Err(XaError::Inval { option: "SUSPEND" }),
        EndOption::SuspendForMigrate => Err(XaError::Inval { option: "SUSPEND FOR MIGRATE" }),
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// A `LocalTransaction` fake. `began`/`force_rollback` track the XA
    /// branch's own local transaction bookkeeping, for assertions in tests.
    /// `outside`, controlled by `set_outside_active`, simulates a pre-existing
    /// *non-XA* transaction on the session so tests can exercise the
    /// `XAER_OUTSIDE` path independently of that bookkeeping.
    #[derive(Default)]
    pub struct FakeLocalTransaction {
        began: AtomicBool,
        outside: AtomicBool,
    }

    impl FakeLocalTransaction {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_outside_active(&self, active: bool) {
            self.outside.store(active, Ordering::SeqCst);
        }

        pub fn began(&self) -> bool {
            self.began.load(Ordering::SeqCst)
        }
    }

    impl LocalTransaction for FakeLocalTransaction {
        fn is_active(&self, _session: SessionId) -> bool {
            self.outside.load(Ordering::SeqCst)
        }

        fn begin(&self, _session: SessionId) -> Result<(), XaError> {
            self.began.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn force_rollback(&self, _session: SessionId) -> Result<(), XaError> {
            self.began.store(false, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeLocalTransaction;
    use super::*;
    use crate::xa::mdl::testing::FakeMetadataLockManager;
    use crate::xa::resource_manager::testing::FakeResourceManager;
    use crate::xa::resource_manager::ResourceManager;
    use crate::xa::tc_log::testing::FakeCoordinatorLog;

    fn xid(tag: &[u8]) -> Xid {
        Xid::new(1, tag.to_vec(), vec![]).unwrap()
    }

    fn coordinator(rm: Arc<dyn ResourceManager>, tc_log: Option<Arc<dyn CoordinatorLog>>) -> Arc<XaCoordinator> {
        let mut fanout = RmFanout::new();
        fanout.register(rm);
        Arc::new(XaCoordinator::new(
            Arc::new(XidRegistry::new()),
            Arc::new(fanout),
            tc_log,
            Arc::new(FakeMetadataLockManager::new()),
            XaConfig::default(),
        ))
    }

    fn session(coordinator: Arc<XaCoordinator>, id: SessionId) -> XaSession {
        XaSession::new(coordinator, id, Arc::new(FakeLocalTransaction::new()))
    }

    #[test]
    fn happy_two_phase_commit() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm.clone(), None);
        let s = session(coord.clone(), 1);

        s.xa_start(xid(b"a")).unwrap();
        s.xa_end(&xid(b"a")).unwrap();
        s.xa_prepare(&xid(b"a")).unwrap();
        s.xa_commit(xid(b"a"), false).unwrap();

        assert!(coord.registry().is_empty());
        assert_eq!(rm.committed_xids().len(), 1);
    }

    #[test]
    fn duplicate_start_on_a_fresh_session_fails_with_dupid() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm, None);
        let s1 = session(coord.clone(), 1);
        let s2 = session(coord.clone(), 2);

        s1.xa_start(xid(b"a")).unwrap();
        assert_eq!(s2.xa_start(xid(b"a")), Err(XaError::Dupid));
    }

    #[test]
    fn restarting_an_already_active_branch_reports_rmfail_not_outside() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm, None);
        let s = session(coord, 1);

        s.xa_start(xid(b"a")).unwrap();
        assert_eq!(
            s.xa_start(xid(b"b")),
            Err(XaError::RmFail { state: XaPhase::Active })
        );
    }

    #[test]
    fn start_with_a_pre_existing_local_transaction_reports_outside() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm, None);
        let local_tx = Arc::new(FakeLocalTransaction::new());
        local_tx.set_outside_active(true);
        let s = XaSession::new(coord, 1, local_tx);

        assert_eq!(s.xa_start(xid(b"a")), Err(XaError::Outside));
    }

    #[test]
    fn async_deadlock_forces_rollback_only() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm, None);
        let s = session(coord, 1);

        s.xa_start(xid(b"a")).unwrap();
        // simulate an RM signalling deadlock out from under the session
        {
            let current = s.current.lock();
            current
                .as_ref()
                .unwrap()
                .set_error(crate::xa::branch_state::RmErrorCode::Deadlock);
        }
        assert_eq!(s.xa_end(&xid(b"a")), Err(XaError::RbDeadlock));
        assert_eq!(
            s.xa_prepare(&xid(b"a")),
            Err(XaError::RmFail { state: XaPhase::RollbackOnly })
        );
        s.xa_rollback(xid(b"a")).unwrap();
    }

    #[test]
    fn end_and_prepare_reject_a_mismatched_xid() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm, None);
        let s = session(coord, 1);

        s.xa_start(xid(b"a")).unwrap();
        assert_eq!(s.xa_end(&xid(b"wrong")), Err(XaError::Nota));
        // the branch is still ACTIVE: the mismatch must not have ended it.
        s.xa_end(&xid(b"a")).unwrap();
        assert_eq!(s.xa_prepare(&xid(b"wrong")), Err(XaError::Nota));
        s.xa_prepare(&xid(b"a")).unwrap();
    }

    #[test]
    fn one_phase_commit() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm.clone(), None);
        let s = session(coord.clone(), 1);

        s.xa_start(xid(b"b")).unwrap();
        s.xa_end(&xid(b"b")).unwrap();
        s.xa_commit(xid(b"b"), true).unwrap();

        assert!(coord.registry().is_empty());
    }

    #[test]
    fn two_phase_commit_delegates_to_coordinator_log_when_present() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let log = Arc::new(FakeCoordinatorLog::new());
        let coord = coordinator(rm.clone(), Some(log.clone()));
        let s = session(coord, 1);

        s.xa_start(xid(b"a")).unwrap();
        s.xa_end(&xid(b"a")).unwrap();
        s.xa_prepare(&xid(b"a")).unwrap();
        s.xa_commit(xid(b"a"), false).unwrap();

        assert_eq!(log.commit_count(), 1);
        // tc_log owns the decision; no direct RM commit_by_xid call is made.
        assert!(rm.committed_xids().is_empty());
    }

    #[test]
    fn foreign_xid_recovered_then_committed_by_a_fresh_session() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm.clone(), None);
        let f = xid(b"foreign");
        coord.registry().insert_recovered(f.clone());

        let rows = session(coord.clone(), 1).xa_recover();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, f.recover_row_data());

        let s2 = session(coord.clone(), 2);
        s2.xa_commit(f.clone(), false).unwrap();
        assert!(coord.registry().is_empty());
        assert!(rm.committed_xids().contains(&f.key()));
    }

    #[test]
    fn recover_lists_only_prepared_branches() {
        let rm = Arc::new(FakeResourceManager::new("rm"));
        let coord = coordinator(rm, None);
        let s = session(coord.clone(), 1);
        s.xa_start(xid(b"a")).unwrap();
        assert!(s.xa_recover().is_empty());
        s.xa_end(&xid(b"a")).unwrap();
        s.xa_prepare(&xid(b"a")).unwrap();
        assert_eq!(s.xa_recover().len(), 1);
    }

    #[test]
    fn start_option_join_is_unsupported() {
        assert_eq!(
            check_start_option(StartOption::Join),
            Err(XaError::Inval { option: "JOIN" })
        );
        assert!(check_start_option(StartOption::None).is_ok());
    }

    #[test]
    fn end_option_suspend_is_unsupported() {
        assert!(check_end_option(EndOption::Suspend).is_err());
        assert!(check_end_option(EndOption::None).is_ok());
    }
}
