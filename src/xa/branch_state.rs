//! Per-session XA branch state and its transitions.
//!
//! `BranchState` is shared between the owning session (which drives ordinary
//! transitions) and, potentially, an RM-side callback running on a different
//! thread that reports an asynchronous rollback (lock timeout, deadlock victim
//! selection). The phase lives behind a small mutex; the asynchronous error is a
//! single-slot atomic latch so the reporting thread never blocks on the session.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::XaError;
use super::xid::Xid;

/// The XA branch phase, per the X/Open state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XaPhase {
    /// No active XA transaction.
    Notr,
    Active,
    Idle,
    Prepared,
    /// Poisoned: an RM reported an asynchronous failure. Only `COMMIT`/`ROLLBACK`
    /// (forcing a rollback) can leave this state.
    RollbackOnly,
}

/// The asynchronous-failure codes an RM can latch onto a branch, matching the
/// three buckets `XA_RB*` maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmErrorCode {
    LockTimeout,
    Deadlock,
    Other,
}

impl RmErrorCode {
    fn to_u32(self) -> u32 {
        match self {
            RmErrorCode::LockTimeout => 1,
            RmErrorCode::Deadlock => 2,
            RmErrorCode::Other => 3,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(RmErrorCode::LockTimeout),
            2 => Some(RmErrorCode::Deadlock),
            3 => Some(RmErrorCode::Other),
            _ => None,
        }
    }

    fn into_xa_error(self) -> XaError {
        match self {
            RmErrorCode::LockTimeout => XaError::RbTimeout,
            RmErrorCode::Deadlock => XaError::RbDeadlock,
            RmErrorCode::Other => XaError::RbRollback,
        }
    }
}

struct Inner {
    phase: XaPhase,
    xid: Xid,
}

/// The state record for one XA branch: either owned by a live session, or
/// reconstructed by crash recovery (`in_recovery == true`).
pub struct BranchState {
    inner: Mutex<Inner>,
    rm_error: AtomicU32,
    in_recovery: bool,
}

impl BranchState {
    /// `start_live`: a session begins a new branch.
    pub fn start_live(xid: Xid) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: XaPhase::Active,
                xid,
            }),
            rm_error: AtomicU32::new(0),
            in_recovery: false,
        }
    }

    /// `start_recovery`: crash recovery reconstructs a branch found `PREPARED`
    /// in an RM but not yet resolved.
    pub fn start_recovery(xid: Xid) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: XaPhase::Prepared,
                xid,
            }),
            rm_error: AtomicU32::new(0),
            in_recovery: true,
        }
    }

    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    pub fn phase(&self) -> XaPhase {
        self.inner.lock().phase
    }

    pub fn xid(&self) -> Xid {
        self.inner.lock().xid.clone()
    }

    /// `reset_error`: clears the latch. Called before a forced rollback so the
    /// subsequent RM rollback call does not re-observe a stale poison code.
    pub fn reset_error(&self) {
        self.rm_error.store(0, Ordering::SeqCst);
    }

    /// `set_error`: an RM (possibly on another thread) reports an asynchronous
    /// failure. First non-zero code wins; later calls are no-ops. Only branches
    /// with an active XA transaction (`phase != Notr`) can be poisoned.
    pub fn set_error(&self, code: RmErrorCode) {
        if self.phase() == XaPhase::Notr {
            return;
        }
        let _ = self
            .rm_error
            .compare_exchange(0, code.to_u32(), Ordering::SeqCst, Ordering::SeqCst);
    }

    /// `check_rolled_back`: if an error is latched, maps it to the matching
    /// `XA_RB*` error, forces `phase = ROLLBACK_ONLY`, and returns it. Returns
    /// `None` if the branch was not poisoned. Idempotent: once poisoned, every
    /// subsequent call returns the same mapped error.
    pub fn check_rolled_back(&self) -> Option<XaError> {
        let code = self.rm_error.load(Ordering::SeqCst);
        let code = RmErrorCode::from_u32(code)?;
        self.inner.lock().phase = XaPhase::RollbackOnly;
        Some(code.into_xa_error())
    }

    /// Requires the branch to be in `expected` phase, else `XAER_RMFAIL`.
    pub fn require_phase(&self, expected: XaPhase) -> Result<(), XaError> {
        let phase = self.phase();
        if phase == expected {
            Ok(())
        } else {
            Err(XaError::RmFail { state: phase })
        }
    }

    /// `XA END`: `ACTIVE -> IDLE`, or `ACTIVE -> ROLLBACK_ONLY` if the branch was
    /// poisoned in the meantime.
    pub fn end(&self) -> Result<(), XaError> {
        self.require_phase(XaPhase::Active)?;
        if let Some(err) = self.check_rolled_back() {
            return Err(err);
        }
        self.inner.lock().phase = XaPhase::Idle;
        Ok(())
    }

    /// `XA START ... RESUME`: `IDLE -> ACTIVE`, same xid only.
    pub fn resume(&self, xid: &Xid) -> Result<(), XaError> {
        self.require_phase(XaPhase::Idle)?;
        if self.xid() != *xid {
            return Err(XaError::Nota);
        }
        self.inner.lock().phase = XaPhase::Active;
        Ok(())
    }

    /// Marks the branch `PREPARED` after a successful `ha_prepare` fanout.
    pub fn mark_prepared(&self) {
        self.inner.lock().phase = XaPhase::Prepared;
    }

    /// Forces the branch back to `NOTR`, e.g. after `PREPARE` fails or the
    /// branch is fully committed/rolled back.
    pub fn force_notr(&self) {
        self.inner.lock().phase = XaPhase::Notr;
    }
}

impl std::fmt::Debug for BranchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BranchState")
            .field("phase", &inner.phase)
            .field("xid_key", &hex::encode(inner.xid.key()))
            .field("in_recovery", &self.in_recovery)
            .field("rm_error", &self.rm_error.load(Ordering::SeqCst))
            .finish()
    }
}
