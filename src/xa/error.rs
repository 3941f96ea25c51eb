//! XA-specific error types.
//!
//! One variant per error code in the X/Open XA protocol this coordinator surfaces.
//! Names follow the protocol's own opaque identifiers (`XAER_*`, `XA_RB*`) rather
//! than free-form prose, since external transaction managers match on them.

use thiserror::Error;

use super::branch_state::XaPhase;

/// Result type alias for XA coordinator operations.
pub type XaResult<T> = std::result::Result<T, XaError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XaError {
    /// `XAER_NOTA`: the named xid is not known to this coordinator.
    #[error("XAER_NOTA: xid not found")]
    Nota,

    /// `XAER_DUPID`: an xid with the same key is already registered.
    #[error("XAER_DUPID: xid already registered")]
    Dupid,

    /// `XAER_RMFAIL`: the verb's precondition on the current phase was violated.
    #[error("XAER_RMFAIL: branch is in state {state:?}")]
    RmFail { state: XaPhase },

    /// `XAER_INVAL`: an unsupported option (JOIN, SUSPEND, FOR MIGRATE) was requested.
    #[error("XAER_INVAL: unsupported option '{option}'")]
    Inval { option: &'static str },

    /// `XAER_OUTSIDE`: `XA START` was issued while a local transaction was already active.
    #[error("XAER_OUTSIDE: cannot start an XA transaction inside an active local transaction")]
    Outside,

    /// `XAER_RMERR`: an RM call failed outright (lock timeout, I/O error, ...).
    #[error("XAER_RMERR: resource manager call failed: {reason}")]
    RmErr { reason: String },

    /// `XA_RBROLLBACK`: the branch was rolled back for an unspecified reason.
    #[error("XA_RBROLLBACK: branch was rolled back")]
    RbRollback,

    /// `XA_RBTIMEOUT`: the branch was rolled back after a lock-wait timeout.
    #[error("XA_RBTIMEOUT: branch was rolled back after a lock-wait timeout")]
    RbTimeout,

    /// `XA_RBDEADLOCK`: the branch was rolled back after deadlock detection selected it as victim.
    #[error("XA_RBDEADLOCK: branch was rolled back after deadlock detection")]
    RbDeadlock,

    /// Recovery must abort the server startup: the `ROLLBACK` heuristic was requested
    /// with more than one 2PC-capable engine, which is unsafe.
    #[error("unsafe recovery: ROLLBACK heuristic is unsafe with more than one 2PC-capable engine")]
    UnsafeRollbackHeuristic,

    /// Recovery must abort: even the minimum recovery scan buffer could not be allocated.
    #[error("recovery failed: could not allocate a recovery scan buffer of even {min} entries")]
    RecoveryBufferExhausted { min: usize },

    /// Recovery must abort: a dry run (no commit list, no heuristic) found owned prepared
    /// XIDs, meaning the coordinator log was lost and no resolution policy is available.
    #[error(
        "recovery failed: found {count} prepared transaction(s) with no coordinator log or \
         --tc-heuristic-recover policy; restart with a heuristic to resolve them"
    )]
    CriticalRecoveryInfoMissing { count: usize },
}

impl XaError {
    /// True for the `XA_RB*` family: the branch is/was rolled back, as opposed to a
    /// plain protocol violation or RM failure.
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            XaError::RbRollback | XaError::RbTimeout | XaError::RbDeadlock
        )
    }
}
