//! Explicit, constructed-not-global XA configuration.

use std::time::Duration;

/// What crash recovery does with a branch it cannot resolve via a quorum
/// read of the coordinator log or a single-engine dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// Leave unresolved branches `PREPARED`; require an operator to call
    /// `XA COMMIT`/`XA ROLLBACK` by hand.
    None,
    /// Force-commit anything recovery cannot otherwise resolve.
    Commit,
    /// Force-rollback anything recovery cannot otherwise resolve.
    Rollback,
}

impl Default for Heuristic {
    fn default() -> Self {
        Heuristic::None
    }
}

/// Tunables for one coordinator instance. Constructed explicitly by the
/// embedding server at startup; never a process-wide singleton.
#[derive(Debug, Clone)]
pub struct XaConfig {
    /// This server's tag, stamped into XIDs generated via
    /// [`Xid::generate_owned`](super::xid::Xid::generate_owned) and checked
    /// against during recovery to tell owned branches from foreign ones.
    pub server_tag: u32,
    /// How long `XA COMMIT`/`XA ROLLBACK` wait for the metadata lock before
    /// giving up.
    pub lock_wait_timeout: Duration,
    /// The crash-recovery heuristic policy.
    pub tc_heuristic: Heuristic,
    /// Upper bound on the per-pass recovery scan buffer.
    pub max_xid_list_size: usize,
    /// Lower bound recovery will still retry at before giving up with
    /// `XaError::RecoveryBufferExhausted`.
    pub min_xid_list_size: usize,
}

impl Default for XaConfig {
    fn default() -> Self {
        Self {
            server_tag: 0,
            lock_wait_timeout: Duration::from_secs(50),
            tc_heuristic: Heuristic::default(),
            max_xid_list_size: crate::common::MAX_XID_LIST_SIZE,
            min_xid_list_size: crate::common::MIN_XID_LIST_SIZE,
        }
    }
}
