//! Fans `PREPARE`/`COMMIT`/`ROLLBACK`/`RECOVER` out across every registered,
//! 2PC-capable resource manager.

use std::sync::Arc;

use tracing::warn;

use super::error::XaError;
use super::resource_manager::ResourceManager;
use super::xid::Xid;
use crate::common::SessionId;

/// The set of RMs this coordinator drives. Order is registration order;
/// recovery and commit/rollback fanout both iterate it the same way.
#[derive(Default)]
pub struct RmFanout {
    rms: Vec<Arc<dyn ResourceManager>>,
}

impl RmFanout {
    pub fn new() -> Self {
        Self { rms: Vec::new() }
    }

    pub fn register(&mut self, rm: Arc<dyn ResourceManager>) {
        self.rms.push(rm);
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<dyn ResourceManager>> {
        self.rms.iter().filter(|rm| rm.is_2pc_capable())
    }

    /// Prepares the session's branch on every enabled RM. Stops at the first
    /// failure: the caller is responsible for rolling back whatever already
    /// prepared (per §4.3, a failed prepare never leaves partial state
    /// committed).
    pub fn prepare_all(&self, session: SessionId) -> Result<(), XaError> {
        for rm in self.enabled() {
            rm.prepare(session)?;
        }
        Ok(())
    }

    /// One-phase commit: a single `commit_trans` call per RM, session-scoped.
    pub fn commit_trans_all(&self, session: SessionId) -> Result<(), XaError> {
        for rm in self.enabled() {
            rm.commit_trans(session, true)?;
        }
        Ok(())
    }

    /// Rollback of the session's local branch on every enabled RM.
    pub fn rollback_trans_all(&self, session: SessionId) -> Result<(), XaError> {
        for rm in self.enabled() {
            rm.rollback_trans(session, true)?;
        }
        Ok(())
    }

    /// Two-phase commit by xid across every enabled RM. Keeps going after a
    /// per-RM failure (the branch is already durably prepared everywhere; a
    /// single RM's commit failure does not undo the others), logging each one
    /// and returning the first error to the caller once the fanout completes.
    pub fn commit_all(&self, xid: &Xid) -> Result<(), XaError> {
        let mut first_err = None;
        for rm in self.enabled() {
            if let Err(e) = rm.commit_by_xid(xid) {
                warn!(rm = rm.name(), error = %e, "resource manager commit_by_xid failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Two-phase rollback by xid across every enabled RM, same fanout
    /// semantics as [`commit_all`](Self::commit_all).
    pub fn rollback_all(&self, xid: &Xid) -> Result<(), XaError> {
        let mut first_err = None;
        for rm in self.enabled() {
            if let Err(e) = rm.rollback_by_xid(xid) {
                warn!(rm = rm.name(), error = %e, "resource manager rollback_by_xid failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drains up to `max` prepared XIDs from every enabled RM's own durable
    /// log, tagging each with the RM index it came from so recovery can
    /// resolve a branch on the same RM it was discovered on.
    pub fn recover_all(&self, max: usize) -> Vec<(usize, Xid)> {
        let mut out = Vec::new();
        for (idx, rm) in self.enabled().enumerate() {
            for xid in rm.recover(max) {
                out.push((idx, xid));
            }
        }
        out
    }

    pub fn rm_at(&self, idx: usize) -> Option<&Arc<dyn ResourceManager>> {
        self.enabled().nth(idx)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xa::resource_manager::testing::FakeResourceManager;

    fn xid() -> Xid {
        Xid::new(1, b"g".to_vec(), vec![]).unwrap()
    }

    #[test]
    fn prepare_all_stops_at_first_failure() {
        let mut fanout = RmFanout::new();
        let a = Arc::new(FakeResourceManager::new("a"));
        let b = Arc::new(FakeResourceManager::new("b"));
        a.set_fail_prepare(true);
        fanout.register(a.clone());
        fanout.register(b.clone());

        assert!(fanout.prepare_all(1).is_err());
        assert!(b.calls().is_empty());
    }

    #[test]
    fn commit_all_continues_past_failures_and_reports_first() {
        let mut fanout = RmFanout::new();
        let a = Arc::new(FakeResourceManager::new("a"));
        let b = Arc::new(FakeResourceManager::new("b"));
        fanout.register(a.clone());
        fanout.register(b.clone());

        assert!(fanout.commit_all(&xid()).is_ok());
        assert_eq!(a.committed_xids().len(), 1);
        assert_eq!(b.committed_xids().len(), 1);
    }

    #[test]
    fn disabled_rms_are_skipped() {
        let mut fanout = RmFanout::new();
        let disabled = Arc::new(FakeResourceManager::disabled("off"));
        fanout.register(disabled.clone());
        assert_eq!(fanout.enabled_count(), 0);
        fanout.prepare_all(1).unwrap();
        assert!(disabled.calls().is_empty());
    }
}
