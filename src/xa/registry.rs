//! The process-wide XID registry.
//!
//! A single mutex guards a `HashMap` keyed by `Xid::key()`. Live branches are
//! *borrowed*: the owning session also holds an `Arc` clone and keeps the branch
//! alive independently of the registry. Recovered branches are *owned*: the
//! registry is their only reference, and `remove` is the only thing that frees
//! them. The `Entry` enum exists purely to document this distinction at the type
//! level (see `DESIGN.md`); `Arc`'s reference counting does the actual freeing
//! either way.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::branch_state::{BranchState, XaPhase};
use super::error::XaError;
use super::xid::Xid;

enum Entry {
    Borrowed(Arc<BranchState>),
    Owned(Arc<BranchState>),
}

impl Entry {
    fn branch(&self) -> &Arc<BranchState> {
        match self {
            Entry::Borrowed(b) | Entry::Owned(b) => b,
        }
    }
}

/// The shared XID → `BranchState` map.
#[derive(Default)]
pub struct XidRegistry {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
}

impl XidRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Option<Arc<BranchState>> {
        self.entries.lock().get(key).map(|e| e.branch().clone())
    }

    /// Inserts a session-owned branch. Fails with `XAER_DUPID` if the key is
    /// already present (either live or still-recovering).
    pub fn insert_live(&self, branch: Arc<BranchState>) -> Result<(), XaError> {
        let key = branch.xid().key();
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(XaError::Dupid);
        }
        entries.insert(key, Entry::Borrowed(branch));
        Ok(())
    }

    /// Idempotently inserts a recovery record for `xid`: if one already exists
    /// (this RM or a previous RM already reported it this startup), returns the
    /// existing branch unchanged; otherwise allocates a new `PREPARED`/
    /// `in_recovery` branch and inserts it.
    pub fn insert_recovered(&self, xid: Xid) -> Arc<BranchState> {
        let key = xid.key();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return existing.branch().clone();
        }
        let branch = Arc::new(BranchState::start_recovery(xid));
        entries.insert(key, Entry::Owned(branch.clone()));
        branch
    }

    /// Unconditionally removes the entry for `key`, if present.
    pub fn remove(&self, key: &[u8]) -> Option<Arc<BranchState>> {
        self.entries.lock().remove(key).map(|e| match e {
            Entry::Borrowed(b) | Entry::Owned(b) => b,
        })
    }

    /// Visits every record while the lock is held. The visitor must not block.
    pub fn iterate<F: FnMut(&Xid, &BranchState)>(&self, mut f: F) {
        let entries = self.entries.lock();
        for entry in entries.values() {
            let branch = entry.branch();
            f(&branch.xid(), branch);
        }
    }

    /// `XA RECOVER`: clones the xid of every `PREPARED` branch while the lock is
    /// held, then returns — formatting (hex encoding, printability checks)
    /// happens after the lock is released, so the scan never blocks other XA
    /// verbs for longer than a single pass over the map.
    pub fn snapshot_prepared(&self) -> Vec<Xid> {
        let entries = self.entries.lock();
        entries
            .values()
            .map(Entry::branch)
            .filter(|b| b.phase() == XaPhase::Prepared)
            .map(|b| b.xid())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
