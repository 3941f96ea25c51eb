//! Crash recovery: rediscovers in-doubt branches from every RM's own durable
//! log and resolves them.
//!
//! Three modes, chosen once at startup:
//!
//! - **dry run** — no commit list and no heuristic configured. Branches this
//!   server owns are left untouched; if any are found, recovery fails outright
//!   (nothing else can safely resolve them).
//! - **commit-list driven** — the coordinator's own durable log supplied a set
//!   of keys that are known-committed; anything else owned is rolled back.
//! - **heuristic** — no commit list; every owned branch found is forced to
//!   the configured [`Heuristic`] outcome. A single 2PC-capable RM makes
//!   `Rollback` always safe and is selected automatically; more than one RM
//!   makes `Rollback` unsafe and aborts recovery instead.
//!
//! Foreign branches (xids this server did not generate, §4.1's "XIDs from an
//! external transaction manager") are never resolved here: they are recorded
//! in the registry as `in_recovery` so a later `XA COMMIT`/`XA ROLLBACK` from
//! that external TM can find and resolve them.

use std::collections::HashSet;

use tracing::{error, info, instrument, warn};

use super::config::{Heuristic, XaConfig};
use super::error::XaError;
use super::fanout::RmFanout;
use super::registry::XidRegistry;
use super::stats::XaStats;
use super::xid::Xid;

/// Keys the coordinator's own durable log already knows were committed.
/// Mutually exclusive with a heuristic policy, mirroring the upstream
/// invariant that a commit list and `tc_heuristic_recover` are never both set.
pub struct CommitList(HashSet<Vec<u8>>);

impl CommitList {
    pub fn new(keys: HashSet<Vec<u8>>) -> Self {
        Self(keys)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.0.contains(key)
    }
}

enum Resolution {
    DryRun,
    CommitList(CommitList),
    Heuristic(Heuristic),
}

/// Runs once at server startup, before any session is allowed to issue XA
/// verbs.
pub struct CrashRecovery<'a> {
    fanout: &'a RmFanout,
    registry: &'a XidRegistry,
    config: &'a XaConfig,
    stats: &'a XaStats,
}

impl<'a> CrashRecovery<'a> {
    pub fn new(fanout: &'a RmFanout, registry: &'a XidRegistry, config: &'a XaConfig, stats: &'a XaStats) -> Self {
        Self {
            fanout,
            registry,
            config,
            stats,
        }
    }

    #[instrument(skip(self, commit_list))]
    pub fn run(&self, commit_list: Option<CommitList>) -> Result<(), XaError> {
        let two_pc_capable = self.fanout.enabled_count();
        if two_pc_capable == 0 {
            return Ok(());
        }

        let resolution = self.choose_resolution(commit_list, two_pc_capable)?;

        let mut len = self.config.max_xid_list_size;
        let mut found_foreign = 0usize;
        let mut found_owned_unresolved = 0usize;

        loop {
            if len <= self.config.min_xid_list_size {
                return Err(XaError::RecoveryBufferExhausted {
                    min: self.config.min_xid_list_size,
                });
            }
            // A real allocation failure would be caught by `try_reserve_exact`
            // and fall through to the next, smaller `len`; in-memory here
            // there is nothing to actually allocate, so every size "succeeds."
            if Vec::<Xid>::with_capacity(0).try_reserve_exact(len).is_err() {
                len /= 2;
                continue;
            }
            break;
        }

        for (rm_idx, xid) in self.fanout.recover_all(len) {
            match xid.owner_tag() {
                None => {
                    self.registry.insert_recovered(xid);
                    self.stats.incr_recovered_foreign();
                    found_foreign += 1;
                }
                Some(_) if matches!(resolution, Resolution::DryRun) => {
                    self.registry.insert_recovered(xid);
                    found_owned_unresolved += 1;
                }
                Some(_) => {
                    self.resolve_owned(rm_idx, &xid, &resolution)?;
                    self.stats.incr_recovered_owned();
                }
            }
        }

        if found_foreign > 0 {
            warn!(count = found_foreign, "found prepared XA transactions from an external transaction manager");
        }
        if matches!(resolution, Resolution::DryRun) && found_owned_unresolved > 0 {
            error!(count = found_owned_unresolved, "critical recovery information missing");
            return Err(XaError::CriticalRecoveryInfoMissing {
                count: found_owned_unresolved,
            });
        }
        info!("crash recovery finished");
        Ok(())
    }

    fn choose_resolution(
        &self,
        commit_list: Option<CommitList>,
        two_pc_capable: usize,
    ) -> Result<Resolution, XaError> {
        if let Some(list) = commit_list {
            return Ok(Resolution::CommitList(list));
        }
        if two_pc_capable > 1 {
            if self.config.tc_heuristic == Heuristic::Rollback {
                return Err(XaError::UnsafeRollbackHeuristic);
            }
            if self.config.tc_heuristic == Heuristic::None {
                return Ok(Resolution::DryRun);
            }
            Ok(Resolution::Heuristic(self.config.tc_heuristic))
        } else {
            // A single 2PC-capable engine makes rollback always safe, so it is
            // forced regardless of the configured policy.
            Ok(Resolution::Heuristic(Heuristic::Rollback))
        }
    }

    fn resolve_owned(&self, rm_idx: usize, xid: &Xid, resolution: &Resolution) -> Result<(), XaError> {
        let commit = match resolution {
            Resolution::CommitList(list) => list.contains(&xid.key()),
            Resolution::Heuristic(Heuristic::Commit) => true,
            Resolution::Heuristic(Heuristic::Rollback) => false,
            Resolution::Heuristic(Heuristic::None) | Resolution::DryRun => {
                unreachable!("dry run and None heuristic never reach resolve_owned")
            }
        };
        let rm = self
            .fanout
            .rm_at(rm_idx)
            .expect("rm_idx came from the same fanout's recover_all");
        if commit {
            info!(xid = %hex::encode(xid.key()), "recovering: commit");
            rm.commit_by_xid(xid)
        } else {
            info!(xid = %hex::encode(xid.key()), "recovering: rollback");
            rm.rollback_by_xid(xid)
        }
    }
}

/// Convenience wrapper binding owned references together, used by the
/// embedding server at startup.
pub fn recover(
    fanout: &RmFanout,
    registry: &XidRegistry,
    config: &XaConfig,
    stats: &XaStats,
    commit_list: Option<CommitList>,
) -> Result<(), XaError> {
    CrashRecovery::new(fanout, registry, config, stats).run(commit_list)
}
