// XA coordinator end-to-end scenarios.
//
// Each test below corresponds to one of the concrete scenarios the XA state
// machine and crash recovery algorithm must satisfy.

use std::collections::HashSet;
use std::sync::Arc;

use rustydb_xa::xa::mdl::testing::FakeMetadataLockManager;
use rustydb_xa::xa::recovery::{recover, CommitList};
use rustydb_xa::xa::resource_manager::testing::FakeResourceManager;
use rustydb_xa::xa::resource_manager::ResourceManager;
use rustydb_xa::xa::session::testing::FakeLocalTransaction;
use rustydb_xa::xa::tc_log::testing::FakeCoordinatorLog;
use rustydb_xa::xa::{XaCoordinator, XaConfig, XaError, XaPhase, XaSession, XaStats, Xid, XidRegistry, RmFanout};

fn xid(tag: &[u8]) -> Xid {
    Xid::new(1, tag.to_vec(), vec![]).unwrap()
}

fn build_coordinator(
    rms: Vec<Arc<dyn ResourceManager>>,
    tc_log: Option<Arc<FakeCoordinatorLog>>,
) -> Arc<XaCoordinator> {
    let mut fanout = RmFanout::new();
    for rm in rms {
        fanout.register(rm);
    }
    Arc::new(XaCoordinator::new(
        Arc::new(XidRegistry::new()),
        Arc::new(fanout),
        tc_log.map(|l| l as Arc<_>),
        Arc::new(FakeMetadataLockManager::new()),
        XaConfig::default(),
    ))
}

fn new_session(coordinator: Arc<XaCoordinator>, id: u64) -> XaSession {
    XaSession::new(coordinator, id, Arc::new(FakeLocalTransaction::new()))
}

#[test]
fn scenario_happy_two_phase_commit() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm.clone()], None);
    let session = new_session(coordinator.clone(), 1);

    session.xa_start(xid(b"a")).unwrap();
    session.xa_end(&xid(b"a")).unwrap();
    session.xa_prepare(&xid(b"a")).unwrap();
    session.xa_commit(xid(b"a"), false).unwrap();

    assert!(coordinator.registry().is_empty());
    assert_eq!(rm.committed_xids().len(), 1);
}

#[test]
fn scenario_duplicate_start_is_rejected() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm], None);
    let s1 = new_session(coordinator.clone(), 1);
    let s2 = new_session(coordinator, 2);

    s1.xa_start(xid(b"a")).unwrap();
    assert_eq!(s2.xa_start(xid(b"a")), Err(XaError::Dupid));
}

#[test]
fn scenario_async_deadlock_poisons_then_recovers_via_rollback() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm], None);
    let session = new_session(coordinator.clone(), 1);

    session.xa_start(xid(b"a")).unwrap();

    // An RM reports an asynchronous deadlock while the branch is still ACTIVE.
    coordinator
        .registry()
        .lookup(&xid(b"a").key())
        .unwrap()
        .set_error(rustydb_xa::xa::RmErrorCode::Deadlock);

    assert_eq!(session.xa_end(&xid(b"a")), Err(XaError::RbDeadlock));
    assert_eq!(
        session.xa_prepare(&xid(b"a")),
        Err(XaError::RmFail { state: XaPhase::RollbackOnly })
    );
    session.xa_rollback(xid(b"a")).unwrap();
    assert!(coordinator.registry().is_empty());
}

#[test]
fn scenario_one_phase_commit() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm], None);
    let session = new_session(coordinator.clone(), 1);

    session.xa_start(xid(b"b")).unwrap();
    session.xa_end(&xid(b"b")).unwrap();
    session.xa_commit(xid(b"b"), true).unwrap();

    assert!(coordinator.registry().is_empty());
}

#[test]
fn scenario_recovery_single_engine_auto_rollback_is_safe() {
    // A single 2PC-capable engine makes ROLLBACK always safe, so recovery
    // forces it automatically instead of failing as a dry run would.
    let rm = Arc::new(FakeResourceManager::new("engine"));
    rm.seed_prepared(vec![Xid::generate_owned(0)]);

    let mut fanout = RmFanout::new();
    fanout.register(rm.clone());
    let registry = XidRegistry::new();
    let config = XaConfig::default();
    let stats = XaStats::new();

    recover(&fanout, &registry, &config, &stats, None).unwrap();
    assert_eq!(rm.rolled_back_xids().len(), 1);
    assert!(registry.is_empty());
}

#[test]
fn scenario_recovery_dry_run_fails_on_owned_xid() {
    // Two 2PC-capable engines rules out the single-engine auto-rollback
    // shortcut; with no commit list and no heuristic, an owned prepared xid
    // cannot be safely resolved and recovery must fail.
    let a = Arc::new(FakeResourceManager::new("a"));
    a.seed_prepared(vec![Xid::generate_owned(0)]);
    let b = Arc::new(FakeResourceManager::new("b"));

    let mut fanout = RmFanout::new();
    fanout.register(a);
    fanout.register(b);
    let registry = XidRegistry::new();
    let config = XaConfig::default();
    let stats = XaStats::new();

    let err = recover(&fanout, &registry, &config, &stats, None).unwrap_err();
    assert_eq!(err, XaError::CriticalRecoveryInfoMissing { count: 1 });
}

#[test]
fn scenario_recovery_with_commit_list() {
    let commit_me = Xid::generate_owned(0);
    let rollback_me = Xid::generate_owned(0);

    let a = Arc::new(FakeResourceManager::new("a"));
    a.seed_prepared(vec![commit_me.clone()]);
    let b = Arc::new(FakeResourceManager::new("b"));
    b.seed_prepared(vec![rollback_me.clone()]);

    let mut fanout = RmFanout::new();
    fanout.register(a.clone());
    fanout.register(b.clone());
    let registry = XidRegistry::new();
    let config = XaConfig::default();
    let stats = XaStats::new();

    let mut keys = HashSet::new();
    keys.insert(commit_me.key());

    recover(&fanout, &registry, &config, &stats, Some(CommitList::new(keys))).unwrap();

    assert!(a.committed_xids().contains(&commit_me.key()));
    assert!(b.rolled_back_xids().contains(&rollback_me.key()));
    assert!(registry.is_empty());
}

#[test]
fn scenario_foreign_xid_survives_recovery_and_is_committed_by_external_tm() {
    let foreign = xid(b"external-tm-owns-this");
    let rm = Arc::new(FakeResourceManager::new("engine"));
    rm.seed_prepared(vec![foreign.clone()]);

    let mut fanout = RmFanout::new();
    fanout.register(rm.clone());
    let registry = Arc::new(XidRegistry::new());
    let config = XaConfig::default();
    let stats = XaStats::new();
    recover(&fanout, &registry, &config, &stats, None).unwrap();

    let coordinator = Arc::new(XaCoordinator::with_stats(
        registry,
        Arc::new(fanout),
        None,
        Arc::new(FakeMetadataLockManager::new()),
        config,
        Arc::new(stats),
    ));

    assert_eq!(coordinator.stats().recovered_foreign(), 1);

    let session = new_session(coordinator.clone(), 42);
    let rows = session.xa_recover();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data, foreign.recover_row_data());

    session.xa_commit(foreign.clone(), false).unwrap();
    assert!(coordinator.registry().is_empty());
    assert!(rm.committed_xids().contains(&foreign.key()));
}

#[test]
fn law_l1_commit_round_trip_leaves_no_trace() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm], None);
    let session = new_session(coordinator.clone(), 1);

    session.xa_start(xid(b"l1")).unwrap();
    session.xa_end(&xid(b"l1")).unwrap();
    session.xa_prepare(&xid(b"l1")).unwrap();
    session.xa_commit(xid(b"l1"), false).unwrap();

    assert!(coordinator.registry().is_empty());
}

#[test]
fn law_l2_rollback_round_trip_leaves_no_trace() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm], None);
    let session = new_session(coordinator.clone(), 1);

    session.xa_start(xid(b"l2")).unwrap();
    session.xa_end(&xid(b"l2")).unwrap();
    session.xa_rollback(xid(b"l2")).unwrap();

    assert!(coordinator.registry().is_empty());
}

#[test]
fn law_l3_prepared_branch_is_listed_by_recover() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm], None);
    let session = new_session(coordinator, 1);

    session.xa_start(xid(b"l3")).unwrap();
    session.xa_end(&xid(b"l3")).unwrap();
    session.xa_prepare(&xid(b"l3")).unwrap();

    let rows = session.xa_recover();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data, xid(b"l3").recover_row_data());
}

#[test]
fn two_phase_commit_uses_coordinator_log_when_present() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let log = Arc::new(FakeCoordinatorLog::new());
    let coordinator = build_coordinator(vec![rm.clone()], Some(log.clone()));
    let session = new_session(coordinator.clone(), 1);

    session.xa_start(xid(b"a")).unwrap();
    session.xa_end(&xid(b"a")).unwrap();
    session.xa_prepare(&xid(b"a")).unwrap();
    session.xa_commit(xid(b"a"), false).unwrap();

    assert_eq!(log.commit_count(), 1);
    assert!(rm.committed_xids().is_empty());
}

#[test]
fn concurrent_sessions_each_own_a_distinct_branch() {
    let rm = Arc::new(FakeResourceManager::new("engine"));
    let coordinator = build_coordinator(vec![rm.clone()], None);

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let coordinator = coordinator.clone();
            std::thread::spawn(move || {
                let session = new_session(coordinator, i);
                let x = xid(format!("thread-{i}").as_bytes());
                session.xa_start(x.clone()).unwrap();
                session.xa_end(&x).unwrap();
                session.xa_prepare(&x).unwrap();
                session.xa_commit(x, false).unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(coordinator.registry().is_empty());
    assert_eq!(rm.committed_xids().len(), 8);
}
