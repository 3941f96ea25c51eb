//! Coordinator-wide counters, exposed for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters covering the lifetime of the process. Each field is an
/// independent atomic; readers see a consistent-enough snapshot for
/// diagnostics without needing a lock across all of them.
#[derive(Default)]
pub struct XaStats {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    prepare_failures: AtomicU64,
    commit_failures: AtomicU64,
    recovered_foreign: AtomicU64,
    recovered_owned: AtomicU64,
}

macro_rules! counter {
    ($incr:ident, $get:ident, $field:ident) => {
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl XaStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(incr_started, started, started);
    counter!(incr_committed, committed, committed);
    counter!(incr_rolled_back, rolled_back, rolled_back);
    counter!(incr_prepare_failures, prepare_failures, prepare_failures);
    counter!(incr_commit_failures, commit_failures, commit_failures);
    counter!(incr_recovered_foreign, recovered_foreign, recovered_foreign);
    counter!(incr_recovered_owned, recovered_owned, recovered_owned);
}
