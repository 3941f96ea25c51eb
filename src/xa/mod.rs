//! XA (two-phase commit) transaction coordination.
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`xid`] | The branch identifier value type. |
//! | [`branch_state`] | Per-session phase and the asynchronous-error latch. |
//! | [`registry`] | Process-wide XID → branch mapping. |
//! | [`resource_manager`] | The RM collaborator trait. |
//! | [`fanout`] | Drives prepare/commit/rollback/recover across all RMs. |
//! | [`tc_log`] | The coordinator's own durable commit decision log. |
//! | [`mdl`] | Metadata lock gating commit of a prepared branch. |
//! | [`stats`] | Coordinator-wide counters. |
//! | [`config`] | Explicit, per-instance tunables. |
//! | [`recovery`] | Startup crash recovery. |
//! | [`session`] | The user-facing `XA` verbs. |
//! | [`error`] | XA-specific error codes. |

pub mod branch_state;
pub mod config;
pub mod error;
pub mod fanout;
pub mod mdl;
pub mod recovery;
pub mod registry;
pub mod resource_manager;
pub mod session;
pub mod stats;
pub mod tc_log;
pub mod xid;

pub use branch_state::{BranchState, RmErrorCode, XaPhase};
pub use config::{Heuristic, XaConfig};
pub use error::{XaError, XaResult};
pub use fanout::RmFanout;
pub use mdl::MetadataLockManager;
pub use recovery::{recover, CommitList, CrashRecovery};
pub use registry::XidRegistry;
pub use resource_manager::{ResourceManager, RmState};
pub use session::{LocalTransaction, RecoverRow, XaCoordinator, XaSession};
pub use stats::XaStats;
pub use tc_log::CoordinatorLog;
pub use xid::Xid;
