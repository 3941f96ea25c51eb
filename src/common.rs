// # Common Types
//
// Shared identifier types used across the coordinator. Kept deliberately small: the
// full catalog of database-wide identifiers (TableId, PageId, ...) belongs to the
// storage/catalog subsystems this crate does not implement.

/// Identifier for a client session driving the XA state machine.
pub type SessionId = u64;

/// Identifier for a local (non-distributed) transaction inside one RM.
pub type TransactionId = u64;

/// Node identifier, used only as the server-ownership tag embedded in generated XIDs.
pub type NodeId = u32;

/// Maximum combined length of `gtrid` + `bqual` in an XID, per the X/Open XA spec.
pub const XID_DATA_SIZE: usize = 128;

/// Upper bound on the recovery scan batch size (halved down to `MIN_XID_LIST_SIZE`
/// until an allocation of that size succeeds).
pub const MAX_XID_LIST_SIZE: usize = 128 * 1024;

/// Smallest recovery scan batch size worth attempting; below this, recovery aborts.
pub const MIN_XID_LIST_SIZE: usize = 128;
