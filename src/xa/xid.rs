//! The XA transaction branch identifier.
//!
//! Mirrors the X/Open `XID` struct: a format identifier plus two byte strings
//! (`gtrid`, the global transaction id, and `bqual`, the branch qualifier) whose
//! combined length is bounded by [`XID_DATA_SIZE`](crate::common::XID_DATA_SIZE).

use serde::{Deserialize, Serialize};

use crate::common::XID_DATA_SIZE;

/// Format id this coordinator stamps on XIDs it generates itself (as opposed to
/// ones handed to it by an external transaction manager). Arbitrary but fixed, so
/// that `Xid::owner_tag` can tell "ours" from "foreign" without extra bookkeeping.
const OWNED_FORMAT_ID: i32 = 0x4D58_5852; // ASCII "MXXR"

/// A distributed transaction branch identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    gtrid: Vec<u8>,
    bqual: Vec<u8>,
}

impl Xid {
    /// Builds an XID, rejecting one whose `gtrid`+`bqual` exceed
    /// [`XID_DATA_SIZE`](crate::common::XID_DATA_SIZE).
    pub fn new(format_id: i32, gtrid: Vec<u8>, bqual: Vec<u8>) -> Option<Self> {
        if gtrid.len() + bqual.len() > XID_DATA_SIZE {
            return None;
        }
        Some(Self {
            format_id,
            gtrid,
            bqual,
        })
    }

    /// Generates an XID this coordinator can later recognize as its own during
    /// crash recovery (see [`owner_tag`](Self::owner_tag)).
    pub fn generate_owned(server_tag: u32) -> Self {
        let mut gtrid = server_tag.to_be_bytes().to_vec();
        gtrid.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self {
            format_id: OWNED_FORMAT_ID,
            gtrid,
            bqual: Vec::new(),
        }
    }

    pub fn gtrid(&self) -> &[u8] {
        &self.gtrid
    }

    pub fn bqual(&self) -> &[u8] {
        &self.bqual
    }

    pub fn gtrid_length(&self) -> usize {
        self.gtrid.len()
    }

    pub fn bqual_length(&self) -> usize {
        self.bqual.len()
    }

    /// The registry key: `formatID || gtrid || bqual`. Two XIDs are the same
    /// branch iff their keys are equal.
    pub fn key(&self) -> Vec<u8> {
        let mut k = Vec::with_capacity(4 + self.gtrid.len() + self.bqual.len());
        k.extend_from_slice(&self.format_id.to_be_bytes());
        k.extend_from_slice(&self.gtrid);
        k.extend_from_slice(&self.bqual);
        k
    }

    /// If this XID was generated by [`generate_owned`](Self::generate_owned), the
    /// server tag it was stamped with; `None` for XIDs that came from an external
    /// transaction manager (the "foreign" case in crash recovery).
    pub fn owner_tag(&self) -> Option<u32> {
        if self.format_id != OWNED_FORMAT_ID || self.gtrid.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            self.gtrid[0],
            self.gtrid[1],
            self.gtrid[2],
            self.gtrid[3],
        ]))
    }

    /// True iff this server (identified by `server_tag`) produced this XID.
    /// Foreign XIDs (produced by an external TM) are never owned.
    pub fn is_owned_by(&self, server_tag: u32) -> bool {
        self.owner_tag() == Some(server_tag)
    }

    /// True iff every byte of `gtrid || bqual` is a printable ASCII character
    /// (`[32, 127]`), in which case `XA RECOVER` reports the raw bytes rather
    /// than a hex dump.
    pub fn is_printable(&self) -> bool {
        self.gtrid
            .iter()
            .chain(self.bqual.iter())
            .all(|&b| (32..=127).contains(&b))
    }

    /// The `data` column `XA RECOVER` reports: raw bytes when printable,
    /// otherwise `"0x"` followed by lowercase hex of `gtrid || bqual`.
    pub fn recover_row_data(&self) -> Vec<u8> {
        if self.is_printable() {
            let mut data = self.gtrid.clone();
            data.extend_from_slice(&self.bqual);
            data
        } else {
            let mut data = self.gtrid.clone();
            data.extend_from_slice(&self.bqual);
            format!("0x{}", hex::encode(data)).into_bytes()
        }
    }
}

impl PartialEq for Xid {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Xid {}

impl std::hash::Hash for Xid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_xid() {
        assert!(Xid::new(1, vec![0; 100], vec![0; 29]).is_none());
        assert!(Xid::new(1, vec![0; 100], vec![0; 28]).is_some());
    }

    #[test]
    fn key_distinguishes_equal_total_length_splits() {
        let a = Xid::new(1, vec![1, 2], vec![3]).unwrap();
        let b = Xid::new(1, vec![1], vec![2, 3]).unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn printable_xid_reports_raw_bytes() {
        let xid = Xid::new(1, b"gtrid1".to_vec(), b"bq".to_vec()).unwrap();
        assert!(xid.is_printable());
        assert_eq!(xid.recover_row_data(), b"gtrid1bq".to_vec());
    }

    #[test]
    fn non_printable_xid_reports_hex() {
        let xid = Xid::new(1, vec![0x00, 0xff], vec![]).unwrap();
        assert!(!xid.is_printable());
        assert_eq!(xid.recover_row_data(), b"0x00ff".to_vec());
    }

    #[test]
    fn owned_xid_round_trips_tag() {
        let xid = Xid::generate_owned(42);
        assert_eq!(xid.owner_tag(), Some(42));
        assert!(xid.is_owned_by(42));
        assert!(!xid.is_owned_by(7));
    }

    #[test]
    fn externally_provided_xid_is_foreign() {
        let xid = Xid::new(1, b"external-gtrid".to_vec(), vec![]).unwrap();
        assert_eq!(xid.owner_tag(), None);
        assert!(!xid.is_owned_by(0));
    }
}
