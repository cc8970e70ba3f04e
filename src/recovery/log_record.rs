use bincode::Options;
use serde::{Deserialize, Serialize};

use super::log_manager::{Lsn, UNKNOWN_LSN};
use crate::error::TxnError;

/// Encoded size of a state change record: an i64 txn id followed by an
/// i32 state tag, both big-endian.
pub const STATE_CHANGE_RECORD_SIZE: usize = 12;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Begin,
    Commit,
    Abort,
}

/// Marker logged for every transaction state transition.
///
/// For COMMIT and ABORT the txn id is the transaction's start LSN. A BEGIN
/// is logged before the transaction has an identity (its identity *is* the
/// LSN the append returns), so it carries `UNKNOWN_LSN`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeRecord {
    txn_id: i64,
    state: StateChange,
}

impl StateChangeRecord {
    pub fn begin() -> Self {
        Self {
            txn_id: UNKNOWN_LSN as i64,
            state: StateChange::Begin,
        }
    }

    pub fn commit(start_lsn: Lsn) -> Self {
        Self {
            txn_id: start_lsn as i64,
            state: StateChange::Commit,
        }
    }

    pub fn abort(start_lsn: Lsn) -> Self {
        Self {
            txn_id: start_lsn as i64,
            state: StateChange::Abort,
        }
    }

    pub fn txn_id(&self) -> Lsn {
        self.txn_id as Lsn
    }

    pub fn state(&self) -> StateChange {
        self.state
    }

    // The WAL frames and versions records; the payload itself is fixed
    // layout so a recovery pass can read it without a schema.
    fn codec() -> impl Options {
        bincode::options().with_big_endian().with_fixint_encoding()
    }

    pub fn encode(&self) -> Result<Vec<u8>, TxnError> {
        Ok(Self::codec().serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TxnError> {
        Ok(Self::codec().deserialize(bytes)?)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn wire_format_is_big_endian() {
        let record = StateChangeRecord::commit(0x0102030405060708);
        let bytes = record.encode().unwrap();

        assert_eq!(bytes.len(), STATE_CHANGE_RECORD_SIZE);
        // txn id first, most significant byte first.
        assert_eq!(&bytes[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // 0=BEGIN, 1=COMMIT, 2=ABORT.
        assert_eq!(&bytes[8..], &[0, 0, 0, 1]);
    }

    #[test]
    fn begin_carries_unknown_lsn() {
        let record = StateChangeRecord::begin();
        assert_eq!(record.txn_id(), UNKNOWN_LSN);
        assert_eq!(record.state(), StateChange::Begin);

        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[..8], &[0; 8]);
        assert_eq!(&bytes[8..], &[0, 0, 0, 0]);
    }

    #[test]
    fn abort_tag() {
        let bytes = StateChangeRecord::abort(9).encode().unwrap();
        assert_eq!(&bytes[8..], &[0, 0, 0, 2]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(StateChangeRecord::decode(&[1, 2, 3]).is_err());
    }

    quickcheck::quickcheck! {
        fn encode_decode_roundtrip(txn_id: u64, tag: u8) -> bool {
            let record = match tag % 3 {
                0 => StateChangeRecord::begin(),
                1 => StateChangeRecord::commit(txn_id),
                _ => StateChangeRecord::abort(txn_id),
            };

            StateChangeRecord::decode(&record.encode().unwrap()).unwrap() == record
        }
    }
}
