use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::TxnError;
use crate::recovery::{Lsn, UNKNOWN_LSN};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// A single data modification accumulated by the operation layer. The
/// core never interprets the payload; it only orders and compares entry
/// ids.
#[derive(Debug)]
pub struct LogEdit<ID> {
    pub entry_id: ID,
    pub payload: Vec<u8>,
}

impl<ID> LogEdit<ID> {
    pub fn new(entry_id: ID, payload: Vec<u8>) -> Self {
        Self { entry_id, payload }
    }
}

/// Total order over entry identifiers, configured once at manager
/// construction. Upper layers use it to order edits; the write-set
/// verifier uses it to detect overlap.
pub trait IdComparator<ID>: Send + Sync {
    fn compare(&self, a: &ID, b: &ID) -> CmpOrdering;
}

/// Codec for entry identifiers, configured once at manager construction.
pub trait IdSerializer<ID>: Send + Sync {
    fn to_bytes(&self, id: &ID) -> Result<Vec<u8>, TxnError>;
    fn from_bytes(&self, bytes: &[u8]) -> Result<ID, TxnError>;
}

/// The natural `Ord` ordering of the id type.
pub struct NaturalOrder;

impl<ID> IdComparator<ID> for NaturalOrder
where
    ID: Ord + Send + Sync,
{
    fn compare(&self, a: &ID, b: &ID) -> CmpOrdering {
        a.cmp(b)
    }
}

/// bincode-backed id codec, for id types that already derive serde.
pub struct BincodeIdSerializer;

impl<ID> IdSerializer<ID> for BincodeIdSerializer
where
    ID: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_bytes(&self, id: &ID) -> Result<Vec<u8>, TxnError> {
        Ok(bincode::serialize(id)?)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<ID, TxnError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A read-write transaction.
///
/// Its start LSN is the LSN of its BEGIN record and doubles as its
/// identity. The commit LSN stays `UNKNOWN_LSN` until the COMMIT record
/// is appended. After commit the transaction is shared: it sits in the
/// committed queue and in the snapshots of later transactions, and the
/// refcount tracks how many of those snapshots pinned it at begin.
pub struct ReadWriteTxn<ID> {
    start_lsn: Lsn,
    commit_lsn: AtomicU64,
    state: RwLock<TransactionState>,
    snapshot: Vec<Arc<ReadWriteTxn<ID>>>,
    pinned: Option<Arc<ReadWriteTxn<ID>>>,
    edits: RwLock<Vec<LogEdit<ID>>>,
    read_set: RwLock<Vec<ID>>,
    ref_count: AtomicI64,
}

impl<ID> ReadWriteTxn<ID> {
    pub(crate) fn new(
        start_lsn: Lsn,
        snapshot: Vec<Arc<ReadWriteTxn<ID>>>,
        pinned: Option<Arc<ReadWriteTxn<ID>>>,
    ) -> Self {
        Self {
            start_lsn,
            commit_lsn: AtomicU64::new(UNKNOWN_LSN),
            state: RwLock::new(TransactionState::Active),
            snapshot,
            pinned,
            edits: RwLock::new(Vec::new()),
            read_set: RwLock::new(Vec::new()),
            ref_count: AtomicI64::new(0),
        }
    }

    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    pub fn commit_lsn(&self) -> Lsn {
        self.commit_lsn.load(Ordering::SeqCst)
    }

    pub(crate) fn set_commit_lsn(&self, lsn: Lsn) {
        self.commit_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// Committed writers this transaction overlays on base storage,
    /// ascending by commit LSN. Fixed at begin.
    pub fn snapshot(&self) -> &[Arc<ReadWriteTxn<ID>>] {
        &self.snapshot
    }

    pub(crate) fn pinned(&self) -> Option<&Arc<ReadWriteTxn<ID>>> {
        self.pinned.as_ref()
    }

    /// Record a data modification. Edits keep their insertion order.
    pub fn add_edit(&self, edit: LogEdit<ID>) {
        self.edits.write().push(edit);
    }

    /// Record an entry this transaction read, for verifiers that check
    /// read sets.
    pub fn record_read(&self, entry_id: ID) {
        self.read_set.write().push(entry_id);
    }

    pub fn edits(&self) -> RwLockReadGuard<'_, Vec<LogEdit<ID>>> {
        self.edits.read()
    }

    pub fn read_set(&self) -> RwLockReadGuard<'_, Vec<ID>> {
        self.read_set.read()
    }

    pub(crate) fn discard_edits(&self) {
        self.edits.write().clear();
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release_ref(&self) {
        self.ref_count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<ID> fmt::Debug for ReadWriteTxn<ID> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteTxn")
            .field("start_lsn", &self.start_lsn)
            .field("commit_lsn", &self.commit_lsn())
            .field("state", &self.state())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// A read-only transaction: a start LSN and a snapshot, immutable after
/// creation.
pub struct ReadOnlyTxn<ID> {
    start_lsn: Lsn,
    snapshot: Vec<Arc<ReadWriteTxn<ID>>>,
    pinned: Option<Arc<ReadWriteTxn<ID>>>,
}

impl<ID> ReadOnlyTxn<ID> {
    pub(crate) fn new(
        start_lsn: Lsn,
        snapshot: Vec<Arc<ReadWriteTxn<ID>>>,
        pinned: Option<Arc<ReadWriteTxn<ID>>>,
    ) -> Self {
        Self {
            start_lsn,
            snapshot,
            pinned,
        }
    }

    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    pub fn snapshot(&self) -> &[Arc<ReadWriteTxn<ID>>] {
        &self.snapshot
    }

    pub(crate) fn pinned(&self) -> Option<&Arc<ReadWriteTxn<ID>>> {
        self.pinned.as_ref()
    }
}

impl<ID> Clone for ReadOnlyTxn<ID> {
    fn clone(&self) -> Self {
        Self {
            start_lsn: self.start_lsn,
            snapshot: self.snapshot.clone(),
            pinned: self.pinned.clone(),
        }
    }
}

impl<ID> fmt::Debug for ReadOnlyTxn<ID> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyTxn")
            .field("start_lsn", &self.start_lsn)
            .field("snapshot_len", &self.snapshot.len())
            .finish()
    }
}

/// The transaction bound to an execution context.
#[derive(Debug)]
pub enum Transaction<ID> {
    ReadOnly(ReadOnlyTxn<ID>),
    ReadWrite(Arc<ReadWriteTxn<ID>>),
}

impl<ID> Transaction<ID> {
    pub fn start_lsn(&self) -> Lsn {
        match self {
            Transaction::ReadOnly(txn) => txn.start_lsn(),
            Transaction::ReadWrite(txn) => txn.start_lsn(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Transaction::ReadOnly(_))
    }

    pub fn snapshot(&self) -> &[Arc<ReadWriteTxn<ID>>] {
        match self {
            Transaction::ReadOnly(txn) => txn.snapshot(),
            Transaction::ReadWrite(txn) => txn.snapshot(),
        }
    }

    pub(crate) fn pinned(&self) -> Option<&Arc<ReadWriteTxn<ID>>> {
        match self {
            Transaction::ReadOnly(txn) => txn.pinned(),
            Transaction::ReadWrite(txn) => txn.pinned(),
        }
    }

    pub fn as_read_write(&self) -> Option<&Arc<ReadWriteTxn<ID>>> {
        match self {
            Transaction::ReadOnly(_) => None,
            Transaction::ReadWrite(txn) => Some(txn),
        }
    }
}

impl<ID> Clone for Transaction<ID> {
    fn clone(&self) -> Self {
        match self {
            Transaction::ReadOnly(txn) => Transaction::ReadOnly(txn.clone()),
            Transaction::ReadWrite(txn) => Transaction::ReadWrite(txn.clone()),
        }
    }
}
