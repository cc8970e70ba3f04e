use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::TxnError;
use crate::recovery::{LogHandle, Lsn, StateChangeRecord, UNKNOWN_LSN};

use super::committed_queue::CommittedQueue;
use super::conflict::{Verifier, VerifyOutcome, WriteSetVerifier};
use super::context;
use super::transaction::{
    IdComparator, IdSerializer, ReadOnlyTxn, ReadWriteTxn, Transaction, TransactionState,
};

/// Coordinates concurrent read-only and read-write transactions over a
/// shared write-ahead log.
///
/// Start and commit timestamps are the LSNs of the BEGIN and COMMIT
/// records, so transaction order is the log's physical order. Every
/// transaction carries a snapshot: the committed writers it must overlay
/// on base storage for correct visibility. Committed writers stay in the
/// committed queue until no live transaction can observe them and their
/// effects are merged into the base, then the retirement sweep drops
/// them.
///
/// One manager is shared by all threads; each thread holds at most one
/// bound transaction at a time.
pub struct TxnManager<ID> {
    /// The log all state change records go through.
    wal: Arc<dyn LogHandle>,

    id_comparator: Arc<dyn IdComparator<ID>>,
    id_serializer: Arc<dyn IdSerializer<ID>>,

    /// Conflict check run at commit, under the verify lock.
    verifier: Arc<dyn Verifier<ID>>,

    /// Committed read-write txns in commit LSN order.
    committed_queue: CommittedQueue<ID>,

    /// Serializes the verification phase across committing writers.
    verify_lock: Mutex<()>,

    /// Serializes BEGIN/COMMIT appends and frontier updates. Always
    /// taken after the verify lock, never before.
    write_txns_lock: Mutex<()>,

    /// Latest committed txn; read-only begins pin this.
    latest_committed: RwLock<Option<Arc<ReadWriteTxn<ID>>>>,

    /// Latest verified txn; read-write begins pin this. Today it is
    /// written together with `latest_committed`, but the slots stay
    /// separate so the sync can move out of the critical section
    /// without an API change.
    latest_verified: RwLock<Option<Arc<ReadWriteTxn<ID>>>>,

    /// Latest LSN whose effects are merged into base storage. Advanced
    /// externally; the core only reads it.
    flushed_baseline: AtomicU64,

    total_committed: AtomicU64,
    total_aborted: AtomicU64,
}

impl<ID> TxnManager<ID>
where
    ID: Send + Sync + 'static,
{
    /// Defaults to write-set verification. Use [`TxnManager::with_verifier`]
    /// to pick another scope.
    pub fn new(
        wal: Arc<dyn LogHandle>,
        id_comparator: Arc<dyn IdComparator<ID>>,
        id_serializer: Arc<dyn IdSerializer<ID>>,
    ) -> Self {
        let verifier = Arc::new(WriteSetVerifier::new(id_comparator.clone()));
        Self::with_verifier(wal, id_comparator, id_serializer, verifier)
    }

    pub fn with_verifier(
        wal: Arc<dyn LogHandle>,
        id_comparator: Arc<dyn IdComparator<ID>>,
        id_serializer: Arc<dyn IdSerializer<ID>>,
        verifier: Arc<dyn Verifier<ID>>,
    ) -> Self {
        Self {
            wal,
            id_comparator,
            id_serializer,
            verifier,
            committed_queue: CommittedQueue::new(),
            verify_lock: Mutex::new(()),
            write_txns_lock: Mutex::new(()),
            latest_committed: RwLock::new(None),
            latest_verified: RwLock::new(None),
            flushed_baseline: AtomicU64::new(UNKNOWN_LSN),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    /// The entry-id ordering configured at construction.
    pub fn id_comparator(&self) -> Arc<dyn IdComparator<ID>> {
        self.id_comparator.clone()
    }

    /// The entry-id codec configured at construction.
    pub fn id_serializer(&self) -> Arc<dyn IdSerializer<ID>> {
        self.id_serializer.clone()
    }

    /// Start a transaction and bind it to the calling thread. The bound
    /// transaction is also returned for convenience; `current` retrieves
    /// it again later.
    pub fn begin(&self, read_only: bool) -> Result<Transaction<ID>, TxnError> {
        if context::is_bound() {
            return Err(TxnError::AlreadyActive);
        }

        let txn = if read_only {
            self.begin_read_only()
        } else {
            self.begin_read_write()?
        };

        context::bind(txn.clone())?;
        Ok(txn)
    }

    /// Finalize the transaction bound to the calling thread. For a
    /// read-write transaction this runs verification, appends the COMMIT
    /// record with sync, and publishes the transaction to readers. On
    /// `ConflictDetected` the transaction has already been aborted and
    /// unbound; the caller may begin a fresh one and retry.
    pub fn commit(&self) -> Result<(), TxnError> {
        let txn = context::take::<ID>().ok_or(TxnError::NoActiveTxn)?;
        self.prepare_for_ending(&txn)?;

        match txn {
            Transaction::ReadOnly(txn) => {
                debug!(start_lsn = txn.start_lsn(), "read-only txn ended");
                Ok(())
            }
            Transaction::ReadWrite(txn) => self.commit_read_write(txn),
        }
    }

    /// Terminate the bound transaction, discarding its edits. Aborting
    /// with nothing bound is a silent success.
    pub fn abort(&self) -> Result<(), TxnError> {
        let Some(txn) = context::take::<ID>() else {
            return Ok(());
        };
        self.prepare_for_ending(&txn)?;

        match txn {
            Transaction::ReadOnly(txn) => {
                debug!(start_lsn = txn.start_lsn(), "read-only txn aborted");
                Ok(())
            }
            Transaction::ReadWrite(txn) => {
                self.total_aborted.fetch_add(1, Ordering::Relaxed);
                debug!(start_lsn = txn.start_lsn(), "read-write txn aborted");
                self.abort_read_write(&txn)
            }
        }
    }

    /// The transaction bound to the calling thread, if any.
    pub fn current(&self) -> Option<Transaction<ID>> {
        context::current::<ID>()
    }

    fn begin_read_only(&self) -> Transaction<ID> {
        let pinned = Self::pin_latest(&self.latest_committed);
        let start_lsn = pinned.as_ref().map_or(UNKNOWN_LSN, |txn| txn.commit_lsn());
        let snapshot = self.build_snapshot(pinned.as_ref());

        trace!(start_lsn, "begin read-only txn");
        Transaction::ReadOnly(ReadOnlyTxn::new(start_lsn, snapshot, pinned))
    }

    fn begin_read_write(&self) -> Result<Transaction<ID>, TxnError> {
        let record = StateChangeRecord::begin().encode()?;

        // The BEGIN append and the pin happen under one lock so that
        // sequential begins get ordered start LSNs and a new writer
        // observes every predecessor that passed verification,
        // including one whose publish is happening under this same
        // lock right now.
        let guard = self.write_txns_lock.lock();
        let start_lsn = self.wal.log(&record, false)?;
        let pinned = Self::pin_latest(&self.latest_verified);
        drop(guard);

        let snapshot = self.build_snapshot(pinned.as_ref());

        trace!(start_lsn, "begin read-write txn");
        let txn = Arc::new(ReadWriteTxn::new(start_lsn, snapshot, pinned));
        Ok(Transaction::ReadWrite(txn))
    }

    /// Acquire a strong reference to whatever the slot currently
    /// publishes.
    ///
    /// Increment-then-recheck: read the slot, take a refcount on what we
    /// saw, then make sure the slot still holds the same txn. If it
    /// moved, the refcount we took may be on a txn the retirement sweep
    /// already examined, so release it and retry. The loop ends when the
    /// same txn was observed on both sides of the increment, which
    /// guarantees it cannot retire while we hold it.
    fn pin_latest(
        slot: &RwLock<Option<Arc<ReadWriteTxn<ID>>>>,
    ) -> Option<Arc<ReadWriteTxn<ID>>> {
        let mut stale: Option<Arc<ReadWriteTxn<ID>>> = None;
        loop {
            if let Some(stale) = stale.take() {
                stale.release_ref();
            }

            let candidate = slot.read().clone()?;
            candidate.acquire_ref();

            let reread = slot.read();
            if reread
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &candidate))
            {
                return Some(candidate);
            }
            drop(reread);

            stale = Some(candidate);
        }
    }

    /// Collect the committed writers a new transaction must overlay on
    /// base storage: everything up to and including the high-water mark,
    /// minus the prefix whose effects the baseline already covers.
    fn build_snapshot(
        &self,
        hwm: Option<&Arc<ReadWriteTxn<ID>>>,
    ) -> Vec<Arc<ReadWriteTxn<ID>>> {
        let Some(hwm) = hwm else {
            return Vec::new();
        };

        let high = hwm.commit_lsn();
        let mut snapshot = Vec::new();
        for txn in self.committed_queue.iter() {
            if txn.commit_lsn() > high {
                break;
            }
            snapshot.push(txn);
        }

        // Already merged into the base; overlaying them again would
        // double-apply.
        let flushed = self.flushed_baseline.load(Ordering::SeqCst);
        snapshot.retain(|txn| txn.commit_lsn() > flushed);

        snapshot
    }

    /// Release the reference taken at begin, after checking the
    /// bookkeeping it protects: a non-empty snapshot must end with the
    /// pinned txn and that txn must still be referenced.
    fn prepare_for_ending(&self, txn: &Transaction<ID>) -> Result<(), TxnError> {
        let snapshot = txn.snapshot();
        let pinned = txn.pinned();

        if let Some(last) = snapshot.last() {
            let Some(hwm) = pinned else {
                return Err(TxnError::InvariantViolated(
                    "non-empty snapshot without a pinned high-water mark".into(),
                ));
            };
            if !Arc::ptr_eq(last, hwm) {
                return Err(TxnError::InvariantViolated(format!(
                    "snapshot tail {:?} is not the txn pinned at begin {:?}",
                    last, hwm,
                )));
            }
            if txn.is_read_only() && last.commit_lsn() != txn.start_lsn() {
                return Err(TxnError::InvariantViolated(format!(
                    "snapshot tail commit lsn {} does not match start lsn {}",
                    last.commit_lsn(),
                    txn.start_lsn(),
                )));
            }
            if last.ref_count() <= 0 {
                return Err(TxnError::InvariantViolated(format!(
                    "snapshot tail {:?} has no outstanding references",
                    last,
                )));
            }
        }

        if let Some(hwm) = pinned {
            hwm.release_ref();
        }
        Ok(())
    }

    fn commit_read_write(&self, txn: Arc<ReadWriteTxn<ID>>) -> Result<(), TxnError> {
        let record = StateChangeRecord::commit(txn.start_lsn()).encode()?;

        let verify_guard = self.verify_lock.lock();

        // Writers that committed after this txn started are the ones it
        // could have raced with. No commit can slip in while we hold the
        // verify lock, so the set is stable for the check.
        let committed_after = self.committed_queue.committed_after(txn.start_lsn());
        if let VerifyOutcome::Conflict = self.verifier.verify(&txn, &committed_after) {
            drop(verify_guard);
            debug!(
                start_lsn = txn.start_lsn(),
                "commit verification failed, aborting"
            );
            self.total_aborted.fetch_add(1, Ordering::Relaxed);
            self.abort_read_write(&txn)?;
            return Err(TxnError::ConflictDetected);
        }

        let write_guard = self.write_txns_lock.lock();
        // TODO: move the sync out of the locks; the committed frontier
        // would then advance only once the sync completes.
        let commit_lsn = self.wal.log(&record, true)?;
        txn.set_commit_lsn(commit_lsn);
        txn.set_state(TransactionState::Committed);

        // Enqueue before publishing, so anything a later begin pins is
        // already reachable by queue traversal.
        self.committed_queue.enqueue(txn.clone());
        *self.latest_verified.write() = Some(txn.clone());
        *self.latest_committed.write() = Some(txn.clone());
        drop(write_guard);
        drop(verify_guard);

        self.total_committed.fetch_add(1, Ordering::Relaxed);
        debug!(
            start_lsn = txn.start_lsn(),
            commit_lsn, "read-write txn committed"
        );
        Ok(())
    }

    /// Tear down an aborting writer. The in-memory teardown happens
    /// first; if the ABORT record cannot be logged the error still
    /// surfaces but the transaction is already gone.
    fn abort_read_write(&self, txn: &Arc<ReadWriteTxn<ID>>) -> Result<(), TxnError> {
        txn.discard_edits();
        txn.set_state(TransactionState::Aborted);

        let record = StateChangeRecord::abort(txn.start_lsn()).encode()?;
        self.wal.log(&record, false)?;
        Ok(())
    }

    /// Latest LSN whose effects are merged into base storage.
    pub fn flushed_baseline(&self) -> Lsn {
        self.flushed_baseline.load(Ordering::SeqCst)
    }

    /// Record that every effect up to `lsn` is merged into base storage,
    /// then sweep newly retirable transactions. Called by whoever flushes
    /// the base; the baseline only moves forward.
    pub fn advance_flushed_baseline(&self, lsn: Lsn) {
        self.flushed_baseline.fetch_max(lsn, Ordering::SeqCst);
        self.retire_flushed();
    }

    /// Walk the committed queue from the head and drop fully quiesced
    /// transactions: nobody holds a reference and their effects are
    /// below the baseline. Stops at the first entry that must stay.
    pub fn retire_flushed(&self) {
        let flushed = self.flushed_baseline.load(Ordering::SeqCst);
        let retired = self
            .committed_queue
            .retire_prefix(|txn| txn.ref_count() == 0 && txn.commit_lsn() <= flushed);

        if retired > 0 {
            debug!(retired, flushed, "retired committed txns");
        }
    }

    /// Committed transactions not yet retired.
    pub fn committed_backlog(&self) -> usize {
        self.committed_queue.len()
    }

    pub fn total_committed(&self) -> u64 {
        self.total_committed.load(Ordering::Relaxed)
    }

    pub fn total_aborted(&self) -> u64 {
        self.total_aborted.load(Ordering::Relaxed)
    }

    pub(crate) fn committed_queue(&self) -> &CommittedQueue<ID> {
        &self.committed_queue
    }
}

#[cfg(test)]
mod test {
    use super::super::transaction::{BincodeIdSerializer, LogEdit, NaturalOrder};
    use super::*;
    use crate::recovery::LogManager;

    fn setup_manager() -> (TxnManager<u64>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wal = LogManager::open(dir.path().join("txn.wal")).unwrap();
        let manager = TxnManager::new(
            Arc::new(wal),
            Arc::new(NaturalOrder),
            Arc::new(BincodeIdSerializer),
        );
        (manager, dir)
    }

    #[test]
    fn first_read_only_txn_sees_an_empty_world() {
        let (manager, _dir) = setup_manager();

        let txn = manager.begin(true).unwrap();
        assert_eq!(txn.start_lsn(), UNKNOWN_LSN);
        assert!(txn.snapshot().is_empty());

        manager.commit().unwrap();
        assert!(manager.current().is_none());
    }

    #[test]
    fn begin_while_bound_is_already_active() {
        let (manager, _dir) = setup_manager();

        manager.begin(true).unwrap();
        assert!(matches!(manager.begin(true), Err(TxnError::AlreadyActive)));
        assert!(matches!(manager.begin(false), Err(TxnError::AlreadyActive)));

        manager.abort().unwrap();
    }

    #[test]
    fn commit_without_txn_fails_abort_does_not() {
        let (manager, _dir) = setup_manager();

        assert!(matches!(manager.commit(), Err(TxnError::NoActiveTxn)));
        manager.abort().unwrap();
        assert_eq!(manager.total_aborted(), 0);
        assert_eq!(manager.committed_backlog(), 0);
    }

    #[test]
    fn sequential_writers_get_increasing_timestamps() {
        let (manager, _dir) = setup_manager();

        let first = manager.begin(false).unwrap();
        let first_start = first.start_lsn();
        manager.commit().unwrap();
        let first_commit = manager.committed_queue().front().unwrap().commit_lsn();

        let second = manager.begin(false).unwrap();
        let second_start = second.start_lsn();
        manager.commit().unwrap();

        assert!(first_start < first_commit);
        assert!(first_commit < second_start);
        assert_eq!(manager.total_committed(), 2);
    }

    #[test]
    fn aborted_writer_leaves_no_trace_in_the_queue() {
        let (manager, _dir) = setup_manager();

        let txn = manager.begin(false).unwrap();
        let writer = txn.as_read_write().unwrap().clone();
        writer.add_edit(LogEdit::new(7, b"cn=seven".to_vec()));
        manager.abort().unwrap();

        assert_eq!(writer.state(), TransactionState::Aborted);
        assert!(writer.edits().is_empty());
        assert_eq!(manager.committed_backlog(), 0);
        assert_eq!(manager.total_aborted(), 1);

        // The context is free again.
        manager.begin(false).unwrap();
        manager.abort().unwrap();
    }

    #[test]
    fn commit_publishes_to_both_frontiers() {
        let (manager, _dir) = setup_manager();

        let txn = manager.begin(false).unwrap();
        let writer = txn.as_read_write().unwrap().clone();
        manager.commit().unwrap();

        let committed = manager.latest_committed.read().clone().unwrap();
        let verified = manager.latest_verified.read().clone().unwrap();
        assert!(Arc::ptr_eq(&committed, &writer));
        assert!(Arc::ptr_eq(&verified, &writer));
        assert_eq!(writer.state(), TransactionState::Committed);
        assert!(writer.commit_lsn() > writer.start_lsn());
    }

    #[test]
    fn retirement_needs_both_a_flushed_baseline_and_no_refs() {
        let (manager, _dir) = setup_manager();

        manager.begin(false).unwrap();
        manager.commit().unwrap();
        let commit_lsn = manager.committed_queue().front().unwrap().commit_lsn();

        // Not flushed yet: stays.
        manager.retire_flushed();
        assert_eq!(manager.committed_backlog(), 1);

        manager.advance_flushed_baseline(commit_lsn);
        assert_eq!(manager.committed_backlog(), 0);
    }

    #[test]
    fn baseline_does_not_move_backwards() {
        let (manager, _dir) = setup_manager();

        manager.advance_flushed_baseline(80);
        manager.advance_flushed_baseline(20);
        assert_eq!(manager.flushed_baseline(), 80);
    }
}
