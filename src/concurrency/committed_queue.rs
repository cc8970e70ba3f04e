use std::ops::Bound;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::recovery::Lsn;

use super::transaction::ReadWriteTxn;

/// Concurrent FIFO of committed read-write transactions, keyed by commit
/// LSN. Enqueue order equals commit-LSN order because commits serialize
/// under the write lock, so a skip map keyed by commit LSN *is* the
/// queue. Iteration is weakly consistent: it observes everything
/// enqueued before it started and may observe later enqueues.
pub struct CommittedQueue<ID> {
    entries: SkipMap<Lsn, Arc<ReadWriteTxn<ID>>>,
}

impl<ID> CommittedQueue<ID>
where
    ID: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    /// Tail append. The caller guarantees commit-LSN monotonicity by
    /// holding the write lock across COMMIT append and enqueue.
    pub fn enqueue(&self, txn: Arc<ReadWriteTxn<ID>>) {
        self.entries.insert(txn.commit_lsn(), txn);
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<ReadWriteTxn<ID>>> + '_ {
        self.entries.iter().map(|entry| entry.value().clone())
    }

    /// Transactions that committed after the given LSN, ascending.
    pub fn committed_after(&self, lsn: Lsn) -> Vec<Arc<ReadWriteTxn<ID>>> {
        self.entries
            .range((Bound::Excluded(lsn), Bound::Unbounded))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Walk from the head removing entries while the predicate holds,
    /// stopping at the first that does not. Returns how many were
    /// removed.
    pub fn retire_prefix(&self, mut retirable: impl FnMut(&ReadWriteTxn<ID>) -> bool) -> usize {
        let mut retired = 0;
        for entry in self.entries.iter() {
            if !retirable(entry.value()) {
                break;
            }
            entry.remove();
            retired += 1;
        }
        retired
    }

    pub fn front(&self) -> Option<Arc<ReadWriteTxn<ID>>> {
        self.entries.front().map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<ID> Default for CommittedQueue<ID>
where
    ID: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::super::transaction::TransactionState;
    use super::*;

    fn committed(start_lsn: Lsn, commit_lsn: Lsn) -> Arc<ReadWriteTxn<u64>> {
        let txn = ReadWriteTxn::new(start_lsn, Vec::new(), None);
        txn.set_commit_lsn(commit_lsn);
        txn.set_state(TransactionState::Committed);
        Arc::new(txn)
    }

    #[test]
    fn iterates_in_commit_lsn_order() {
        let queue = CommittedQueue::new();
        queue.enqueue(committed(1, 10));
        queue.enqueue(committed(2, 20));
        queue.enqueue(committed(3, 30));

        let lsns: Vec<Lsn> = queue.iter().map(|txn| txn.commit_lsn()).collect();
        assert_eq!(lsns, vec![10, 20, 30]);
        assert_eq!(queue.front().unwrap().commit_lsn(), 10);
    }

    #[test]
    fn committed_after_excludes_the_boundary() {
        let queue = CommittedQueue::new();
        queue.enqueue(committed(1, 10));
        queue.enqueue(committed(2, 20));
        queue.enqueue(committed(3, 30));

        let lsns: Vec<Lsn> = queue
            .committed_after(20)
            .iter()
            .map(|txn| txn.commit_lsn())
            .collect();
        assert_eq!(lsns, vec![30]);

        assert_eq!(queue.committed_after(5).len(), 3);
    }

    #[test]
    fn retire_prefix_stops_at_first_survivor() {
        let queue = CommittedQueue::new();
        queue.enqueue(committed(1, 10));
        queue.enqueue(committed(2, 20));
        queue.enqueue(committed(3, 30));

        // 30 would match too, but 20 blocks the walk.
        let retired = queue.retire_prefix(|txn| txn.commit_lsn() != 20);
        assert_eq!(retired, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().unwrap().commit_lsn(), 20);
    }
}
