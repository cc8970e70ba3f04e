use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

use super::transaction::{IdComparator, ReadWriteTxn};

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Clean,
    Conflict,
}

impl VerifyOutcome {
    pub fn is_clean(&self) -> bool {
        *self == VerifyOutcome::Clean
    }
}

/// Decides whether a committing writer conflicts with the writers that
/// committed after it started. Runs under the verify lock, so the
/// predecessor set is stable for the duration of the call. Must not
/// mutate transaction state.
pub trait Verifier<ID>: Send + Sync {
    fn verify(
        &self,
        candidate: &ReadWriteTxn<ID>,
        committed_after: &[Arc<ReadWriteTxn<ID>>],
    ) -> VerifyOutcome;
}

fn write_sets_overlap<ID>(
    comparator: &dyn IdComparator<ID>,
    candidate: &ReadWriteTxn<ID>,
    predecessor: &ReadWriteTxn<ID>,
) -> bool {
    let ours = candidate.edits();
    let theirs = predecessor.edits();
    ours.iter().any(|edit| {
        theirs
            .iter()
            .any(|other| comparator.compare(&other.entry_id, &edit.entry_id) == CmpOrdering::Equal)
    })
}

/// Write/write overlap only: two writers conflict when they touched the
/// same entry. Snapshot-isolation style; write skew passes.
pub struct WriteSetVerifier<ID> {
    comparator: Arc<dyn IdComparator<ID>>,
}

impl<ID> WriteSetVerifier<ID> {
    pub fn new(comparator: Arc<dyn IdComparator<ID>>) -> Self {
        Self { comparator }
    }
}

impl<ID> Verifier<ID> for WriteSetVerifier<ID>
where
    ID: Send + Sync,
{
    fn verify(
        &self,
        candidate: &ReadWriteTxn<ID>,
        committed_after: &[Arc<ReadWriteTxn<ID>>],
    ) -> VerifyOutcome {
        for predecessor in committed_after {
            if write_sets_overlap(self.comparator.as_ref(), candidate, predecessor) {
                return VerifyOutcome::Conflict;
            }
        }
        VerifyOutcome::Clean
    }
}

/// Write/write overlap plus the candidate's read set against predecessor
/// write sets: rejects a writer whose reads went stale while it ran.
/// Serializability style.
pub struct ReadWriteSetVerifier<ID> {
    comparator: Arc<dyn IdComparator<ID>>,
}

impl<ID> ReadWriteSetVerifier<ID> {
    pub fn new(comparator: Arc<dyn IdComparator<ID>>) -> Self {
        Self { comparator }
    }
}

impl<ID> Verifier<ID> for ReadWriteSetVerifier<ID>
where
    ID: Send + Sync,
{
    fn verify(
        &self,
        candidate: &ReadWriteTxn<ID>,
        committed_after: &[Arc<ReadWriteTxn<ID>>],
    ) -> VerifyOutcome {
        let reads = candidate.read_set();
        for predecessor in committed_after {
            if write_sets_overlap(self.comparator.as_ref(), candidate, predecessor) {
                return VerifyOutcome::Conflict;
            }

            let their_edits = predecessor.edits();
            let read_went_stale = reads.iter().any(|read| {
                their_edits
                    .iter()
                    .any(|edit| self.comparator.compare(&edit.entry_id, read) == CmpOrdering::Equal)
            });
            if read_went_stale {
                return VerifyOutcome::Conflict;
            }
        }
        VerifyOutcome::Clean
    }
}

#[cfg(test)]
mod test {
    use super::super::transaction::{LogEdit, NaturalOrder};
    use super::*;

    fn writer(edit_ids: &[u64]) -> Arc<ReadWriteTxn<u64>> {
        let txn = Arc::new(ReadWriteTxn::new(1, Vec::new(), None));
        for &id in edit_ids {
            txn.add_edit(LogEdit::new(id, Vec::new()));
        }
        txn
    }

    #[test]
    fn disjoint_write_sets_are_clean() {
        let verifier = WriteSetVerifier::new(Arc::new(NaturalOrder));
        let candidate = writer(&[1, 2]);
        let predecessors = vec![writer(&[3]), writer(&[4, 5])];

        assert!(verifier.verify(&candidate, &predecessors).is_clean());
    }

    #[test]
    fn overlapping_write_sets_conflict() {
        let verifier = WriteSetVerifier::new(Arc::new(NaturalOrder));
        let candidate = writer(&[1, 2]);
        let predecessors = vec![writer(&[3]), writer(&[2])];

        assert_eq!(
            verifier.verify(&candidate, &predecessors),
            VerifyOutcome::Conflict
        );
    }

    #[test]
    fn no_predecessors_is_clean() {
        let verifier = WriteSetVerifier::new(Arc::new(NaturalOrder));
        let candidate = writer(&[1]);

        assert!(verifier.verify(&candidate, &[]).is_clean());
    }

    #[test]
    fn stale_read_conflicts_only_under_read_write_scope() {
        let candidate = writer(&[1]);
        candidate.record_read(9);
        let predecessors = vec![writer(&[9])];

        let write_only = WriteSetVerifier::new(Arc::new(NaturalOrder));
        assert!(write_only.verify(&candidate, &predecessors).is_clean());

        let read_write = ReadWriteSetVerifier::new(Arc::new(NaturalOrder));
        assert_eq!(
            read_write.verify(&candidate, &predecessors),
            VerifyOutcome::Conflict
        );
    }
}
