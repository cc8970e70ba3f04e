mod committed_queue;
mod conflict;
mod context;
mod transaction;
mod transaction_manager;

// Reexport so we can refer it from other mod
// as crate::concurrency::TxnManager instead of
// crate::concurrency::transaction_manager::TxnManager
pub use self::{
    committed_queue::CommittedQueue,
    conflict::{ReadWriteSetVerifier, Verifier, VerifyOutcome, WriteSetVerifier},
    transaction::{
        BincodeIdSerializer, IdComparator, IdSerializer, LogEdit, NaturalOrder, ReadOnlyTxn,
        ReadWriteTxn, Transaction, TransactionState,
    },
    transaction_manager::TxnManager,
};
