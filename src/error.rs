use std::io;

use thiserror::Error;

/// Errors surfaced by the transaction core. Nothing here is retried
/// internally; every failure goes straight to the caller.
#[derive(Debug, Error)]
pub enum TxnError {
    /// `begin` was called while a transaction is bound to this execution
    /// context. Caller bug.
    #[error("a transaction is already bound to this execution context")]
    AlreadyActive,

    /// `commit` was called with no transaction bound. Caller bug.
    #[error("no transaction is bound to this execution context")]
    NoActiveTxn,

    /// Verification rejected the commit. The transaction has already been
    /// aborted (ABORT record logged); the caller may retry with a new one.
    #[error("commit verification detected a conflict with a concurrent writer")]
    ConflictDetected,

    /// I/O failure from the write-ahead log. Transaction state is
    /// undefined; treat as fatal unless a recovery pass exists.
    #[error("write-ahead log I/O failure")]
    WalIo(#[from] io::Error),

    /// A refcount or snapshot bookkeeping guard failed. Fatal.
    #[error("transaction invariant violated: {0}")]
    InvariantViolated(String),

    /// A log record could not be encoded or decoded.
    #[error("log record codec failure")]
    Codec(#[from] bincode::Error),
}
