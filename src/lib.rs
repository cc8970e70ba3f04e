//! Transaction core of an embedded directory database: MVCC transactions
//! timestamped by write-ahead log positions, with per-transaction
//! snapshots of concurrently committed writers and refcount-based
//! retirement.

pub mod concurrency;
mod error;
pub mod recovery;
pub mod storage;

pub use self::error::TxnError;
