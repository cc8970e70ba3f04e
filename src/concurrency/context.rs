use std::any::Any;
use std::cell::RefCell;

use crate::error::TxnError;

use super::transaction::Transaction;

thread_local! {
    /// The transaction bound to this thread, if any. At most one,
    /// whatever its id type; the box erases the manager's generic
    /// parameter so the binding can live in one static slot.
    static CURRENT_TXN: RefCell<Option<Box<dyn Any>>> = RefCell::new(None);
}

/// Bind a transaction to the current thread. Fails if the slot is taken,
/// even by a transaction with a different id type.
pub(crate) fn bind<ID: 'static>(txn: Transaction<ID>) -> Result<(), TxnError> {
    CURRENT_TXN.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(TxnError::AlreadyActive);
        }
        *slot = Some(Box::new(txn));
        Ok(())
    })
}

/// Remove and return the bound transaction. A binding with a different
/// id type is left in place.
pub(crate) fn take<ID: 'static>() -> Option<Transaction<ID>> {
    CURRENT_TXN.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.take() {
            Some(bound) => match bound.downcast::<Transaction<ID>>() {
                Ok(txn) => Some(*txn),
                Err(other) => {
                    *slot = Some(other);
                    None
                }
            },
            None => None,
        }
    })
}

pub(crate) fn current<ID: 'static>() -> Option<Transaction<ID>> {
    CURRENT_TXN.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|bound| bound.downcast_ref::<Transaction<ID>>())
            .cloned()
    })
}

pub(crate) fn is_bound() -> bool {
    CURRENT_TXN.with(|slot| slot.borrow().is_some())
}
