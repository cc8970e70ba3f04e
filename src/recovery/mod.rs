mod log_manager;
mod log_record;

// Reexport so we can refer it from other mod
// as crate::recovery::LogManager instead of
// crate::recovery::log_manager::LogManager
pub use self::{
    log_manager::{LogHandle, LogManager, Lsn, UNKNOWN_LSN},
    log_record::{StateChange, StateChangeRecord, STATE_CHANGE_RECORD_SIZE},
};
