use std::path::Path;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::TxnError;
use crate::storage::DiskManager;

/// Log sequence number: a position in the write-ahead log. Strictly
/// increasing across appends; 0 never names a real record.
pub type Lsn = u64;

/// Sentinel for "no log position".
pub const UNKNOWN_LSN: Lsn = 0;

const FRAME_HEADER_SIZE: usize = 4;

/// Append-only log the transaction core writes its records through.
///
/// The returned LSN must be strictly increasing across appends. With
/// `sync = true` the record is durable when the call returns.
pub trait LogHandle: Send + Sync {
    fn log(&self, record: &[u8], sync: bool) -> Result<Lsn, TxnError>;
}

/// File-backed [`LogHandle`]. Records are framed as a big-endian u32
/// length followed by the payload; a record's LSN is the stream offset
/// right after its frame, so the first record already has a non-zero LSN.
pub struct LogManager {
    disk_manager: Mutex<DiskManager>,
}

impl LogManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TxnError> {
        let disk_manager = DiskManager::new(path.as_ref())?;

        Ok(Self {
            disk_manager: Mutex::new(disk_manager),
        })
    }

    /// Re-read every record in append order, yielding `(lsn, payload)`.
    ///
    /// This is the traversal a recovery pass would run. Tests use it to
    /// check what actually hit the log.
    pub fn scan(&self) -> Result<Vec<(Lsn, Vec<u8>)>, TxnError> {
        let mut disk_manager = self.disk_manager.lock();
        let len = disk_manager.len();

        let mut records = Vec::new();
        let mut offset = 0u64;
        while offset < len {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            disk_manager.read_at(offset, &mut header)?;
            let payload_len = u32::from_be_bytes(header) as usize;

            let mut payload = vec![0u8; payload_len];
            disk_manager.read_at(offset + FRAME_HEADER_SIZE as u64, &mut payload)?;

            offset += (FRAME_HEADER_SIZE + payload_len) as u64;
            records.push((offset, payload));
        }

        Ok(records)
    }
}

impl LogHandle for LogManager {
    fn log(&self, record: &[u8], sync: bool) -> Result<Lsn, TxnError> {
        let mut disk_manager = self.disk_manager.lock();

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + record.len());
        frame.extend_from_slice(&(record.len() as u32).to_be_bytes());
        frame.extend_from_slice(record);

        let lsn = disk_manager.append(&frame)?;
        if sync {
            trace!(lsn, "sync WAL to disk");
            disk_manager.sync()?;
        }

        Ok(lsn)
    }
}
