use std::{
    fs::{File, OpenOptions},
    io::SeekFrom,
    io::{Read, Seek, Write},
    path::PathBuf,
};

/// Owns the write-ahead log file. All writes go to the tail; reads can
/// seek anywhere below the tracked length.
pub struct DiskManager {
    write_file: File,
    read_file: File,
    file_len: u64,
}

impl DiskManager {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let path = path.into();

        let write_file = OpenOptions::new().append(true).create(true).open(&path)?;

        let read_file = File::open(&path)?;
        let file_len = write_file.metadata()?.len();

        Ok(Self {
            write_file,
            read_file,
            file_len,
        })
    }

    /// Append bytes at the tail and return the stream offset right after
    /// them. The offset only moves forward.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, std::io::Error> {
        self.write_file.write_all(bytes)?;
        self.file_len += bytes.len() as u64;
        Ok(self.file_len)
    }

    /// Force everything appended so far down to the device.
    pub fn sync(&mut self) -> Result<(), std::io::Error> {
        self.write_file.sync_data()
    }

    pub fn len(&self) -> u64 {
        self.file_len
    }

    pub fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<(), std::io::Error> {
        self.read_file.seek(SeekFrom::Start(offset))?;
        self.read_file.read_exact(buffer)
    }
}
