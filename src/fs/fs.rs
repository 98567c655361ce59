// SPDX-License-Identifier: GPL-2.0-or-later

mod error;
mod map_fs;
mod std_fs;

#[cfg(test)]
mod test;

pub use error::FsError;
pub use map_fs::MapFs;
pub use std_fs::std_fs;

use std::{io::SeekFrom, path::Path, sync::Arc};

pub type DynFs = Box<dyn Fs + Send + Sync>;
pub type ArcFs = Arc<dyn Fs + Send + Sync>;

/// Capability set the recorder needs from a file system.
///
/// The production implementation maps to `std::fs`, the in-memory
/// implementation backs the tests.
pub trait Fs {
    // Opens the named file.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<DynFile, FsError>;

    // Reports whether the named file exists.
    fn exists(&self, path: &Path) -> bool;

    // Removes the named file.
    fn remove(&self, path: &Path) -> Result<(), FsError>;

    // Size of the named file in bytes.
    fn size(&self, path: &Path) -> Result<u64, FsError>;

    fn clone(&self) -> DynFs;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,

    /// Create the file, truncating it if it exists.
    Write,

    /// Read and write an existing file.
    ReadWrite,

    /// Create the file if missing and position writes at the end.
    Append,
}

pub type DynFile = Box<dyn File + Send>;

pub trait File {
    /// Reads up to `buf.len()` bytes. A return of zero means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    fn write_all(&mut self, buf: &[u8]) -> Result<(), FsError>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError>;

    /// Flushes stream buffers. Does not imply durability.
    fn flush(&mut self) -> Result<(), FsError>;

    /// Durable sync: the data is on disk when this returns.
    fn sync(&mut self) -> Result<(), FsError>;

    // Current position.
    fn tell(&mut self) -> Result<u64, FsError> {
        self.seek(SeekFrom::Current(0))
    }

    /// Fills as much of `buf` as the file can provide and returns the
    /// number of bytes read.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }
}
