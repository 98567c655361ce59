// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{error::FsError, DynFile, DynFs, File, Fs, OpenMode};
use std::{
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

/// File system backed by `std::fs`. Paths are used verbatim.
#[must_use]
pub fn std_fs() -> DynFs {
    Box::new(StdFs)
}

#[derive(Clone)]
struct StdFs;

impl Fs for StdFs {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<DynFile, FsError> {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Append => options.append(true).create(true),
        };
        let file = options.open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::OpenNotExist
            } else {
                FsError::Io(e)
            }
        })?;
        Ok(Box::new(StdFile(file)))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_file(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::OpenNotExist
            } else {
                FsError::Io(e)
            }
        })
    }

    fn size(&self, path: &Path) -> Result<u64, FsError> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn clone(&self) -> DynFs {
        Box::new(Clone::clone(self))
    }
}

struct StdFile(std::fs::File);

impl File for StdFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        Ok(self.0.read(buf)?)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), FsError> {
        Ok(self.0.write_all(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        Ok(self.0.seek(pos)?)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(self.0.flush()?)
    }

    fn sync(&mut self) -> Result<(), FsError> {
        Ok(self.0.sync_all()?)
    }
}
