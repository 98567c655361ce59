// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{error::FsError, DynFile, DynFs, File, Fs, OpenMode};
use std::{
    collections::HashMap,
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// In-memory file system for tests.
///
/// All handles opened from one `MapFs` share the same backing map, so a
/// "crashed" session can be reopened by a recovery run within the same
/// test. Durable syncs are counted to make flush policies observable.
#[derive(Clone, Default)]
pub struct MapFs(Arc<Mutex<MapFsState>>);

#[derive(Default)]
struct MapFsState {
    files: HashMap<PathBuf, Vec<u8>>,
    sync_count: u64,
}

#[allow(clippy::unwrap_used)]
impl MapFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.0.lock().unwrap().files.get(path).cloned()
    }

    pub fn insert(&self, path: &Path, data: Vec<u8>) {
        self.0.lock().unwrap().files.insert(path.to_path_buf(), data);
    }

    /// Number of `File::sync` calls across all handles.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.0.lock().unwrap().sync_count
    }
}

#[allow(clippy::unwrap_used)]
impl Fs for MapFs {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<DynFile, FsError> {
        let mut state = self.0.lock().unwrap();
        let pos = match mode {
            OpenMode::Read | OpenMode::ReadWrite => {
                if !state.files.contains_key(path) {
                    return Err(FsError::OpenNotExist);
                }
                0
            }
            OpenMode::Write => {
                state.files.insert(path.to_path_buf(), Vec::new());
                0
            }
            OpenMode::Append => {
                let file = state.files.entry(path.to_path_buf()).or_default();
                u64::try_from(file.len()).unwrap()
            }
        };
        Ok(Box::new(MapFile {
            state: self.0.clone(),
            path: path.to_path_buf(),
            pos,
        }))
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.lock().unwrap().files.contains_key(path)
    }

    fn remove(&self, path: &Path) -> Result<(), FsError> {
        match self.0.lock().unwrap().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(FsError::OpenNotExist),
        }
    }

    fn size(&self, path: &Path) -> Result<u64, FsError> {
        let state = self.0.lock().unwrap();
        let file = state.files.get(path).ok_or(FsError::OpenNotExist)?;
        Ok(u64::try_from(file.len()).unwrap())
    }

    fn clone(&self) -> DynFs {
        Box::new(Clone::clone(self))
    }
}

struct MapFile {
    state: Arc<Mutex<MapFsState>>,
    path: PathBuf,
    pos: u64,
}

#[allow(clippy::unwrap_used)]
impl File for MapFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let state = self.state.lock().unwrap();
        let data = state.files.get(&self.path).ok_or(FsError::OpenNotExist)?;
        let pos = usize::try_from(self.pos).unwrap();
        if pos >= data.len() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += u64::try_from(n).unwrap();
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        let data = state
            .files
            .get_mut(&self.path)
            .ok_or(FsError::OpenNotExist)?;
        let pos = usize::try_from(self.pos).unwrap();
        if pos > data.len() {
            data.resize(pos, 0);
        }
        let overlap = std::cmp::min(buf.len(), data.len() - pos);
        data[pos..pos + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += u64::try_from(buf.len()).unwrap();
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let len = {
            let state = self.state.lock().unwrap();
            let data = state.files.get(&self.path).ok_or(FsError::OpenNotExist)?;
            u64::try_from(data.len()).unwrap()
        };
        self.pos = match pos {
            SeekFrom::Start(v) => v,
            SeekFrom::End(v) => len.checked_add_signed(v).unwrap(),
            SeekFrom::Current(v) => self.pos.checked_add_signed(v).unwrap(),
        };
        Ok(self.pos)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        Ok(())
    }

    fn sync(&mut self) -> Result<(), FsError> {
        self.state.lock().unwrap().sync_count += 1;
        Ok(())
    }
}
