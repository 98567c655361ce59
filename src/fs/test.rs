// SPDX-License-Identifier: GPL-2.0-or-later

use crate::{std_fs, File, Fs, FsError, MapFs, OpenMode};
use pretty_assertions::assert_eq;
use std::{io::SeekFrom, path::Path};

#[test]
fn map_fs_write_read() {
    let fs = MapFs::new();
    let path = Path::new("a.bin");

    let mut file = fs.open(path, OpenMode::Write).expect("open for write");
    file.write_all(&[1, 2, 3, 4]).expect("write");

    assert!(fs.exists(path));
    assert_eq!(4, fs.size(path).expect("size"));
    assert_eq!(Some(vec![1, 2, 3, 4]), fs.contents(path));

    let mut file = fs.open(path, OpenMode::Read).expect("open for read");
    let mut buf = [0; 4];
    assert_eq!(4, file.read(&mut buf).expect("read"));
    assert_eq!([1, 2, 3, 4], buf);
    assert_eq!(0, file.read(&mut buf).expect("read at end"));
}

#[test]
fn map_fs_overwrite_and_extend() {
    let fs = MapFs::new();
    let path = Path::new("a.bin");

    let mut file = fs.open(path, OpenMode::Write).expect("open");
    file.write_all(&[1, 2, 3, 4]).expect("write");

    file.seek(SeekFrom::Start(2)).expect("seek");
    file.write_all(&[9, 9, 9]).expect("overwrite past end");
    assert_eq!(Some(vec![1, 2, 9, 9, 9]), fs.contents(path));
}

#[test]
fn map_fs_append() {
    let fs = MapFs::new();
    let path = Path::new("a.bin");
    fs.insert(path, vec![1, 2]);

    let mut file = fs.open(path, OpenMode::Append).expect("open");
    file.write_all(&[3]).expect("write");
    assert_eq!(Some(vec![1, 2, 3]), fs.contents(path));
}

#[test]
fn map_fs_read_write_requires_existing() {
    let fs = MapFs::new();
    assert!(matches!(
        fs.open(Path::new("missing"), OpenMode::ReadWrite),
        Err(FsError::OpenNotExist)
    ));
    assert!(matches!(
        fs.open(Path::new("missing"), OpenMode::Read),
        Err(FsError::OpenNotExist)
    ));
}

#[test]
fn map_fs_remove() {
    let fs = MapFs::new();
    let path = Path::new("a.bin");
    fs.insert(path, Vec::new());

    fs.remove(path).expect("remove");
    assert!(!fs.exists(path));
    assert!(matches!(fs.remove(path), Err(FsError::OpenNotExist)));
}

#[test]
fn map_fs_sync_count() {
    let fs = MapFs::new();
    let mut file = fs.open(Path::new("a.bin"), OpenMode::Write).expect("open");
    assert_eq!(0, fs.sync_count());
    file.sync().expect("sync");
    file.sync().expect("sync");
    assert_eq!(2, fs.sync_count());
}

#[test]
fn map_fs_read_full_partial() {
    let fs = MapFs::new();
    let path = Path::new("a.bin");
    fs.insert(path, vec![1, 2, 3]);

    let mut file = fs.open(path, OpenMode::Read).expect("open");
    let mut buf = [0; 8];
    assert_eq!(3, file.read_full(&mut buf).expect("read_full"));
    assert_eq!([1, 2, 3, 0, 0, 0, 0, 0], buf);
}

#[test]
fn std_fs_round_trip() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let path = temp_dir.path().join("a.bin");
    let fs = std_fs();

    assert!(!fs.exists(&path));

    let mut file = fs.open(&path, OpenMode::Write).expect("open for write");
    file.write_all(&[1, 2, 3, 4]).expect("write");
    file.flush().expect("flush");
    file.sync().expect("sync");
    drop(file);

    assert!(fs.exists(&path));
    assert_eq!(4, fs.size(&path).expect("size"));

    let mut file = fs.open(&path, OpenMode::ReadWrite).expect("reopen");
    file.seek(SeekFrom::Start(1)).expect("seek");
    file.write_all(&[9]).expect("write");
    drop(file);

    let mut file = fs.open(&path, OpenMode::Read).expect("open for read");
    let mut buf = [0; 4];
    assert_eq!(4, file.read_full(&mut buf).expect("read"));
    assert_eq!([1, 9, 3, 4], buf);
    assert_eq!(4, file.tell().expect("tell"));
    drop(file);

    fs.remove(&path).expect("remove");
    assert!(!fs.exists(&path));
}

#[test]
fn std_fs_open_missing() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let path = temp_dir.path().join("missing");
    assert!(matches!(
        std_fs().open(&path, OpenMode::Read),
        Err(FsError::OpenNotExist)
    ));
}
