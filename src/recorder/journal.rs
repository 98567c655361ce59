// SPDX-License-Identifier: GPL-2.0-or-later

use fs::{DynFile, File, Fs, FsError, OpenMode};
use std::{io::SeekFrom, path::Path};
use thiserror::Error;

// "MP4R" in the journal's native byte order.
pub const JOURNAL_MAGIC: u32 = 0x4D50_3452;

pub const VIDEO_TRACK: u8 = 0;
pub const AUDIO_TRACK: u8 = 1;

const CONFIG_SIZE: usize = 32;

// Magic plus packed config.
const HEADER_SIZE: u64 = 36;

const FRAME_RECORD_SIZE_U8: u8 = 40;
#[allow(clippy::as_conversions)]
pub const FRAME_RECORD_SIZE: usize = FRAME_RECORD_SIZE_U8 as usize;

/// Recording session parameters. Stored verbatim in the journal header so
/// recovery sees the exact values the session was started with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Ticks per second for video PTS values.
    pub video_timescale: u32,
    pub audio_timescale: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,

    /// Time-based flush threshold.
    pub flush_interval_ms: u32,
    /// Count-based flush threshold.
    pub flush_frame_count: u32,

    pub video_width: u32,
    pub video_height: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video_timescale: 30000,
            audio_timescale: 48000,
            audio_sample_rate: 48000,
            audio_channels: 2,
            flush_interval_ms: 500,
            flush_frame_count: 1000,
            video_width: 640,
            video_height: 480,
        }
    }
}

#[allow(clippy::unwrap_used)]
impl RecorderConfig {
    // The journal never leaves the host, native byte order.
    fn encode(&self) -> [u8; CONFIG_SIZE] {
        let mut out = [0; CONFIG_SIZE];
        out[0..4].copy_from_slice(&self.video_timescale.to_ne_bytes());
        out[4..8].copy_from_slice(&self.audio_timescale.to_ne_bytes());
        out[8..12].copy_from_slice(&self.audio_sample_rate.to_ne_bytes());
        out[12..14].copy_from_slice(&self.audio_channels.to_ne_bytes());
        // 14..16 padding.
        out[16..20].copy_from_slice(&self.flush_interval_ms.to_ne_bytes());
        out[20..24].copy_from_slice(&self.flush_frame_count.to_ne_bytes());
        out[24..28].copy_from_slice(&self.video_width.to_ne_bytes());
        out[28..32].copy_from_slice(&self.video_height.to_ne_bytes());
        out
    }

    fn decode(b: &[u8; CONFIG_SIZE]) -> Self {
        Self {
            video_timescale: u32::from_ne_bytes(b[0..4].try_into().unwrap()),
            audio_timescale: u32::from_ne_bytes(b[4..8].try_into().unwrap()),
            audio_sample_rate: u32::from_ne_bytes(b[8..12].try_into().unwrap()),
            audio_channels: u16::from_ne_bytes(b[12..14].try_into().unwrap()),
            flush_interval_ms: u32::from_ne_bytes(b[16..20].try_into().unwrap()),
            flush_frame_count: u32::from_ne_bytes(b[20..24].try_into().unwrap()),
            video_width: u32::from_ne_bytes(b[24..28].try_into().unwrap()),
            video_height: u32::from_ne_bytes(b[28..32].try_into().unwrap()),
        }
    }
}

/// Fixed-size journal entry, one per sample written to mdat.
///
/// The 40-byte stride keeps every field naturally aligned: 4 bytes of
/// padding follow `size` and 6 follow `track_id`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRecord {
    /// Byte offset relative to the first byte of mdat payload.
    pub offset: u64,
    pub size: u32,
    pub pts: i64,
    /// Always equal to pts, B-frames are not supported.
    pub dts: i64,
    /// Always set for audio.
    pub is_keyframe: bool,
    pub track_id: u8,
}

#[allow(clippy::unwrap_used)]
impl FrameRecord {
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_RECORD_SIZE] {
        let mut out = [0; FRAME_RECORD_SIZE];
        out[0..8].copy_from_slice(&self.offset.to_ne_bytes());
        out[8..12].copy_from_slice(&self.size.to_ne_bytes());
        // 12..16 padding.
        out[16..24].copy_from_slice(&self.pts.to_ne_bytes());
        out[24..32].copy_from_slice(&self.dts.to_ne_bytes());
        out[32] = u8::from(self.is_keyframe);
        out[33] = self.track_id;
        // 34..40 padding.
        out
    }

    #[must_use]
    pub fn from_bytes(b: &[u8; FRAME_RECORD_SIZE]) -> Self {
        Self {
            offset: u64::from_ne_bytes(b[0..8].try_into().unwrap()),
            size: u32::from_ne_bytes(b[8..12].try_into().unwrap()),
            pts: i64::from_ne_bytes(b[16..24].try_into().unwrap()),
            dts: i64::from_ne_bytes(b[24..32].try_into().unwrap()),
            is_keyframe: b[32] != 0,
            track_id: b[33],
        }
    }
}

/// Append-only sidecar holding the session config and one record per
/// sample. The sole source of truth for recovery.
pub struct Journal {
    file: DynFile,
    frame_count: u64,
}

#[derive(Debug, Error)]
pub enum ReadConfigError {
    #[error("seek: {0}")]
    Seek(FsError),

    #[error("read: {0}")]
    Read(FsError),

    #[error("short header")]
    ShortHeader,

    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),
}

impl Journal {
    /// Creates an empty journal for a new session.
    pub fn create(fs: &dyn Fs, path: &Path) -> Result<Self, FsError> {
        let file = fs.open(path, OpenMode::Write)?;
        Ok(Self {
            file,
            frame_count: 0,
        })
    }

    /// Writes the magic and config header.
    /// Must run before the first `append_frame`.
    pub fn write_config(&mut self, config: &RecorderConfig) -> Result<(), FsError> {
        self.file.write_all(&JOURNAL_MAGIC.to_ne_bytes())?;
        self.file.write_all(&config.encode())?;
        Ok(())
    }

    pub fn append_frame(&mut self, record: &FrameRecord) -> Result<(), FsError> {
        self.file.write_all(&record.encode())?;
        self.frame_count += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FsError> {
        self.file.flush()
    }

    /// Durable sync, the journal entries are on disk when this returns.
    pub fn sync(&mut self) -> Result<(), FsError> {
        self.file.sync()
    }

    /// Opens an existing journal for recovery.
    pub fn open(fs: &dyn Fs, path: &Path) -> Result<Self, FsError> {
        let file = fs.open(path, OpenMode::Read)?;
        let file_size = fs.size(path)?;
        let frame_count = if file_size > HEADER_SIZE {
            (file_size - HEADER_SIZE) / u64::from(FRAME_RECORD_SIZE_U8)
        } else {
            0
        };
        Ok(Self { file, frame_count })
    }

    #[allow(clippy::unwrap_used)]
    pub fn read_config(&mut self) -> Result<RecorderConfig, ReadConfigError> {
        use ReadConfigError::*;
        self.file.seek(SeekFrom::Start(0)).map_err(Seek)?;

        let mut header = [0; 4 + CONFIG_SIZE];
        let n = self.file.read_full(&mut header).map_err(Read)?;
        if n != header.len() {
            return Err(ShortHeader);
        }

        let magic = u32::from_ne_bytes(header[0..4].try_into().unwrap());
        if magic != JOURNAL_MAGIC {
            return Err(BadMagic(magic));
        }

        Ok(RecorderConfig::decode(header[4..].try_into().unwrap()))
    }

    /// Reads every complete record and partitions them by track.
    ///
    /// A partial trailing record is silently ignored, it is the tolerable
    /// outcome of a crash mid-append.
    pub fn read_all(&mut self) -> Result<(Vec<FrameRecord>, Vec<FrameRecord>), FsError> {
        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut video_records = Vec::new();
        let mut audio_records = Vec::new();

        let mut buf = [0; FRAME_RECORD_SIZE];
        loop {
            let n = self.file.read_full(&mut buf)?;
            if n != FRAME_RECORD_SIZE {
                break;
            }
            let record = FrameRecord::from_bytes(&buf);
            match record.track_id {
                VIDEO_TRACK => video_records.push(record),
                AUDIO_TRACK => audio_records.push(record),
                _ => {}
            }
        }

        Ok((video_records, audio_records))
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn exists(fs: &dyn Fs, path: &Path) -> bool {
        fs.exists(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs::MapFs;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_encode_decode() {
        let config = RecorderConfig {
            video_timescale: 90000,
            audio_timescale: 44100,
            audio_sample_rate: 44100,
            audio_channels: 1,
            flush_interval_ms: 250,
            flush_frame_count: 60,
            video_width: 1920,
            video_height: 1080,
        };
        assert_eq!(config, RecorderConfig::decode(&config.encode()));
    }

    #[test]
    fn test_record_encode_decode() {
        let record = FrameRecord {
            offset: 0x1_0000_0001,
            size: 4096,
            pts: -3000,
            dts: -3000,
            is_keyframe: true,
            track_id: VIDEO_TRACK,
        };
        assert_eq!(record, FrameRecord::from_bytes(&record.encode()));
        assert_eq!(FRAME_RECORD_SIZE, record.encode().len());
    }

    #[test]
    fn test_write_read() {
        let fs = MapFs::new();
        let path = Path::new("test.mp4.idx");

        let config = RecorderConfig::default();
        let mut journal = Journal::create(&fs, path).expect("create");
        journal.write_config(&config).expect("write config");

        let video = FrameRecord {
            offset: 0,
            size: 100,
            pts: 0,
            dts: 0,
            is_keyframe: true,
            track_id: VIDEO_TRACK,
        };
        let audio = FrameRecord {
            offset: 100,
            size: 20,
            pts: 0,
            dts: 0,
            is_keyframe: true,
            track_id: AUDIO_TRACK,
        };
        journal.append_frame(&video).expect("append");
        journal.append_frame(&audio).expect("append");
        assert_eq!(2, journal.frame_count());
        drop(journal);

        assert!(Journal::exists(&fs, path));

        let mut journal = Journal::open(&fs, path).expect("open");
        assert_eq!(2, journal.frame_count());
        assert_eq!(config, journal.read_config().expect("read config"));

        let (video_records, audio_records) = journal.read_all().expect("read all");
        assert_eq!(vec![video], video_records);
        assert_eq!(vec![audio], audio_records);
    }

    #[test]
    fn test_partial_trailing_record_ignored() {
        let fs = MapFs::new();
        let path = Path::new("test.mp4.idx");

        let mut journal = Journal::create(&fs, path).expect("create");
        journal
            .write_config(&RecorderConfig::default())
            .expect("write config");
        journal
            .append_frame(&FrameRecord {
                size: 1,
                is_keyframe: true,
                ..Default::default()
            })
            .expect("append");
        drop(journal);

        // Simulate a crash mid-append by truncating the second record.
        let mut data = fs.contents(path).expect("journal exists");
        data.extend_from_slice(&[0xab; FRAME_RECORD_SIZE / 2]);
        fs.insert(path, data);

        let mut journal = Journal::open(&fs, path).expect("open");
        assert_eq!(1, journal.frame_count());
        let (video_records, audio_records) = journal.read_all().expect("read all");
        assert_eq!(1, video_records.len());
        assert_eq!(0, audio_records.len());
    }

    #[test]
    fn test_bad_magic() {
        let fs = MapFs::new();
        let path = Path::new("test.mp4.idx");
        fs.insert(path, vec![0xaa; 64]);

        let mut journal = Journal::open(&fs, path).expect("open");
        assert!(matches!(
            journal.read_config(),
            Err(ReadConfigError::BadMagic(0xaaaa_aaaa))
        ));
    }

    #[test]
    fn test_short_header() {
        let fs = MapFs::new();
        let path = Path::new("test.mp4.idx");
        fs.insert(path, JOURNAL_MAGIC.to_ne_bytes().to_vec());

        let mut journal = Journal::open(&fs, path).expect("open");
        assert_eq!(0, journal.frame_count());
        assert!(matches!(
            journal.read_config(),
            Err(ReadConfigError::ShortHeader)
        ));
    }
}
