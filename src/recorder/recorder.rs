// SPDX-License-Identifier: GPL-2.0-or-later

use crate::journal::{FrameRecord, Journal, RecorderConfig, AUDIO_TRACK, VIDEO_TRACK};
use crate::moov::{synthesize_moov, MoovParams, SynthesizeMoovError};
use common::{ArcMsgLogger, LogLevel};
use fs::{DynFile, DynFs, File, Fs, FsError, OpenMode};
use mp4::{CompatibleBrandElem, Ftyp, Mp4Error};
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;

/// Absolute file offset of the first mdat payload byte:
/// a 32-byte ftyp followed by the 8-byte mdat header.
pub const MDAT_PAYLOAD_START: u64 = 40;

// The mdat size field sits right after the ftyp box.
pub(crate) const MDAT_SIZE_FIELD_POS: u64 = 32;

const LOCK_CONTENTS: &[u8] = b"RECORDING";

pub(crate) fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn journal_path(path: &Path) -> PathBuf {
    sidecar_path(path, ".idx")
}

pub(crate) fn lock_path(path: &Path) -> PathBuf {
    sidecar_path(path, ".lock")
}

/// Crash-safe MP4 writer.
///
/// Samples are appended to the mdat box as they arrive and journaled to a
/// sidecar index file. If the process dies mid-session, the journal and a
/// lock marker remain next to the output file and
/// [`recover`](crate::recover) reconstructs a valid MP4 from them. Dropping
/// a live recorder is deliberately equivalent to a crash.
///
/// Single-writer: operations run on the caller's thread and block for the
/// duration of file writes and syncs.
pub struct Recorder {
    fs: DynFs,
    logger: ArcMsgLogger,
    session: Option<Session>,

    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

struct Session {
    mp4_path: PathBuf,
    journal_path: PathBuf,
    lock_path: PathBuf,

    mp4_file: DynFile,
    journal: Journal,

    // Held for the session lifetime, written once.
    lock_file: DynFile,

    config: RecorderConfig,
    mdat_size: u64,
    frame_count: u64,

    video_records: Vec<FrameRecord>,
    audio_records: Vec<FrameRecord>,

    last_flush: Instant,
    frames_since_flush: u32,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("already recording")]
    AlreadyRecording,

    #[error("create mp4: {0}")]
    CreateMp4(FsError),

    #[error("marshal header: {0}")]
    MarshalHeader(#[from] Mp4Error),

    #[error("write header: {0}")]
    WriteHeader(FsError),

    #[error("unexpected mdat start: {0}")]
    BadMdatStart(u64),

    #[error("create journal: {0}")]
    CreateJournal(FsError),

    #[error("write config: {0}")]
    WriteConfig(FsError),

    #[error("sync journal: {0}")]
    SyncJournal(FsError),

    #[error("create lock: {0}")]
    CreateLock(FsError),
}

#[derive(Debug, Error)]
pub enum SetCodecConfigError {
    #[error("empty parameter set")]
    EmptyParameterSet,
}

#[derive(Debug, Error)]
pub enum WriteFrameError {
    #[error("not recording")]
    NotRecording,

    #[error("empty frame")]
    EmptyFrame,

    #[error("frame too large: {0} {1}")]
    FrameTooLarge(usize, std::num::TryFromIntError),

    #[error("write mdat: {0}")]
    WriteMdat(FsError),

    #[error("append record: {0}")]
    AppendRecord(FsError),

    #[error("flush: {0}")]
    Flush(FsError),
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("not recording")]
    NotRecording,

    #[error("no frames were written")]
    NoFrames,

    #[error("flush: {0}")]
    Flush(FsError),

    #[error("seek: {0}")]
    Seek(FsError),

    #[error("mdat too large for a 32-bit size field: {0}")]
    MdatTooLarge(u64),

    #[error("write mdat size: {0}")]
    WriteMdatSize(FsError),

    #[error("synthesize moov: {0}")]
    SynthesizeMoov(#[from] SynthesizeMoovError),

    #[error("append moov: {0}")]
    AppendMoov(FsError),

    #[error("remove journal: {0}")]
    RemoveJournal(FsError),

    #[error("remove lock: {0}")]
    RemoveLock(FsError),
}

impl Recorder {
    #[must_use]
    pub fn new(fs: DynFs, logger: ArcMsgLogger) -> Self {
        Self {
            fs,
            logger,
            session: None,
            sps: None,
            pps: None,
        }
    }

    /// Creates the output file, the journal and the lock marker and begins
    /// a session. Partially created artifacts are removed on failure.
    pub fn start(&mut self, path: &Path, config: RecorderConfig) -> Result<(), StartError> {
        if self.session.is_some() {
            return Err(StartError::AlreadyRecording);
        }

        match create_session(self.fs.as_ref(), path, config) {
            Ok(session) => {
                self.logger.log(
                    LogLevel::Info,
                    &format!("recording started: {}", path.display()),
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                // Best effort, the failure itself is what gets reported.
                self.fs.remove(path).ok();
                self.fs.remove(&journal_path(path)).ok();
                self.fs.remove(&lock_path(path)).ok();
                Err(e)
            }
        }
    }

    /// Stores the H.264 parameter sets embedded in the avcC box on stop.
    /// May be called at any time before `stop`, the last call wins.
    pub fn set_video_codec_config(
        &mut self,
        sps: &[u8],
        pps: &[u8],
    ) -> Result<(), SetCodecConfigError> {
        if sps.is_empty() || pps.is_empty() {
            return Err(SetCodecConfigError::EmptyParameterSet);
        }
        self.sps = Some(sps.to_vec());
        self.pps = Some(pps.to_vec());
        Ok(())
    }

    pub fn write_video(
        &mut self,
        data: &[u8],
        pts: i64,
        is_keyframe: bool,
    ) -> Result<(), WriteFrameError> {
        self.write_frame(data, pts, is_keyframe, VIDEO_TRACK)
    }

    pub fn write_audio(&mut self, data: &[u8], pts: i64) -> Result<(), WriteFrameError> {
        self.write_frame(data, pts, true, AUDIO_TRACK)
    }

    fn write_frame(
        &mut self,
        data: &[u8],
        pts: i64,
        is_keyframe: bool,
        track_id: u8,
    ) -> Result<(), WriteFrameError> {
        use WriteFrameError::*;
        let session = self.session.as_mut().ok_or(NotRecording)?;
        if data.is_empty() {
            return Err(EmptyFrame);
        }
        let size = u32::try_from(data.len()).map_err(|e| FrameTooLarge(data.len(), e))?;

        let record = FrameRecord {
            offset: session.mdat_size,
            size,
            pts,
            dts: pts,
            is_keyframe,
            track_id,
        };

        // Mdat first. If the mdat write fails the journal never references
        // the frame, and recovery still yields a valid file covering every
        // previously journaled sample.
        session.mp4_file.write_all(data).map_err(WriteMdat)?;
        session.journal.append_frame(&record).map_err(AppendRecord)?;

        if track_id == VIDEO_TRACK {
            session.video_records.push(record);
        } else {
            session.audio_records.push(record);
        }
        session.mdat_size += u64::from(size);
        session.frame_count += 1;
        session.frames_since_flush += 1;

        session.flush_if_needed().map_err(Flush)?;
        Ok(())
    }

    /// Finalizes the file: patches the mdat size, appends the moov and
    /// removes the sidecars. On failure the sidecars are left in place so
    /// a later [`recover`](crate::recover) can complete the file.
    pub fn stop(&mut self) -> Result<(), StopError> {
        use StopError::*;
        let session = self.session.take().ok_or(NotRecording)?;

        if session.video_records.is_empty() && session.audio_records.is_empty() {
            // Nothing to index. Sidecars stay behind for inspection.
            return Err(NoFrames);
        }

        let Session {
            mp4_path,
            journal_path,
            lock_path,
            mut mp4_file,
            mut journal,
            lock_file,
            config,
            mdat_size,
            video_records,
            audio_records,
            ..
        } = session;

        mp4_file.flush().map_err(Flush)?;
        journal.flush().map_err(Flush)?;
        mp4_file.sync().map_err(Flush)?;
        journal.sync().map_err(Flush)?;

        // Patch the placeholder mdat size, header included.
        let mdat_total = mdat_size
            .checked_add(8)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(MdatTooLarge(mdat_size))?;
        mp4_file
            .seek(SeekFrom::Start(MDAT_SIZE_FIELD_POS))
            .map_err(Seek)?;
        mp4_file
            .write_all(&mdat_total.to_be_bytes())
            .map_err(WriteMdatSize)?;
        mp4_file.flush().map_err(Flush)?;

        // Close the handle so the moov append can reopen the file.
        drop(mp4_file);

        let moov = synthesize_moov(
            &MoovParams {
                video_records: &video_records,
                audio_records: &audio_records,
                config: &config,
                sps: self.sps.as_deref(),
                pps: self.pps.as_deref(),
                mdat_payload_start: MDAT_PAYLOAD_START,
            },
            &self.logger,
        )?;
        append_moov(self.fs.as_ref(), &mp4_path, &moov).map_err(AppendMoov)?;

        drop(journal);
        drop(lock_file);
        self.fs.remove(&journal_path).map_err(RemoveJournal)?;
        self.fs.remove(&lock_path).map_err(RemoveLock)?;

        self.logger.log(
            LogLevel::Info,
            &format!("recording stopped: {}", mp4_path.display()),
        );
        Ok(())
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Number of frames written in the current session.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.frame_count)
    }
}

fn create_session(
    fs: &dyn Fs,
    path: &Path,
    config: RecorderConfig,
) -> Result<Session, StartError> {
    use StartError::*;

    let mut mp4_file = fs.open(path, OpenMode::Write).map_err(CreateMp4)?;

    let mut header = Vec::new();
    mp4::write_single_box(
        &mut header,
        &Ftyp {
            major_brand: *b"isom",
            minor_version: 0x200,
            compatible_brands: vec![
                CompatibleBrandElem(*b"isom"),
                CompatibleBrandElem(*b"iso2"),
                CompatibleBrandElem(*b"avc1"),
                CompatibleBrandElem(*b"mp41"),
            ],
        },
    )?;
    // Mdat header with a zero size field, patched on stop. A zero size
    // means "until end of file" while the session is open.
    mp4::write_box_header(&mut header, 0, mp4::TYPE_MDAT)?;
    mp4_file.write_all(&header).map_err(WriteHeader)?;

    let mdat_start = mp4_file.tell().map_err(WriteHeader)?;
    if mdat_start != MDAT_PAYLOAD_START {
        return Err(BadMdatStart(mdat_start));
    }

    let journal_path = journal_path(path);
    let mut journal = Journal::create(fs, &journal_path).map_err(CreateJournal)?;
    journal.write_config(&config).map_err(WriteConfig)?;
    journal.flush().map_err(SyncJournal)?;
    journal.sync().map_err(SyncJournal)?;

    let lock_path = lock_path(path);
    let mut lock_file = fs.open(&lock_path, OpenMode::Write).map_err(CreateLock)?;
    lock_file.write_all(LOCK_CONTENTS).map_err(CreateLock)?;
    lock_file.flush().map_err(CreateLock)?;
    lock_file.sync().map_err(CreateLock)?;

    Ok(Session {
        mp4_path: path.to_path_buf(),
        journal_path,
        lock_path,
        mp4_file,
        journal,
        lock_file,
        config,
        mdat_size: 0,
        frame_count: 0,
        video_records: Vec::new(),
        audio_records: Vec::new(),
        last_flush: Instant::now(),
        frames_since_flush: 0,
    })
}

pub(crate) fn append_moov(fs: &dyn Fs, path: &Path, moov: &[u8]) -> Result<(), FsError> {
    let mut file = fs.open(path, OpenMode::Append)?;
    file.write_all(moov)?;
    file.flush()?;
    file.sync()?;
    Ok(())
}

impl Session {
    fn flush_if_needed(&mut self) -> Result<(), FsError> {
        let elapsed = self.last_flush.elapsed().as_millis();
        if elapsed >= u128::from(self.config.flush_interval_ms)
            || self.frames_since_flush >= self.config.flush_frame_count
        {
            self.flush()?;
        }
        Ok(())
    }

    // Stream buffers first, then durable syncs. The journal is synced
    // last: a crash mid-flush leaves at most an unreferenced mdat tail,
    // never a journal record without its sample bytes.
    fn flush(&mut self) -> Result<(), FsError> {
        self.mp4_file.flush()?;
        self.journal.flush()?;
        self.mp4_file.sync()?;
        self.journal.sync()?;

        self.last_flush = Instant::now();
        self.frames_since_flush = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DummyMsgLogger;
    use fs::MapFs;
    use pretty_assertions::assert_eq;

    fn new_test_recorder(fs: &MapFs) -> Recorder {
        Recorder::new(Fs::clone(fs), DummyMsgLogger::new())
    }

    #[test]
    fn test_sidecar_paths() {
        assert_eq!(
            PathBuf::from("dir/rec.mp4.idx"),
            journal_path(Path::new("dir/rec.mp4"))
        );
        assert_eq!(
            PathBuf::from("dir/rec.mp4.lock"),
            lock_path(Path::new("dir/rec.mp4"))
        );
    }

    #[test]
    fn test_not_recording() {
        let fs = MapFs::new();
        let mut recorder = new_test_recorder(&fs);

        assert!(!recorder.is_recording());
        assert_eq!(0, recorder.frame_count());
        assert!(matches!(
            recorder.write_video(&[0], 0, true),
            Err(WriteFrameError::NotRecording)
        ));
        assert!(matches!(
            recorder.write_audio(&[0], 0),
            Err(WriteFrameError::NotRecording)
        ));
        assert!(matches!(recorder.stop(), Err(StopError::NotRecording)));
    }

    #[test]
    fn test_already_recording() {
        let fs = MapFs::new();
        let mut recorder = new_test_recorder(&fs);

        recorder
            .start(Path::new("a.mp4"), RecorderConfig::default())
            .expect("start");
        assert!(recorder.is_recording());
        assert!(matches!(
            recorder.start(Path::new("b.mp4"), RecorderConfig::default()),
            Err(StartError::AlreadyRecording)
        ));
    }

    #[test]
    fn test_start_writes_header_and_sidecars() {
        let fs = MapFs::new();
        let mut recorder = new_test_recorder(&fs);
        let path = Path::new("a.mp4");

        recorder
            .start(path, RecorderConfig::default())
            .expect("start");

        let file = fs.contents(path).expect("mp4 exists");
        assert_eq!(40, file.len());
        #[rustfmt::skip]
        assert_eq!(
            vec![
                0, 0, 0, 0x20, b'f', b't', b'y', b'p', //
                b'i', b's', b'o', b'm', //
                0, 0, 2, 0, // Minor version.
                b'i', b's', b'o', b'm', //
                b'i', b's', b'o', b'2', //
                b'a', b'v', b'c', b'1', //
                b'm', b'p', b'4', b'1', //
                0, 0, 0, 0, b'm', b'd', b'a', b't', //
            ],
            file
        );

        assert_eq!(
            Some(b"RECORDING".to_vec()),
            fs.contents(Path::new("a.mp4.lock"))
        );
        assert!(fs.exists(Path::new("a.mp4.idx")));
    }

    #[test]
    fn test_empty_frame() {
        let fs = MapFs::new();
        let mut recorder = new_test_recorder(&fs);
        recorder
            .start(Path::new("a.mp4"), RecorderConfig::default())
            .expect("start");

        assert!(matches!(
            recorder.write_video(&[], 0, true),
            Err(WriteFrameError::EmptyFrame)
        ));
        assert!(matches!(
            recorder.write_audio(&[], 0),
            Err(WriteFrameError::EmptyFrame)
        ));
    }

    #[test]
    fn test_set_video_codec_config_rejects_empty() {
        let fs = MapFs::new();
        let mut recorder = new_test_recorder(&fs);
        assert!(matches!(
            recorder.set_video_codec_config(&[], &[0x68]),
            Err(SetCodecConfigError::EmptyParameterSet)
        ));
        assert!(matches!(
            recorder.set_video_codec_config(&[0x67], &[]),
            Err(SetCodecConfigError::EmptyParameterSet)
        ));
        recorder
            .set_video_codec_config(&[0x67], &[0x68])
            .expect("valid parameter sets");
    }

    #[test]
    fn test_flush_policy_frame_count() {
        let fs = MapFs::new();
        let mut recorder = new_test_recorder(&fs);
        recorder
            .start(
                Path::new("a.mp4"),
                RecorderConfig {
                    // Effectively disable the timer.
                    flush_interval_ms: u32::MAX,
                    flush_frame_count: 2,
                    ..Default::default()
                },
            )
            .expect("start");

        // Journal and lock sync once each during start.
        assert_eq!(2, fs.sync_count());

        recorder.write_video(&[0; 16], 0, true).expect("write");
        assert_eq!(2, fs.sync_count());

        // Second frame crosses the threshold: mdat and journal sync.
        recorder.write_video(&[0; 16], 1000, false).expect("write");
        assert_eq!(4, fs.sync_count());

        recorder.write_video(&[0; 16], 2000, false).expect("write");
        assert_eq!(4, fs.sync_count());
        recorder.write_video(&[0; 16], 3000, false).expect("write");
        assert_eq!(6, fs.sync_count());
    }
}
