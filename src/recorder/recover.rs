// SPDX-License-Identifier: GPL-2.0-or-later

use crate::journal::{FrameRecord, Journal, ReadConfigError};
use crate::moov::{synthesize_moov, MoovParams, SynthesizeMoovError};
use crate::recorder::{
    append_moov, journal_path, lock_path, MDAT_PAYLOAD_START, MDAT_SIZE_FIELD_POS,
};
use common::{ArcMsgLogger, LogLevel};
use fs::{File, Fs, FsError, OpenMode};
use std::{io::SeekFrom, path::Path};
use thiserror::Error;

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

// Parameter sets are tiny, anything larger is a misparse.
const MAX_PARAMETER_SET_SIZE: usize = 256;

/// True if a previous session on this path was interrupted.
///
/// Both sidecars must be present: the lock marker alone means the journal
/// never made it to disk and there is nothing to recover from.
pub fn has_incomplete_recording(fs: &dyn Fs, path: &Path) -> bool {
    fs.exists(&lock_path(path)) && fs.exists(&journal_path(path))
}

#[derive(Debug, Error)]
pub enum RecoverError {
    #[error("open journal: {0}")]
    OpenJournal(FsError),

    #[error("read config: {0}")]
    ReadConfig(#[from] ReadConfigError),

    #[error("read records: {0}")]
    ReadRecords(FsError),

    #[error("no frames in journal")]
    NoFrames,

    #[error("file size: {0}")]
    FileSize(FsError),

    #[error("mp4 file too small: {0} bytes")]
    FileTooSmall(u64),

    #[error("open mp4: {0}")]
    OpenMp4(FsError),

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
}

/// Completes an interrupted session from its journal.
///
/// The journal is authoritative: mdat bytes past the last journaled record
/// are left in the padded tail and never referenced by the sample tables.
/// Every step before the sidecars are removed is idempotent, so a failed
/// or interrupted recovery can simply be retried.
pub fn recover(fs: &dyn Fs, path: &Path, logger: &ArcMsgLogger) -> Result<(), RecoverError> {
    use RecoverError::*;

    let journal_path = journal_path(path);
    let lock_path = lock_path(path);

    let mut journal = Journal::open(fs, &journal_path).map_err(OpenJournal)?;
    let config = journal.read_config()?;
    let (video_records, audio_records) = journal.read_all().map_err(ReadRecords)?;
    drop(journal);

    logger.log(
        LogLevel::Info,
        &format!(
            "recovery: {} video and {} audio records in journal",
            video_records.len(),
            audio_records.len()
        ),
    );

    if video_records.is_empty() && audio_records.is_empty() {
        return Err(NoFrames);
    }

    // Everything between the ftyp box and the end of the file is mdat
    // until the moov is appended below.
    let file_size = fs.size(path).map_err(FileSize)?;
    if file_size < MDAT_PAYLOAD_START {
        return Err(FileTooSmall(file_size));
    }
    let mdat_total = u32::try_from(file_size - MDAT_SIZE_FIELD_POS)
        .map_err(|_| MdatTooLarge(file_size - MDAT_SIZE_FIELD_POS))?;
    {
        let mut mp4_file = fs.open(path, OpenMode::ReadWrite).map_err(OpenMp4)?;
        mp4_file
            .seek(SeekFrom::Start(MDAT_SIZE_FIELD_POS))
            .map_err(Seek)?;
        mp4_file
            .write_all(&mdat_total.to_be_bytes())
            .map_err(WriteMdatSize)?;
        mp4_file.flush().map_err(WriteMdatSize)?;
    }
    logger.log(
        LogLevel::Info,
        &format!("recovery: patched mdat size to {mdat_total}"),
    );

    let parameter_sets = extract_parameter_sets(fs, path, &video_records);
    if parameter_sets.is_none() && !video_records.is_empty() {
        logger.log(
            LogLevel::Warning,
            "recovery: no SPS/PPS found in bitstream, avcC will use fallback parameters",
        );
    }
    let (sps, pps) = match &parameter_sets {
        Some((sps, pps)) => (Some(sps.as_slice()), Some(pps.as_slice())),
        None => (None, None),
    };

    let moov = synthesize_moov(
        &MoovParams {
            video_records: &video_records,
            audio_records: &audio_records,
            config: &config,
            sps,
            pps,
            mdat_payload_start: MDAT_PAYLOAD_START,
        },
        logger,
    )?;
    append_moov(fs, path, &moov).map_err(AppendMoov)?;

    if let Err(e) = fs.remove(&journal_path) {
        logger.log(
            LogLevel::Warning,
            &format!("recovery: remove journal: {e}"),
        );
    }
    if let Err(e) = fs.remove(&lock_path) {
        logger.log(LogLevel::Warning, &format!("recovery: remove lock: {e}"));
    }

    logger.log(
        LogLevel::Info,
        &format!("recovery complete: {}", path.display()),
    );
    Ok(())
}

// Walks the journaled video samples in order and returns the first SPS and
// PPS found in the stored bitstream. The sets may come from different
// samples. Both Annex-B start codes and 4-byte length prefixes occur in
// the wild, so both layouts are scanned.
fn extract_parameter_sets(
    fs: &dyn Fs,
    path: &Path,
    video_records: &[FrameRecord],
) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut file = fs.open(path, OpenMode::Read).ok()?;

    let mut sps = None;
    let mut pps = None;
    for record in video_records {
        if record.size == 0 {
            continue;
        }
        let offset = MDAT_PAYLOAD_START + record.offset;
        if file.seek(SeekFrom::Start(offset)).is_err() {
            continue;
        }

        let mut sample = vec![0; usize::try_from(record.size).ok()?];
        match file.read_full(&mut sample) {
            Ok(n) if n == sample.len() => {}
            _ => continue,
        }

        scan_sample(&sample, &mut sps, &mut pps);
        if let (Some(sps), Some(pps)) = (&sps, &pps) {
            return Some((sps.clone(), pps.clone()));
        }
    }
    None
}

fn scan_sample(sample: &[u8], sps: &mut Option<Vec<u8>>, pps: &mut Option<Vec<u8>>) {
    let has_start_code =
        sample.starts_with(&[0, 0, 0, 1]) || sample.starts_with(&[0, 0, 1]);
    if has_start_code {
        scan_annex_b(sample, sps, pps);
    } else {
        scan_length_prefixed(sample, sps, pps);
    }
}

fn scan_annex_b(sample: &[u8], sps: &mut Option<Vec<u8>>, pps: &mut Option<Vec<u8>>) {
    let mut pos = 0;
    let mut start = 0;
    while pos + 3 < sample.len() {
        let start_len = if sample[pos..].starts_with(&[0, 0, 1]) {
            Some(3)
        } else if sample[pos..].starts_with(&[0, 0, 0, 1]) {
            Some(4)
        } else {
            None
        };

        match start_len {
            Some(start_len) => {
                if start < pos {
                    handle_nal(&sample[start..pos], sps, pps);
                    if sps.is_some() && pps.is_some() {
                        return;
                    }
                }
                pos += start_len;
                start = pos;
            }
            None => pos += 1,
        }
    }
    if start < sample.len() {
        handle_nal(&sample[start..], sps, pps);
    }
}

fn scan_length_prefixed(sample: &[u8], sps: &mut Option<Vec<u8>>, pps: &mut Option<Vec<u8>>) {
    let mut pos = 0;
    while pos + 4 <= sample.len() {
        #[allow(clippy::unwrap_used)]
        let nal_size =
            usize::try_from(u32::from_be_bytes(sample[pos..pos + 4].try_into().unwrap()))
                .unwrap_or(usize::MAX);
        pos += 4;
        if nal_size == 0 || nal_size > sample.len() - pos {
            break;
        }
        handle_nal(&sample[pos..pos + nal_size], sps, pps);
        if sps.is_some() && pps.is_some() {
            return;
        }
        pos += nal_size;
    }
}

fn handle_nal(nal: &[u8], sps: &mut Option<Vec<u8>>, pps: &mut Option<Vec<u8>>) {
    if nal.is_empty() || nal.len() > MAX_PARAMETER_SET_SIZE {
        return;
    }
    match nal[0] & 0x1f {
        NAL_TYPE_SPS if sps.is_none() => *sps = Some(nal.to_vec()),
        NAL_TYPE_PPS if pps.is_none() => *pps = Some(nal.to_vec()),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(
        &[0, 0, 0, 1, 0x67, 1, 2, 0, 0, 0, 1, 0x68, 3],
        Some(vec![0x67, 1, 2]),
        Some(vec![0x68, 3]);
        "annex b 4-byte"
    )]
    #[test_case(
        &[0, 0, 1, 0x67, 1, 2, 0, 0, 1, 0x68, 3],
        Some(vec![0x67, 1, 2]),
        Some(vec![0x68, 3]);
        "annex b 3-byte"
    )]
    #[test_case(
        &[
            0, 0, 0, 3, 0x67, 1, 2, //
            0, 0, 0, 2, 0x68, 3, //
            0, 0, 0, 2, 0x65, 9, //
        ],
        Some(vec![0x67, 1, 2]),
        Some(vec![0x68, 3]);
        "length prefixed"
    )]
    #[test_case(
        &[0, 0, 0, 2, 0x65, 9],
        None,
        None;
        "no parameter sets"
    )]
    #[test_case(
        &[0, 0, 0, 9, 0x67, 1],
        None,
        None;
        "truncated nal"
    )]
    fn test_scan_sample(sample: &[u8], want_sps: Option<Vec<u8>>, want_pps: Option<Vec<u8>>) {
        let mut sps = None;
        let mut pps = None;
        scan_sample(sample, &mut sps, &mut pps);
        assert_eq!(want_sps, sps);
        assert_eq!(want_pps, pps);
    }

    #[test]
    fn test_handle_nal_size_limit() {
        let mut sps = None;
        let mut pps = None;
        let huge = vec![0x67; MAX_PARAMETER_SET_SIZE + 1];
        handle_nal(&huge, &mut sps, &mut pps);
        assert_eq!(None, sps);

        handle_nal(&[], &mut sps, &mut pps);
        assert_eq!(None, sps);
    }

    #[test]
    fn test_scan_keeps_first_match() {
        let mut sps = None;
        let mut pps = None;
        scan_sample(
            &[0, 0, 0, 2, 0x67, 1, 0, 0, 0, 2, 0x67, 2],
            &mut sps,
            &mut pps,
        );
        assert_eq!(Some(vec![0x67, 1]), sps);
    }
}
