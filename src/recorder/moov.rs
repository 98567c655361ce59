// SPDX-License-Identifier: GPL-2.0-or-later

use crate::journal::{FrameRecord, RecorderConfig};
use common::{ArcMsgLogger, LogLevel};
use mp4::{Boxes, Mp4Error};
use std::num::TryFromIntError;
use thiserror::Error;

const MOVIE_TIMESCALE: u32 = 1000;
const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;

const UNITY_MATRIX: [i32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

// AAC-LC access units decode to 1024 PCM samples.
const AAC_FRAME_DURATION: u32 = 1024;

// Emitted when no parameter sets were provided or recovered. The result
// parses as a valid avcC but is unlikely to play.
const FALLBACK_SPS: [u8; 7] = [0x42, 0x00, 0x1e, 0xe1, 0x00, 0x00, 0x00];
const FALLBACK_PPS: [u8; 2] = [0xe1, 0x00];

/// Inputs to moov synthesis.
pub struct MoovParams<'a> {
    pub video_records: &'a [FrameRecord],
    pub audio_records: &'a [FrameRecord],
    pub config: &'a RecorderConfig,

    /// May carry an Annex-B start code, it is stripped before embedding.
    pub sps: Option<&'a [u8]>,
    pub pps: Option<&'a [u8]>,

    /// Absolute file offset of the first mdat payload byte.
    pub mdat_payload_start: u64,
}

#[derive(Debug, Error)]
pub enum SynthesizeMoovError {
    #[error("no frames")]
    NoFrames,

    #[error("chunk offset overflow: {0}")]
    OffsetOverflow(u64),

    #[error("duration: {0} {1}")]
    Duration(i64, TryFromIntError),

    #[error("negative sample delta: {0}")]
    NegativeDelta(i64),

    #[error("sample count: {0} {1}")]
    SampleCount(usize, TryFromIntError),

    #[error("video dimension: {0} {1}")]
    Dimension(u32, TryFromIntError),

    #[error("mp4: {0}")]
    Mp4(#[from] Mp4Error),
}

/// Builds the complete moov box for the journaled samples.
///
/// Pure and deterministic: the same records, config and parameter sets
/// always produce the same bytes, whether invoked by a clean stop or by
/// recovery.
pub fn synthesize_moov(
    params: &MoovParams,
    logger: &ArcMsgLogger,
) -> Result<Vec<u8>, SynthesizeMoovError> {
    use SynthesizeMoovError::*;

    if params.video_records.is_empty() && params.audio_records.is_empty() {
        return Err(NoFrames);
    }

    let video_duration = duration_ms(params.video_records, params.config.video_timescale)?;
    let audio_duration = duration_ms(params.audio_records, params.config.audio_timescale)?;
    let movie_duration = std::cmp::max(video_duration, audio_duration);

    let mut moov = Boxes::new(mp4::Moov).with_child(
        // Mvhd.
        Boxes::new(mp4::Mvhd {
            timescale: MOVIE_TIMESCALE,
            version: mp4::MvhdVersion::V0(mp4::MvhdV0 {
                duration: movie_duration,
                ..Default::default()
            }),
            rate: 65536,
            volume: 256,
            matrix: UNITY_MATRIX,
            next_track_id: AUDIO_TRACK_ID + 1,
            ..Default::default()
        }),
    );

    if !params.video_records.is_empty() {
        moov.children.push(generate_video_trak(
            params,
            video_duration,
            logger,
        )?);
    }
    if !params.audio_records.is_empty() {
        moov.children.push(generate_audio_trak(params, audio_duration)?);
    }

    let mut buf = Vec::with_capacity(moov.size());
    moov.marshal(&mut buf)?;
    Ok(buf)
}

// Track duration in the movie timescale. The duration deliberately ends at
// the last sample's PTS, matching the journaled timeline.
fn duration_ms(records: &[FrameRecord], timescale: u32) -> Result<u32, SynthesizeMoovError> {
    use SynthesizeMoovError::*;
    let Some(last) = records.last() else {
        return Ok(0);
    };
    if timescale == 0 {
        return Ok(0);
    }
    let ms = last
        .pts
        .checked_mul(i64::from(MOVIE_TIMESCALE))
        .map(|v| v / i64::from(timescale))
        .unwrap_or(i64::MAX);
    u32::try_from(ms).map_err(|e| Duration(ms, e))
}

fn track_duration(records: &[FrameRecord]) -> Result<u32, SynthesizeMoovError> {
    use SynthesizeMoovError::*;
    let Some(last) = records.last() else {
        return Ok(0);
    };
    u32::try_from(last.pts).map_err(|e| Duration(last.pts, e))
}

struct SampleTables {
    stts: Vec<mp4::SttsEntry>,
    stss: Vec<u32>,
    stsz: Vec<u32>,
    stco: Vec<u32>,
}

// Derives the four per-sample tables from the journal records. Durations
// are successive PTS deltas, the final sample gets `last_duration`.
fn generate_sample_tables(
    records: &[FrameRecord],
    mdat_payload_start: u64,
    last_duration: u32,
) -> Result<SampleTables, SynthesizeMoovError> {
    use SynthesizeMoovError::*;

    let mut stts: Vec<mp4::SttsEntry> = Vec::new();
    let mut stss = Vec::new();
    let mut stsz = Vec::with_capacity(records.len());
    let mut stco = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        let delta = match records.get(i + 1) {
            Some(next) => {
                let delta = next.pts - record.pts;
                u32::try_from(delta).map_err(|_| NegativeDelta(delta))?
            }
            None => last_duration,
        };
        match stts.last_mut() {
            Some(last) if last.sample_delta == delta => {
                last.sample_count += 1;
            }
            _ => stts.push(mp4::SttsEntry {
                sample_count: 1,
                sample_delta: delta,
            }),
        }

        stsz.push(record.size);

        if record.is_keyframe {
            stss.push(u32::try_from(i + 1).map_err(|e| SampleCount(i + 1, e))?);
        }

        let chunk_offset = mdat_payload_start + record.offset;
        stco.push(u32::try_from(chunk_offset).map_err(|_| OffsetOverflow(chunk_offset))?);
    }

    Ok(SampleTables {
        stts,
        stss,
        stsz,
        stco,
    })
}

// Final-sample duration for video: the previous delta when there is one,
// one thirtieth of a second otherwise.
fn video_last_duration(records: &[FrameRecord], timescale: u32) -> u32 {
    let n = records.len();
    if n >= 2 {
        let delta = records[n - 1].pts - records[n - 2].pts;
        u32::try_from(delta).unwrap_or(0)
    } else {
        std::cmp::max(timescale / 30, 1)
    }
}

fn generate_video_trak(
    params: &MoovParams,
    duration: u32,
    logger: &ArcMsgLogger,
) -> Result<Boxes, SynthesizeMoovError> {
    use SynthesizeMoovError::*;

    let config = params.config;
    let records = params.video_records;

    let tables = generate_sample_tables(
        records,
        params.mdat_payload_start,
        video_last_duration(records, config.video_timescale),
    )?;

    let width = u16::try_from(config.video_width).map_err(|e| Dimension(config.video_width, e))?;
    let height =
        u16::try_from(config.video_height).map_err(|e| Dimension(config.video_height, e))?;

    let stbl = Boxes::new(mp4::Stbl).with_children6(
        // Stsd.
        Boxes::new(mp4::Stsd {
            full_box: mp4::FullBox::default(),
            entry_count: 1,
        })
        .with_child(
            // Avc1.
            Boxes::new(mp4::Avc1 {
                sample_entry: mp4::SampleEntry {
                    data_reference_index: 1,
                    ..Default::default()
                },
                width,
                height,
                horiz_resolution: 0x0048_0000, // 72 dpi.
                vert_resolution: 0x0048_0000,
                frame_count: 1,
                depth: 24,
                pre_defined3: -1,
                ..Default::default()
            })
            .with_child(
                // AvcC.
                Boxes::new(generate_avcc(params.sps, params.pps, logger)),
            ),
        ),
        // Stts.
        Boxes::new(mp4::Stts {
            full_box: mp4::FullBox::default(),
            entries: tables.stts,
        }),
        // Stss.
        Boxes::new(mp4::Stss {
            full_box: mp4::FullBox::default(),
            sample_numbers: tables.stss,
        }),
        // Stsz.
        Boxes::new(mp4::Stsz {
            full_box: mp4::FullBox::default(),
            sample_size: 0,
            sample_count: u32::try_from(tables.stsz.len())
                .map_err(|e| SampleCount(tables.stsz.len(), e))?,
            entry_sizes: tables.stsz,
        }),
        // Stsc.
        Boxes::new(mp4::Stsc {
            full_box: mp4::FullBox::default(),
            entries: vec![mp4::StscEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
        }),
        // Stco.
        Boxes::new(mp4::Stco {
            full_box: mp4::FullBox::default(),
            chunk_offsets: tables.stco,
        }),
    );

    let trak = Boxes::new(mp4::Trak).with_children2(
        // Tkhd.
        Boxes::new(mp4::Tkhd {
            flags: [0, 0, 0x0f],
            track_id: VIDEO_TRACK_ID,
            version: mp4::TkhdVersion::V0(mp4::TkhdV0 {
                duration,
                ..Default::default()
            }),
            matrix: UNITY_MATRIX,
            width: u32::from(width) * 65536,
            height: u32::from(height) * 65536,
            ..Default::default()
        }),
        // Mdia.
        Boxes::new(mp4::Mdia).with_children3(
            // Mdhd.
            Boxes::new(mp4::Mdhd {
                timescale: config.video_timescale,
                language: *b"und",
                version: mp4::MdhdVersion::V0(mp4::MdhdV0 {
                    duration: track_duration(records)?,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            // Hdlr.
            Boxes::new(mp4::Hdlr {
                handler_type: *b"vide",
                name: "VideoHandler".to_owned(),
                ..Default::default()
            }),
            // Minf.
            Boxes::new(mp4::Minf).with_children3(
                // Vmhd.
                Boxes::new(mp4::Vmhd::default()),
                generate_dinf(),
                stbl,
            ),
        ),
    );

    Ok(trak)
}

fn generate_audio_trak(params: &MoovParams, duration: u32) -> Result<Boxes, SynthesizeMoovError> {
    use SynthesizeMoovError::*;

    let config = params.config;
    let records = params.audio_records;

    let tables =
        generate_sample_tables(records, params.mdat_payload_start, AAC_FRAME_DURATION)?;

    let channel_count = if config.audio_channels > 0 {
        config.audio_channels
    } else {
        2
    };
    let sample_rate = if config.audio_sample_rate > 0 {
        config.audio_sample_rate
    } else {
        48000
    };

    let stbl = Boxes::new(mp4::Stbl).with_children5(
        // Stsd.
        Boxes::new(mp4::Stsd {
            full_box: mp4::FullBox::default(),
            entry_count: 1,
        })
        .with_child(
            // Mp4a.
            Boxes::new(mp4::Mp4a {
                sample_entry: mp4::SampleEntry {
                    data_reference_index: 1,
                    ..Default::default()
                },
                channel_count,
                sample_size: 16,
                sample_rate: sample_rate.wrapping_shl(16), // fixed-point 16.16
                ..Default::default()
            })
            .with_child(
                // Esds.
                Boxes::new(mp4::Esds {
                    full_box: mp4::FullBox::default(),
                    es_id: 2, // Audio track ID.
                    object_type_indication: 0x40, // MPEG-4 audio.
                    stream_type: 0x15,            // Audio stream, upstream flag set.
                    buffer_size_db: 0,
                    max_bitrate: 0,
                    avg_bitrate: 0,
                    decoder_specific_info: audio_specific_config(sample_rate, channel_count)
                        .to_vec(),
                }),
            ),
        ),
        // Stts.
        Boxes::new(mp4::Stts {
            full_box: mp4::FullBox::default(),
            entries: tables.stts,
        }),
        // Stsz.
        Boxes::new(mp4::Stsz {
            full_box: mp4::FullBox::default(),
            sample_size: 0,
            sample_count: u32::try_from(tables.stsz.len())
                .map_err(|e| SampleCount(tables.stsz.len(), e))?,
            entry_sizes: tables.stsz,
        }),
        // Stsc.
        Boxes::new(mp4::Stsc {
            full_box: mp4::FullBox::default(),
            entries: vec![mp4::StscEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
        }),
        // Stco.
        Boxes::new(mp4::Stco {
            full_box: mp4::FullBox::default(),
            chunk_offsets: tables.stco,
        }),
    );

    let trak = Boxes::new(mp4::Trak).with_children2(
        // Tkhd.
        Boxes::new(mp4::Tkhd {
            flags: [0, 0, 0x0f],
            track_id: AUDIO_TRACK_ID,
            version: mp4::TkhdVersion::V0(mp4::TkhdV0 {
                duration,
                ..Default::default()
            }),
            volume: 256,
            matrix: UNITY_MATRIX,
            width: 0x0001_0000,
            height: 0x0001_0000,
            ..Default::default()
        }),
        // Mdia.
        Boxes::new(mp4::Mdia).with_children3(
            // Mdhd.
            Boxes::new(mp4::Mdhd {
                timescale: config.audio_timescale,
                language: *b"und",
                version: mp4::MdhdVersion::V0(mp4::MdhdV0 {
                    duration: track_duration(records)?,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            // Hdlr.
            Boxes::new(mp4::Hdlr {
                handler_type: *b"soun",
                name: "SoundHandler".to_owned(),
                ..Default::default()
            }),
            // Minf.
            Boxes::new(mp4::Minf).with_children3(
                // Smhd.
                Boxes::new(mp4::Smhd::default()),
                generate_dinf(),
                stbl,
            ),
        ),
    );

    Ok(trak)
}

fn generate_dinf() -> Boxes {
    Boxes::new(mp4::Dinf).with_child(
        // Dref.
        Boxes::new(mp4::Dref {
            full_box: mp4::FullBox::default(),
            entry_count: 1,
        })
        .with_child(
            // Url. Samples live in this file.
            Boxes::new(mp4::Url {
                full_box: mp4::FullBox {
                    version: 0,
                    flags: [0, 0, 1],
                },
                location: String::new(),
            }),
        ),
    )
}

fn generate_avcc(sps: Option<&[u8]>, pps: Option<&[u8]>, logger: &ArcMsgLogger) -> mp4::AvcC {
    let sps = match sps {
        Some(v) if !v.is_empty() => strip_start_code(v).to_vec(),
        _ => {
            logger.log(
                LogLevel::Warning,
                "no SPS available, using fallback avcC parameters",
            );
            FALLBACK_SPS.to_vec()
        }
    };
    let pps = match pps {
        Some(v) if !v.is_empty() => strip_start_code(v).to_vec(),
        _ => {
            logger.log(
                LogLevel::Warning,
                "no PPS available, using fallback avcC parameters",
            );
            FALLBACK_PPS.to_vec()
        }
    };

    let (profile, profile_compatibility, level) = if sps.len() >= 4 {
        (sps[1], sps[2], sps[3])
    } else {
        (mp4::AVC_BASELINE_PROFILE, 0x00, 0x1f)
    };

    mp4::AvcC {
        configuration_version: 1,
        profile,
        profile_compatibility,
        level,
        reserved: 0b11_1111,
        length_size_minus_one: 3, // 4-byte NAL length prefixes.
        reserved2: 0b111,
        num_of_sequence_parameter_sets: 1,
        sequence_parameter_sets: vec![mp4::AvcParameterSet(sps)],
        num_of_picture_parameter_sets: 1,
        picture_parameter_sets: vec![mp4::AvcParameterSet(pps)],
    }
}

fn strip_start_code(nal: &[u8]) -> &[u8] {
    if nal.starts_with(&[0, 0, 0, 1]) {
        &nal[4..]
    } else if nal.starts_with(&[0, 0, 1]) {
        &nal[3..]
    } else {
        nal
    }
}

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

fn sample_rate_index(sample_rate: u32) -> u8 {
    match SAMPLE_RATES.iter().position(|v| *v == sample_rate) {
        Some(i) => u8::try_from(i).unwrap_or(3),
        // 48 kHz.
        None => 3,
    }
}

// Two byte AAC-LC AudioSpecificConfig:
// 5 bits object type, 4 bits sample rate index, 4 bits channel config.
fn audio_specific_config(sample_rate: u32, channels: u16) -> [u8; 2] {
    let object_type: u16 = 2; // AAC-LC.
    let bits = (object_type & 0x1f) << 11
        | u16::from(sample_rate_index(sample_rate) & 0x0f) << 7
        | (channels & 0x0f) << 3;
    bits.to_be_bytes()
}
