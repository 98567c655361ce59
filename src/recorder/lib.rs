// SPDX-License-Identifier: GPL-2.0-or-later

mod journal;
mod moov;
mod recorder;
mod recover;


pub use journal::{
    FrameRecord, Journal, ReadConfigError, RecorderConfig, AUDIO_TRACK, FRAME_RECORD_SIZE,
    JOURNAL_MAGIC, VIDEO_TRACK,
};
pub use moov::{synthesize_moov, MoovParams, SynthesizeMoovError};
pub use recorder::{
    Recorder, SetCodecConfigError, StartError, StopError, WriteFrameError, MDAT_PAYLOAD_START,
};
pub use recover::{has_incomplete_recording, recover, RecoverError};
