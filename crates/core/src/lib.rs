//! Core library for avatar lip sync.
//!
//! Two independent strategies animate an avatar's mouth:
//!
//! - [`VolumeLipSync`] analyses playing audio every frame and maps its
//!   loudness onto the mouth-open control.
//! - [`PhonemeLipSync`] maps text onto visemes and plays them back as a timed
//!   sequence of discrete mouth shapes.
//!
//! Both write through an [`ExpressionTarget`], which hides which of the two
//! avatar control schemas is present. Using both strategies on the same avatar
//! at the same time is not supported.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod expression;
pub mod phoneme;
pub mod timeline;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::{AnalysisFrame, FrequencyAnalyser};
pub use audio::{
    AnalysedSource, AudioContext, AudioDecoder, AudioFetcher, AudioSession, BufferSource,
    DecodedAudio, FileFetcher, SoftwareAudioContext, SymphoniaDecoder,
};
pub use config::{AnalyserConfig, LipSyncConfig, PhonemeConfig, VolumeConfig};
pub use error::{LipSyncError, Result};
pub use expression::{
    Avatar, BlendShapeProxy, ExpressionManager, ExpressionSchema, ExpressionTarget, MouthShape,
};
pub use phoneme::{text_to_phonemes, PhonemeLipSync, PhonemeSequence, PlaybackOutcome, Viseme};
pub use timeline::{PlaybackClock, Schedule, ScheduledEvent, TimedTask};
pub use volume::{LipSyncState, TickOutcome, VolumeLipSync};
