//! # Audio Module
//!
//! Audio pipeline and per-guild playback for the bot.
//!
//! ## Architecture
//!
//! ### [`transmux`] - ffmpeg pipeline
//! - Re-frames any input stream as Ogg/Opus with a fixed codec configuration
//! - Owns the external processes feeding each track
//!
//! ### [`packet_source`] - Opus packets
//! - Pulls packets out of the Ogg stream with one packet of lookahead
//! - Applies the shared [`volume::Volume`] by decode → gain → re-encode
//!
//! ### [`session`] / [`registry`] - Playback
//! - One [`session::PlaybackSession`] per guild: queue, voice connection, notices
//! - [`registry::SessionRegistry`] creates sessions lazily and evicts idle ones
//!
//! ### [`transport`] - Voice transport seam
//! - Traits the sessions drive; [`songbird_transport`] implements them
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo (2 channels)
//! - **Frame**: 20ms (960 samples per channel)
//! - **Encoding**: Opus, `audio` application

pub mod ogg;
pub mod packet_source;
pub mod queue;
pub mod registry;
pub mod session;
pub mod songbird_transport;
pub mod transmux;
pub mod transport;
pub mod volume;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;
pub const OPUS_CHANNELS: usize = 2;
pub const OPUS_FRAME_DURATION_MS: u32 = 20;
/// Samples per channel in one frame.
pub const OPUS_FRAME_SIZE: usize = (OPUS_SAMPLE_RATE / 1000 * OPUS_FRAME_DURATION_MS) as usize;
pub const OPUS_APPLICATION: &str = "audio";
