//! # Media Texture Player
//!
//! A streaming media player core. A [`Decoder`] reads interleaved audio and
//! video; video is written into a small ring of reusable textures while audio
//! flows into an [`AudioSink`] backed by a fixed pool of output buffers.
//!
//! ## Features
//!
//! - Explicit `Uninitialized -> Paused <-> Playing` lifecycle
//! - Decode on the render thread or ahead on a worker thread
//! - Pooled audio output with bounded waits and buffer ring invariants
//! - Audio failures fall back to a silent sink, video keeps playing
//! - GStreamer decoding (`gstreamer` feature) and cpal output (`cpal` feature)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use media_texture_player::{
//!     CpuTextureBackend, DefaultAudioSinkFactory, MediaPlayer, PlayerConfig, StreamSelector,
//!     TestPatternDecoder, Url,
//! };
//!
//! let player = MediaPlayer::new(
//!     Box::new(TestPatternDecoder::new(64, 36)),
//!     Arc::new(DefaultAudioSinkFactory::default()),
//!     PlayerConfig::default(),
//! );
//! let source = Url::parse("pattern://bars").unwrap();
//! player
//!     .init_stream(
//!         Box::new(CpuTextureBackend::new()),
//!         2,
//!         &source,
//!         StreamSelector::AUTO,
//!         StreamSelector::AUTO,
//!     )
//!     .unwrap();
//! player.play().unwrap();
//! let frame = player.get_next_frame(true).unwrap();
//! assert!(frame.pts > 0);
//! player.destroy();
//! ```

mod config;
mod decoder;
mod error;
mod events;
mod format;
mod frame_pipeline;
#[cfg(feature = "gstreamer")]
mod gst_decoder;
mod pattern;
mod player;
mod ring_buffer;
mod sync;
mod texture;

pub mod audio;

pub use audio::{AudioFrame, AudioSink, AudioSinkFactory, DefaultAudioSinkFactory};
pub use config::{AudioDeviceConfig, DecodeMode, PlayerConfig};
pub use decoder::{
    DecodedUnit, Decoder, DecoderCapabilities, FrameTarget, StreamInfo, StreamSelector,
};
pub use error::{Error, Result};
pub use events::{EventMask, ListenerList, MediaEventListener};
pub use format::{AudioFormat, PixelFormat, SampleFormat};
pub use frame_pipeline::{FramePipeline, VideoFrame};
#[cfg(feature = "gstreamer")]
pub use gst_decoder::GstDecoder;
pub use pattern::TestPatternDecoder;
pub use player::{MediaPlayer, PlaybackState};
pub use ring_buffer::RingBuffer;
pub use sync::{DropLate, PresentAll, SyncDecision, SyncPolicy, Synchronizer};
pub use texture::{CpuTextureBackend, Filter, TextureBackend, TextureId, TextureParams, Wrap};

// Re-export commonly used types
pub use url::Url;
#[cfg(feature = "gstreamer")]
pub use gstreamer as gst;
