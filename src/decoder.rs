//! The decoder seam.
//!
//! Decoding itself lives behind [`Decoder`]: the player only asks it to open a
//! source, read the next unit (writing video straight into the target texture)
//! and seek. Native libraries plug in through adapters implementing the trait.

use std::fmt;

use url::Url;

use crate::audio::AudioFrame;
use crate::events::EventMask;
use crate::format::{AudioFormat, PixelFormat};
use crate::texture::{TextureBackend, TextureId};
use crate::Result;

/// Identifies an elementary stream, or one of the two sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamSelector(i32);

impl StreamSelector {
    /// Mute when requested, not available when reported.
    pub const NONE: StreamSelector = StreamSelector(-2);
    /// Let the decoder choose when requested, unspecified when reported.
    pub const AUTO: StreamSelector = StreamSelector(-1);

    pub fn index(index: u16) -> Self {
        StreamSelector(i32::from(index))
    }

    /// Maps a raw id, treating unknown negative values as [`StreamSelector::AUTO`].
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            -2 => Self::NONE,
            r if r < 0 => Self::AUTO,
            r => StreamSelector(r),
        }
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn is_auto(&self) -> bool {
        *self == Self::AUTO
    }

    /// The concrete stream index, if this selects one.
    pub fn stream_index(&self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl Default for StreamSelector {
    fn default() -> Self {
        Self::AUTO
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => f.write_str("none"),
            Self::AUTO => f.write_str("auto"),
            StreamSelector(i) => write!(f, "#{i}"),
        }
    }
}

/// Stream attributes reported by a decoder. Everything except the
/// dimensions and duration is best effort.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamInfo {
    pub vid: StreamSelector,
    pub aid: StreamSelector,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub stream_bitrate: u64,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_frames: u32,
    pub audio_frames: u32,
    pub duration_ms: i64,
    pub pixel_format: Option<PixelFormat>,
    /// The decoder's output audio format, `None` without an audio stream.
    pub audio_format: Option<AudioFormat>,
}

impl StreamInfo {
    /// Attributes that differ between `self` and `next`.
    pub fn changes(&self, next: &StreamInfo) -> EventMask {
        let mut mask = EventMask::empty();
        if self.vid != next.vid {
            mask |= EventMask::VID;
        }
        if self.aid != next.aid {
            mask |= EventMask::AID;
        }
        if self.width != next.width || self.height != next.height {
            mask |= EventMask::SIZE;
        }
        if self.fps != next.fps {
            mask |= EventMask::FPS;
        }
        if self.stream_bitrate != next.stream_bitrate
            || self.video_bitrate != next.video_bitrate
            || self.audio_bitrate != next.audio_bitrate
        {
            mask |= EventMask::BPS;
        }
        if self.duration_ms != next.duration_ms {
            mask |= EventMask::LENGTH;
        }
        if self.video_codec != next.video_codec || self.audio_codec != next.audio_codec {
            mask |= EventMask::CODEC;
        }
        mask
    }
}

/// What a decoder can do, reported at construction instead of probed globally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCapabilities {
    pub name: String,
    pub version: Option<String>,
    /// `false` when the backing library could not be loaded.
    pub available: bool,
    pub seekable: bool,
}

/// One result of [`Decoder::read_next_unit`].
#[derive(Debug)]
pub enum DecodedUnit {
    /// A video frame was written into the target texture.
    Video { pts: i64 },
    /// An audio packet; ownership of the bytes moves to the caller.
    Audio(AudioFrame),
    /// Nothing usable was read (empty packet, end of stream or a timeout).
    None,
}

/// The texture slot a decode cycle writes into.
pub struct FrameTarget<'a> {
    backend: &'a mut dyn TextureBackend,
    texture: TextureId,
}

impl<'a> FrameTarget<'a> {
    pub fn new(backend: &'a mut dyn TextureBackend, texture: TextureId) -> Self {
        Self {
            backend,
            texture,
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Uploads one decoded picture into the slot.
    pub fn write(&mut self, format: PixelFormat, width: u32, height: u32, data: &[u8]) -> Result<()> {
        self.backend.upload(self.texture, format, width, height, data)
    }
}

/// A demuxer/decoder pair producing PTS-stamped units.
pub trait Decoder: Send {
    fn capabilities(&self) -> DecoderCapabilities;

    /// Opens `source` with the requested streams. `preferred_audio` is the format of the
    /// audio device in use; the decoder may convert to it or report its own.
    fn open(
        &mut self,
        source: &Url,
        video: StreamSelector,
        audio: StreamSelector,
        preferred_audio: &AudioFormat,
    ) -> Result<StreamInfo>;

    /// Reads and decodes one packet. Video is written into `target`.
    fn read_next_unit(&mut self, target: &mut FrameTarget<'_>) -> Result<DecodedUnit>;

    /// Seeks near `ms` and returns the position actually reached.
    fn seek(&mut self, ms: i64) -> Result<i64>;

    /// Releases decoder resources. Safe to call more than once.
    fn close(&mut self);

    /// Attribute changes noticed while decoding, e.g. a mid-stream size change.
    fn take_attribute_changes(&mut self) -> Option<StreamInfo> {
        None
    }
}
