use std::fmt;

/// PCM layout negotiated between a decoder and an audio device.
///
/// Chosen once per stream and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Bits per sample.
    pub sample_size: u32,
    pub channel_count: u32,
    pub signed: bool,
    /// `false` for floating point samples.
    pub fixed_point: bool,
    pub little_endian: bool,
}

impl AudioFormat {
    /// 44.1 kHz, 16 bit, stereo, signed little-endian PCM.
    pub const DEFAULT: AudioFormat = AudioFormat {
        sample_rate: 44_100,
        sample_size: 16,
        channel_count: 2,
        signed: true,
        fixed_point: true,
        little_endian: true,
    };

    pub fn bytes_per_sample(&self) -> u32 {
        self.sample_size / 8
    }

    /// Bytes for one sample across all channels.
    pub fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_sample() * self.channel_count
    }

    /// Playback duration of `byte_count` bytes in milliseconds.
    ///
    /// `byte_count / (channels * bytes_per_sample * sample_rate / 1000)`, returning 0 for
    /// degenerate formats.
    pub fn duration_ms(&self, byte_count: usize) -> u32 {
        let bytes_per_second = u64::from(self.bytes_per_frame()) * u64::from(self.sample_rate);
        if bytes_per_second == 0 {
            return 0;
        }
        let ms = byte_count as u64 * 1000 / bytes_per_second;
        u32::try_from(ms).unwrap_or(u32::MAX)
    }

    /// Number of bytes covering `ms` milliseconds, rounded down to whole frames.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let frames = u64::from(self.sample_rate) * u64::from(ms) / 1000;
        (frames * u64::from(self.bytes_per_frame())) as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PCM[{} Hz, {} bit, {} ch, {}, {}, {}]",
            self.sample_rate,
            self.sample_size,
            self.channel_count,
            if self.signed { "signed" } else { "unsigned" },
            if self.fixed_point { "fixed" } else { "float" },
            if self.little_endian { "LE" } else { "BE" },
        )
    }
}

/// Sample layout reported by a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8 { planar: bool },
    S16 { planar: bool },
    S32 { planar: bool },
    Flt { planar: bool },
    Dbl { planar: bool },
    /// A decoder tag this crate does not know how to play.
    Unsupported(u32),
}

impl SampleFormat {
    /// Maps a libav style sample format ordinal.
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => SampleFormat::U8 { planar: false },
            1 => SampleFormat::S16 { planar: false },
            2 => SampleFormat::S32 { planar: false },
            3 => SampleFormat::Flt { planar: false },
            4 => SampleFormat::Dbl { planar: false },
            5 => SampleFormat::U8 { planar: true },
            6 => SampleFormat::S16 { planar: true },
            7 => SampleFormat::S32 { planar: true },
            8 => SampleFormat::Flt { planar: true },
            9 => SampleFormat::Dbl { planar: true },
            other => SampleFormat::Unsupported(other),
        }
    }

    /// The PCM format a device would need to play this layout, if any.
    pub fn audio_format(&self, sample_rate: u32, channel_count: u32) -> Option<AudioFormat> {
        let (sample_size, signed, fixed_point) = match self {
            SampleFormat::U8 { .. } => (8, false, true),
            SampleFormat::S16 { .. } => (16, true, true),
            SampleFormat::S32 { .. } => (32, true, true),
            SampleFormat::Flt { .. } => (32, true, false),
            SampleFormat::Dbl { .. } => (64, true, false),
            SampleFormat::Unsupported(_) => return None,
        };
        Some(AudioFormat {
            sample_rate,
            sample_size,
            channel_count,
            signed,
            fixed_point,
            little_endian: true,
        })
    }
}

/// Pixel layout of decoded video written into a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar 4:2:0, three planes.
    Yuv420p,
    /// Y plane followed by interleaved UV.
    Nv12,
    Rgb24,
    Bgr24,
    Argb,
    Rgba,
    Abgr,
    Bgra,
    Unsupported(u32),
}

impl PixelFormat {
    /// Maps a libav style pixel format ordinal.
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => PixelFormat::Yuv420p,
            2 => PixelFormat::Rgb24,
            3 => PixelFormat::Bgr24,
            25 => PixelFormat::Nv12,
            27 => PixelFormat::Argb,
            28 => PixelFormat::Rgba,
            29 => PixelFormat::Abgr,
            30 => PixelFormat::Bgra,
            other => PixelFormat::Unsupported(other),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, PixelFormat::Unsupported(_))
    }

    pub fn planes(&self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Nv12 => 2,
            PixelFormat::Unsupported(_) => 0,
            _ => 1,
        }
    }

    /// Bytes per pixel of a single plane, as uploaded into a packed texture.
    pub fn bytes_per_pixel_per_plane(&self) -> usize {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => 1,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Argb | PixelFormat::Rgba | PixelFormat::Abgr | PixelFormat::Bgra => 4,
            PixelFormat::Unsupported(_) => 0,
        }
    }

    /// Size of a single texture holding all planes of one frame.
    ///
    /// YUV420P stacks U over V to the right of Y, so the texture keeps the frame height.
    pub fn packed_texture_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        match self {
            PixelFormat::Yuv420p => Some((width + width.div_ceil(2), height)),
            PixelFormat::Nv12 => Some((width, height + height.div_ceil(2))),
            PixelFormat::Unsupported(_) => None,
            _ => Some((width, height)),
        }
    }

    /// Expected length of a tightly packed frame.
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        let chroma = w.div_ceil(2) * h.div_ceil(2);
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => w * h + 2 * chroma,
            PixelFormat::Unsupported(_) => 0,
            other => w * h * other.bytes_per_pixel_per_plane(),
        }
    }
}
