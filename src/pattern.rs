//! A synthetic source: colour bars and a sine tone.
//!
//! Useful for demos and tests where no media library is around. Frame `i`
//! carries PTS `i * 1000 / fps`, and `audio_units_per_frame` audio packets
//! precede each picture, the way a muxed stream interleaves them.

use std::f64::consts::TAU;

use url::Url;

use crate::audio::AudioFrame;
use crate::decoder::{
    DecodedUnit, Decoder, DecoderCapabilities, FrameTarget, StreamInfo, StreamSelector,
};
use crate::format::{AudioFormat, PixelFormat};
use crate::{Error, Result};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

const TONE_HZ: f64 = 440.0;

#[derive(Debug, Clone, Copy)]
struct SizeChange {
    frame: u64,
    width: u32,
    height: u32,
}

/// [`Decoder`] generating an endless-looking but finite test stream.
#[derive(Debug, Clone)]
pub struct TestPatternDecoder {
    width: u32,
    height: u32,
    fps: f32,
    duration_ms: i64,
    audio: Option<AudioFormat>,
    audio_units_per_frame: usize,
    keyframe_interval_ms: i64,
    size_change: Option<SizeChange>,

    info: Option<StreamInfo>,
    video: bool,
    frame_index: u64,
    pending_audio: usize,
    tone_phase: f64,
    attribute_changes: Option<StreamInfo>,
}

impl TestPatternDecoder {
    /// A 10 second, 25 fps stream with 16 bit stereo audio.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: 25.0,
            duration_ms: 10_000,
            audio: Some(AudioFormat::DEFAULT),
            audio_units_per_frame: 2,
            keyframe_interval_ms: 1000,
            size_change: None,
            info: None,
            video: true,
            frame_index: 0,
            pending_audio: 0,
            tone_phase: 0.0,
            attribute_changes: None,
        }
    }

    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = fps.max(1.0);
        self
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms.max(0);
        self
    }

    /// Audio track format, `None` for a silent stream.
    pub fn with_audio(mut self, audio: Option<AudioFormat>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_audio_units_per_frame(mut self, units: usize) -> Self {
        self.audio_units_per_frame = units;
        self
    }

    /// Seeks land on multiples of `interval_ms`.
    pub fn with_keyframe_interval(mut self, interval_ms: i64) -> Self {
        self.keyframe_interval_ms = interval_ms.max(1);
        self
    }

    /// Switches the picture size when frame `frame` is decoded.
    pub fn with_size_change(mut self, frame: u64, width: u32, height: u32) -> Self {
        self.size_change = Some(SizeChange {
            frame,
            width,
            height,
        });
        self
    }

    fn frame_ms(&self) -> i64 {
        (1000.0 / f64::from(self.fps)).round() as i64
    }

    fn frame_pts(&self, index: u64) -> i64 {
        index as i64 * self.frame_ms()
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.info.as_ref().and_then(|info| info.audio_format)
    }

    fn stream_info(&self, vid: StreamSelector, aid: StreamSelector) -> StreamInfo {
        let video = !vid.is_none();
        let audio = self.audio.filter(|_| !aid.is_none());
        let video_frames = (self.duration_ms / self.frame_ms().max(1)) as u32;
        let video_bitrate = if video {
            (f64::from(self.width) * f64::from(self.height) * 32.0 * f64::from(self.fps)) as u32
        } else {
            0
        };
        let audio_bitrate = audio.map_or(0, |f| f.sample_rate * f.sample_size * f.channel_count);

        StreamInfo {
            vid: if video { StreamSelector::index(0) } else { StreamSelector::NONE },
            aid: if audio.is_some() { StreamSelector::index(1) } else { StreamSelector::NONE },
            width: if video { self.width } else { 0 },
            height: if video { self.height } else { 0 },
            fps: if video { self.fps } else { 0.0 },
            stream_bitrate: u64::from(video_bitrate) + u64::from(audio_bitrate),
            video_bitrate,
            audio_bitrate,
            video_codec: video.then(|| "rawvideo".to_string()),
            audio_codec: audio.map(|f| format!("pcm_s{}le", f.sample_size)),
            video_frames: if video { video_frames } else { 0 },
            audio_frames: if audio.is_some() {
                video_frames * self.audio_units_per_frame as u32
            } else {
                0
            },
            duration_ms: self.duration_ms,
            pixel_format: video.then_some(PixelFormat::Rgba),
            audio_format: audio,
        }
    }

    fn draw(&self, width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        // bars scroll one column per frame so consecutive frames differ
        let shift = self.frame_index as usize;
        for _ in 0..height {
            for x in 0..width as usize {
                let bar = ((x + shift) * BARS.len() / width.max(1) as usize) % BARS.len();
                data.extend_from_slice(&BARS[bar]);
                data.push(255);
            }
        }
        data
    }

    fn tone(&mut self, format: &AudioFormat, pts: i64) -> AudioFrame {
        let units = self.audio_units_per_frame.max(1) as u32;
        let ms = (self.frame_ms() as u32 / units).max(1);
        let len = format.bytes_for_ms(ms);
        if format.sample_size != 16 || !format.signed {
            let silence = if format.signed { 0 } else { 0x80 };
            return AudioFrame::new(vec![silence; len], pts);
        }

        let step = TAU * TONE_HZ / f64::from(format.sample_rate.max(1));
        let channels = format.channel_count.max(1) as usize;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / (2 * channels) {
            let sample = (self.tone_phase.sin() * f64::from(i16::MAX) * 0.25) as i16;
            let bytes = if format.little_endian {
                sample.to_le_bytes()
            } else {
                sample.to_be_bytes()
            };
            for _ in 0..channels {
                data.extend_from_slice(&bytes);
            }
            self.tone_phase = (self.tone_phase + step) % TAU;
        }
        AudioFrame::new(data, pts)
    }

    fn apply_size_change(&mut self) {
        let Some(change) = self.size_change else {
            return;
        };
        if change.frame != self.frame_index || !self.video {
            return;
        }
        self.width = change.width;
        self.height = change.height;
        if let Some(info) = &mut self.info {
            info.width = change.width;
            info.height = change.height;
            self.attribute_changes = Some(info.clone());
        }
    }
}

impl Decoder for TestPatternDecoder {
    fn capabilities(&self) -> DecoderCapabilities {
        DecoderCapabilities {
            name: "test-pattern".into(),
            version: Some(env!("CARGO_PKG_VERSION").into()),
            available: true,
            seekable: true,
        }
    }

    fn open(
        &mut self,
        source: &Url,
        video: StreamSelector,
        audio: StreamSelector,
        _preferred_audio: &AudioFormat,
    ) -> Result<StreamInfo> {
        if video.is_none() && (audio.is_none() || self.audio.is_none()) {
            return Err(Error::StreamOpen(format!("{source}: no stream selected")));
        }
        let info = self.stream_info(video, audio);
        self.video = !video.is_none();
        self.frame_index = 0;
        self.pending_audio = 0;
        self.tone_phase = 0.0;
        self.attribute_changes = None;
        self.info = Some(info.clone());
        log::debug!("test pattern opened: {}x{} @ {} fps", info.width, info.height, info.fps);
        Ok(info)
    }

    fn read_next_unit(&mut self, target: &mut FrameTarget<'_>) -> Result<DecodedUnit> {
        if self.info.is_none() {
            return Err(Error::Decode("test pattern is not open".into()));
        }
        let pts = self.frame_pts(self.frame_index);
        if pts >= self.duration_ms {
            return Ok(DecodedUnit::None);
        }

        let audio = self.audio_format();
        if let Some(format) = audio {
            if self.pending_audio > 0 || !self.video {
                self.pending_audio = self.pending_audio.saturating_sub(1);
                let frame = self.tone(&format, pts);
                if !self.video {
                    self.frame_index += 1;
                }
                return Ok(DecodedUnit::Audio(frame));
            }
        }

        self.apply_size_change();
        let data = self.draw(self.width, self.height);
        target.write(PixelFormat::Rgba, self.width, self.height, &data)?;
        self.frame_index += 1;
        if audio.is_some() {
            self.pending_audio = self.audio_units_per_frame;
        }
        Ok(DecodedUnit::Video { pts })
    }

    fn seek(&mut self, ms: i64) -> Result<i64> {
        if self.info.is_none() {
            return Err(Error::Decode("test pattern is not open".into()));
        }
        let target = ms.clamp(0, self.duration_ms);
        let aligned = target - target % self.keyframe_interval_ms;
        self.frame_index = (aligned / self.frame_ms().max(1)) as u64;
        self.pending_audio = 0;
        Ok(self.frame_pts(self.frame_index))
    }

    fn close(&mut self) {
        self.info = None;
        self.pending_audio = 0;
    }

    fn take_attribute_changes(&mut self) -> Option<StreamInfo> {
        self.attribute_changes.take()
    }
}
