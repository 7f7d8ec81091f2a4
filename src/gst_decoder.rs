//! [`Decoder`] backed by a GStreamer `playbin`.
//!
//! Video is converted to NV12 and audio to interleaved S16LE; both are pulled
//! from appsinks without clock sync, so pacing stays with the player.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_audio as gst_audio;
use gstreamer_video as gst_video;
use url::Url;

use crate::audio::AudioFrame;
use crate::decoder::{
    DecodedUnit, Decoder, DecoderCapabilities, FrameTarget, StreamInfo, StreamSelector,
};
use crate::format::{AudioFormat, PixelFormat};
use crate::{Error, Result};

const PULL_TIMEOUT_MS: u64 = 16;
const PREROLL_TIMEOUT_S: u64 = 5;

struct Opened {
    pipeline: gst::Pipeline,
    video_sink: Option<gst_app::AppSink>,
    audio_sink: Option<gst_app::AppSink>,
    video_info: Option<gst_video::VideoInfo>,
    info: StreamInfo,
    /// Alternates reads so neither appsink backs up.
    audio_turn: bool,
}

impl Drop for Opened {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("failed to stop pipeline: {err}");
        }
    }
}

/// Decodes any URI GStreamer can play.
#[derive(Default)]
pub struct GstDecoder {
    opened: Option<Opened>,
}

impl GstDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stream_open(what: impl std::fmt::Display) -> Error {
    Error::StreamOpen(what.to_string())
}

fn clock_ms(time: Option<gst::ClockTime>) -> i64 {
    time.map_or(0, |t| t.mseconds() as i64)
}

impl Decoder for GstDecoder {
    fn capabilities(&self) -> DecoderCapabilities {
        let available = gst::init().is_ok();
        DecoderCapabilities {
            name: "gstreamer".into(),
            version: available.then(|| gst::version_string().to_string()),
            available,
            seekable: true,
        }
    }

    fn open(
        &mut self,
        source: &Url,
        video: StreamSelector,
        audio: StreamSelector,
        preferred_audio: &AudioFormat,
    ) -> Result<StreamInfo> {
        gst::init()?;
        self.close();

        let pipeline = gst::ElementFactory::make("playbin")
            .property("uri", source.as_str())
            .build()?
            .downcast::<gst::Pipeline>()
            .map_err(|_| stream_open("playbin is not a pipeline"))?;

        macro_rules! cleanup {
            ($expr:expr) => {
                $expr.map_err(|e| {
                    let _ = pipeline.set_state(gst::State::Null);
                    e
                })
            };
        }

        let video_sink = (!video.is_none()).then(|| {
            gst_app::AppSink::builder()
                .caps(
                    &gst_video::VideoCapsBuilder::new()
                        .format(gst_video::VideoFormat::Nv12)
                        .build(),
                )
                .max_buffers(4)
                .sync(false)
                .build()
        });
        let audio_sink = (!audio.is_none()).then(|| {
            gst_app::AppSink::builder()
                .caps(
                    &gst_audio::AudioCapsBuilder::new_interleaved()
                        .format(gst_audio::AudioFormat::S16le)
                        .rate(preferred_audio.sample_rate as i32)
                        .channels(preferred_audio.channel_count as i32)
                        .build(),
                )
                .max_buffers(16)
                .sync(false)
                .build()
        });
        match &video_sink {
            Some(sink) => pipeline.set_property("video-sink", sink),
            None => pipeline.set_property("video-sink", cleanup!(gst::ElementFactory::make("fakesink").build())?),
        }
        match &audio_sink {
            Some(sink) => pipeline.set_property("audio-sink", sink),
            None => pipeline.set_property("audio-sink", cleanup!(gst::ElementFactory::make("fakesink").build())?),
        }
        if let Some(index) = video.stream_index() {
            pipeline.set_property("current-video", index as i32);
        }
        if let Some(index) = audio.stream_index() {
            pipeline.set_property("current-audio", index as i32);
        }

        cleanup!(pipeline.set_state(gst::State::Paused))?;
        cleanup!(pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_S)).0)?;

        let mut info = StreamInfo {
            duration_ms: clock_ms(pipeline.query_duration::<gst::ClockTime>()),
            ..StreamInfo::default()
        };

        let mut video_info = None;
        if let Some(sink) = &video_sink {
            let caps = sink.sink_pads().first().and_then(|p| p.current_caps());
            if let Some(caps) = caps {
                let vinfo = cleanup!(gst_video::VideoInfo::from_caps(&caps))?;
                info.width = vinfo.width();
                info.height = vinfo.height();
                let fps = vinfo.fps();
                if fps.denom() != 0 {
                    info.fps = fps.numer() as f32 / fps.denom() as f32;
                }
                info.vid = StreamSelector::from_raw(pipeline.property::<i32>("current-video"));
                info.pixel_format = Some(PixelFormat::Nv12);
                video_info = Some(vinfo);
            }
        }
        if let Some(sink) = &audio_sink {
            let caps = sink.sink_pads().first().and_then(|p| p.current_caps());
            if let Some(caps) = caps {
                let ainfo = cleanup!(gst_audio::AudioInfo::from_caps(&caps))?;
                info.aid = StreamSelector::from_raw(pipeline.property::<i32>("current-audio"));
                info.audio_format = Some(AudioFormat {
                    sample_rate: ainfo.rate(),
                    sample_size: 16,
                    channel_count: ainfo.channels(),
                    signed: true,
                    fixed_point: true,
                    little_endian: true,
                });
            }
        }
        if video_info.is_none() && info.audio_format.is_none() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(stream_open(format!("{source}: no playable stream")));
        }
        if video_info.is_none() {
            info.vid = StreamSelector::NONE;
        }
        if info.audio_format.is_none() {
            info.aid = StreamSelector::NONE;
        }
        read_tags(&pipeline, &mut info);

        cleanup!(pipeline.set_state(gst::State::Playing))?;
        log::info!(
            "gstreamer opened {source}: {}x{} @ {} fps, {} ms",
            info.width,
            info.height,
            info.fps,
            info.duration_ms
        );

        self.opened = Some(Opened {
            pipeline,
            video_sink: video_sink.filter(|_| video_info.is_some()),
            audio_sink: audio_sink.filter(|_| info.audio_format.is_some()),
            video_info,
            info: info.clone(),
            audio_turn: true,
        });
        Ok(info)
    }

    fn read_next_unit(&mut self, target: &mut FrameTarget<'_>) -> Result<DecodedUnit> {
        let opened = self
            .opened
            .as_mut()
            .ok_or_else(|| Error::Decode("stream is not open".into()))?;

        let audio_turn = opened.audio_turn || opened.video_sink.is_none();
        opened.audio_turn = !opened.audio_turn;
        if audio_turn {
            if let Some(sink) = &opened.audio_sink {
                if let Some(sample) = sink.try_pull_sample(gst::ClockTime::ZERO) {
                    return audio_unit(&sample);
                }
                if opened.video_sink.is_none() {
                    return Ok(DecodedUnit::None);
                }
            }
        }

        let (Some(sink), Some(vinfo)) = (&opened.video_sink, &opened.video_info) else {
            return Ok(DecodedUnit::None);
        };
        let Some(sample) = sink.try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        else {
            if sink.is_eos() {
                log::trace!("video sink reached end of stream");
            }
            return Ok(DecodedUnit::None);
        };
        let buffer = sample
            .buffer()
            .ok_or_else(|| Error::Decode("video sample without buffer".into()))?;
        let pts = clock_ms(buffer.pts());

        let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, vinfo)?;
        let (width, height) = (frame.width(), frame.height());
        let data = pack_nv12(&frame)?;
        target.write(PixelFormat::Nv12, width, height, &data)?;
        Ok(DecodedUnit::Video { pts })
    }

    fn seek(&mut self, ms: i64) -> Result<i64> {
        let opened = self
            .opened
            .as_mut()
            .ok_or_else(|| Error::Decode("stream is not open".into()))?;
        opened
            .pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::from_mseconds(ms.max(0) as u64),
            )
            .map_err(|e| Error::Decode(format!("seek to {ms} ms failed: {e}")))?;
        let _ = opened
            .pipeline
            .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_S));
        Ok(opened
            .pipeline
            .query_position::<gst::ClockTime>()
            .map_or(ms, |p| p.mseconds() as i64))
    }

    fn close(&mut self) {
        if self.opened.take().is_some() {
            log::debug!("gstreamer pipeline closed");
        }
    }
}

fn audio_unit(sample: &gst::Sample) -> Result<DecodedUnit> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| Error::Decode("audio sample without buffer".into()))?;
    let map = buffer
        .map_readable()
        .map_err(|_| Error::Decode("audio buffer is not readable".into()))?;
    Ok(DecodedUnit::Audio(AudioFrame::new(
        map.as_slice().to_vec(),
        clock_ms(buffer.pts()),
    )))
}

/// Copies both NV12 planes without row padding.
fn pack_nv12(frame: &gst_video::VideoFrameRef<&gst::BufferRef>) -> Result<Vec<u8>> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let chroma_row = width.div_ceil(2) * 2;
    let chroma_rows = height.div_ceil(2);
    let mut data = Vec::with_capacity(width * height + chroma_row * chroma_rows);

    for (plane, row_len, rows) in [(0, width, height), (1, chroma_row, chroma_rows)] {
        let stride = frame.plane_stride()[plane as usize] as usize;
        let bytes = frame.plane_data(plane)?;
        for row in 0..rows {
            let start = row * stride;
            let end = start + row_len;
            if end > bytes.len() {
                return Err(Error::Decode(format!("plane {plane} is shorter than expected")));
            }
            data.extend_from_slice(&bytes[start..end]);
        }
    }
    Ok(data)
}

fn read_tags(pipeline: &gst::Pipeline, info: &mut StreamInfo) {
    let video_tags =
        pipeline.emit_by_name::<Option<gst::TagList>>("get-video-tags", &[&info.vid.raw().max(0)]);
    if let Some(tags) = video_tags {
        info.video_codec = tags.get::<gst::tags::VideoCodec>().map(|v| v.get().to_string());
        info.video_bitrate = tags.get::<gst::tags::Bitrate>().map_or(0, |v| v.get());
    }
    let audio_tags =
        pipeline.emit_by_name::<Option<gst::TagList>>("get-audio-tags", &[&info.aid.raw().max(0)]);
    if let Some(tags) = audio_tags {
        info.audio_codec = tags.get::<gst::tags::AudioCodec>().map(|v| v.get().to_string());
        info.audio_bitrate = tags.get::<gst::tags::Bitrate>().map_or(0, |v| v.get());
    }
    info.stream_bitrate = u64::from(info.video_bitrate) + u64::from(info.audio_bitrate);
}
