use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use url::Url;

use crate::audio::{AudioSink, AudioSinkFactory};
use crate::config::PlayerConfig;
use crate::decoder::{Decoder, DecoderCapabilities, StreamInfo, StreamSelector};
use crate::events::{EventMask, ListenerList, MediaEventListener};
use crate::format::AudioFormat;
use crate::frame_pipeline::{DecodeContext, FramePipeline, VideoFrame};
use crate::sync::{PresentAll, SyncPolicy, Synchronizer};
use crate::texture::{TextureBackend, TextureId};
use crate::{Error, Result};

/// Lifecycle state of a [`MediaPlayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    #[default]
    Uninitialized,
    Paused,
    Playing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) struct Internal {
    pub(crate) id: u64,
    pub(crate) state: PlaybackState,
    pub(crate) config: PlayerConfig,
    pub(crate) context: Arc<Mutex<DecodeContext>>,
    pub(crate) audio_sinks: Arc<dyn AudioSinkFactory>,
    pub(crate) policy: Arc<dyn SyncPolicy>,
    pub(crate) sync: Arc<Synchronizer>,
    pub(crate) pipeline: Option<FramePipeline>,
    pub(crate) info: StreamInfo,
    pub(crate) source: Option<Url>,
    pub(crate) audio_format: Option<AudioFormat>,
    pub(crate) play_speed: f32,
    pub(crate) listeners: Arc<ListenerList>,
}

impl Internal {
    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn audio_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.pipeline.as_ref().map(FramePipeline::audio_sink)
    }

    /// Runs an audio call; failures never stop video.
    fn audio_call(&self, what: &str, f: impl FnOnce(&dyn AudioSink) -> Result<()>) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        let sink = pipeline.audio_sink();
        if let Err(err) = f(sink.as_ref()) {
            if err.is_fatal() {
                pipeline.audio_error(err);
            } else {
                log::warn!("player {}: audio {what} failed: {err}", self.id);
            }
        }
    }

    /// Releases everything bound by `init_stream`. Errors are logged.
    fn teardown(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.shutdown();
            pipeline.audio_sink().destroy();
        }
        let mut ctx = self.context.lock();
        ctx.textures = None;
        ctx.decoder.close();
    }
}

/// A media player that decodes into a ring of textures and plays the audio
/// track through an [`AudioSink`].
///
/// Cloning is cheap; all clones drive the same player. The stream is torn
/// down when the last clone is dropped.
#[derive(Clone)]
pub struct MediaPlayer(pub(crate) Arc<RwLock<Internal>>);

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        // Only cleanup if this is the last reference
        if Arc::strong_count(&self.0) == 1 {
            if let Some(mut inner) = self.0.try_write() {
                if inner.state != PlaybackState::Uninitialized || inner.pipeline.is_some() {
                    inner.teardown();
                    inner.state = PlaybackState::Uninitialized;
                }
            }
        }
    }
}

impl MediaPlayer {
    /// Creates an uninitialized player around `decoder`.
    ///
    /// `audio_sinks` supplies the output bound at [`MediaPlayer::init_stream`].
    pub fn new(
        decoder: Box<dyn Decoder>,
        audio_sinks: Arc<dyn AudioSinkFactory>,
        config: PlayerConfig,
    ) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

        MediaPlayer(Arc::new(RwLock::new(Internal {
            id,
            state: PlaybackState::Uninitialized,
            config,
            context: Arc::new(Mutex::new(DecodeContext {
                decoder,
                textures: None,
            })),
            audio_sinks,
            policy: Arc::new(PresentAll),
            sync: Arc::new(Synchronizer::new()),
            pipeline: None,
            info: StreamInfo::default(),
            source: None,
            audio_format: None,
            play_speed: 1.0,
            listeners: Arc::new(ListenerList::new()),
        })))
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, Internal> {
        self.0.read()
    }

    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Internal> {
        self.0.write()
    }

    pub fn id(&self) -> u64 {
        self.read().id
    }

    pub fn state(&self) -> PlaybackState {
        self.read().state
    }

    pub fn decoder_capabilities(&self) -> DecoderCapabilities {
        self.read().context.lock().decoder.capabilities()
    }

    /// Policy used to drop late frames, applied from the next `init_stream`.
    pub fn set_sync_policy(&self, policy: Arc<dyn SyncPolicy>) {
        self.write().policy = policy;
    }

    /// Opens `source`, negotiates audio and allocates the texture ring.
    ///
    /// Only legal while uninitialized. On success the player is paused. When
    /// the audio output cannot play the stream's format, a null sink takes its
    /// place and video plays regardless.
    pub fn init_stream(
        &self,
        textures: Box<dyn TextureBackend>,
        texture_count: usize,
        source: &Url,
        vid: StreamSelector,
        aid: StreamSelector,
    ) -> Result<()> {
        let mut inner = self.write();
        if inner.state != PlaybackState::Uninitialized {
            return Err(inner.invalid("init_stream"));
        }
        let id = inner.id;
        log::info!("player {id}: opening {source} (video {vid}, audio {aid})");

        let factory = Arc::clone(&inner.audio_sinks);
        let mut sink = if aid.is_none() {
            factory.create_null()
        } else {
            factory.create_default()
        };

        let info = {
            let mut ctx = inner.context.lock();
            let capabilities = ctx.decoder.capabilities();
            if !capabilities.available {
                sink.destroy();
                return Err(Error::StreamOpen(format!(
                    "decoder {} is not available",
                    capabilities.name
                )));
            }
            match ctx.decoder.open(source, vid, aid, &sink.preferred_format()) {
                Ok(info) => info,
                Err(err) => {
                    ctx.decoder.close();
                    sink.destroy();
                    return Err(match err {
                        Error::StreamOpen(_) => err,
                        other => Error::StreamOpen(format!("{source}: {other}")),
                    });
                }
            }
        };

        let texture_count = inner.config.texture_count(texture_count);
        let audio_frames = inner.config.audio_frame_count(texture_count);
        let audio_format = match info.audio_format.filter(|_| !aid.is_none()) {
            Some(requested) => match sink.init_sink(&requested, audio_frames) {
                Ok(chosen) => Some(chosen),
                Err(err) => {
                    log::warn!(
                        "player {id}: {} rejected {requested}, audio is muted: {err}",
                        sink.name()
                    );
                    sink.destroy();
                    sink = factory.create_null();
                    sink.init_sink(&requested, audio_frames).ok()
                }
            },
            None => {
                if !sink.is_null() {
                    sink.destroy();
                    sink = factory.create_null();
                }
                None
            }
        };

        let allocated = allocate_textures(textures, texture_count, &info, &inner.config);
        let (backend, ids) = match allocated {
            Ok(allocated) => allocated,
            Err(err) => {
                sink.destroy();
                inner.context.lock().decoder.close();
                return Err(err);
            }
        };
        inner.context.lock().textures = Some(backend);

        let pipeline = FramePipeline::new(
            Arc::clone(&inner.context),
            ids.clone(),
            Arc::clone(&sink),
            Arc::clone(&inner.sync),
            Arc::clone(&inner.policy),
            &inner.config,
        );
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(err) => {
                sink.destroy();
                let mut ctx = inner.context.lock();
                if let Some(mut backend) = ctx.textures.take() {
                    for id in ids {
                        let _ = backend.delete_texture(id);
                    }
                }
                ctx.decoder.close();
                return Err(err);
            }
        };

        inner.sync.reset(0);
        let mask = StreamInfo::default().changes(&info);
        log::info!(
            "player {id}: {}x{} @ {} fps, {} ms, {} textures, audio {}",
            info.width,
            info.height,
            info.fps,
            info.duration_ms,
            texture_count,
            audio_format.map_or_else(|| "none".to_string(), |f| f.to_string()),
        );
        inner.info = info;
        inner.source = Some(source.clone());
        inner.audio_format = audio_format;
        inner.play_speed = 1.0;
        inner.pipeline = Some(pipeline);
        inner.state = PlaybackState::Paused;

        let listeners = Arc::clone(&inner.listeners);
        drop(inner);
        listeners.notify_attributes(id, mask);
        Ok(())
    }

    /// Starts playback. Calling it while playing does nothing.
    pub fn play(&self) -> Result<PlaybackState> {
        let mut inner = self.write();
        match inner.state {
            PlaybackState::Uninitialized => Err(inner.invalid("play")),
            PlaybackState::Playing => Ok(PlaybackState::Playing),
            PlaybackState::Paused => {
                inner.audio_call("play", |sink| sink.play());
                if let Some(pipeline) = &inner.pipeline {
                    pipeline.set_active(true);
                }
                inner.state = PlaybackState::Playing;
                log::debug!("player {}: playing", inner.id);
                Ok(PlaybackState::Playing)
            }
        }
    }

    /// Pauses playback. Calling it while paused does nothing.
    pub fn pause(&self) -> Result<PlaybackState> {
        let mut inner = self.write();
        match inner.state {
            PlaybackState::Uninitialized => Err(inner.invalid("pause")),
            PlaybackState::Paused => Ok(PlaybackState::Paused),
            PlaybackState::Playing => {
                if let Some(pipeline) = &inner.pipeline {
                    pipeline.set_active(false);
                }
                inner.audio_call("pause", |sink| sink.pause());
                inner.state = PlaybackState::Paused;
                log::debug!("player {}: paused", inner.id);
                Ok(PlaybackState::Paused)
            }
        }
    }

    /// Seeks to `ms`, clamped to the stream, and returns the position the
    /// decoder actually reached. Outside playback this only reports the
    /// current position.
    pub fn seek(&self, ms: i64) -> Result<i64> {
        let mut guard = self.write();
        let inner = &mut *guard;
        if inner.state == PlaybackState::Uninitialized {
            return Ok(inner.sync.video_pts());
        }
        let duration = inner.info.duration_ms;
        let target = if duration > 0 { ms.clamp(0, duration) } else { ms.max(0) };
        let playing = inner.state == PlaybackState::Playing;
        let position = match inner.pipeline.as_mut() {
            Some(pipeline) => pipeline.seek(target)?,
            None => return Ok(inner.sync.video_pts()),
        };
        if playing {
            inner.audio_call("play", |sink| sink.play());
        }
        log::debug!("player {}: seek {ms} -> {position}", inner.id);
        Ok(position)
    }

    /// Releases the stream, the audio output and the textures. Always ends
    /// uninitialized; calling it again does nothing.
    pub fn destroy(&self) -> PlaybackState {
        let mut inner = self.write();
        if inner.state != PlaybackState::Uninitialized || inner.pipeline.is_some() {
            inner.teardown();
            log::info!("player {}: destroyed", inner.id);
        }
        inner.state = PlaybackState::Uninitialized;
        inner.info = StreamInfo::default();
        inner.audio_format = None;
        inner.source = None;
        inner.play_speed = 1.0;
        PlaybackState::Uninitialized
    }

    /// The frame to show now.
    ///
    /// While playing, runs one decode cycle (or, with a decode thread, takes
    /// the next finished frame) and returns it. If no new frame is ready, or
    /// the player is not playing, the last presented frame is returned.
    pub fn get_next_frame(&self, blocking: bool) -> Option<VideoFrame> {
        let mut guard = self.write();
        let inner = &mut *guard;
        let id = inner.id;
        let frame_wait = inner.config.frame_wait;
        let playing = inner.state == PlaybackState::Playing;
        let pipeline = inner.pipeline.as_mut()?;
        if !playing {
            return pipeline.last_frame();
        }
        let fresh = pipeline.next_frame(blocking, frame_wait);
        let last = pipeline.last_frame();
        let changes = pipeline.take_attribute_changes();

        let mut mask = EventMask::empty();
        if let Some(next) = changes {
            mask = inner.info.changes(&next);
            inner.info = next;
        }
        let listeners = Arc::clone(&inner.listeners);
        drop(guard);

        listeners.notify_attributes(id, mask);
        if let Some(frame) = &fresh {
            listeners.notify_new_frame(id, frame);
        }
        last
    }

    /// Changes the playback rate.
    ///
    /// Rates within 0.01 of 1.0 become exactly 1.0. Video follows any positive
    /// rate; if the audio output rejects it, audio is skipped until the rate is
    /// back at 1.0. Returns `false` when uninitialized or for invalid rates.
    pub fn set_play_speed(&self, rate: f32) -> bool {
        let mut inner = self.write();
        if inner.state == PlaybackState::Uninitialized || !rate.is_finite() || rate <= 0.0 {
            return false;
        }
        let rate = if (1.0 - rate).abs() < 0.01 { 1.0 } else { rate };
        let Some(pipeline) = &inner.pipeline else {
            return false;
        };
        let audio_applied = pipeline.audio_sink().set_play_speed(rate);
        pipeline.set_play_speed(rate, audio_applied);
        if !audio_applied {
            log::debug!("player {}: audio does not follow speed {rate}", inner.id);
        }
        inner.play_speed = rate;
        true
    }

    pub fn play_speed(&self) -> f32 {
        self.read().play_speed
    }

    pub fn add_listener(&self, listener: Arc<dyn MediaEventListener>) {
        self.read().listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MediaEventListener>) -> bool {
        self.read().listeners.remove(listener)
    }

    /// The sink audio is currently routed to.
    pub fn audio_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.read().audio_sink()
    }

    /// Whether a broken audio output was replaced by a silent one mid-stream.
    pub fn audio_fell_back(&self) -> bool {
        self.read()
            .pipeline
            .as_ref()
            .is_some_and(FramePipeline::audio_fell_back)
    }

    /// The audio format the sink accepted, `None` when muted or without audio.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.read().audio_format
    }

    pub fn source(&self) -> Option<Url> {
        self.read().source.clone()
    }

    pub fn stream_info(&self) -> StreamInfo {
        self.read().info.clone()
    }

    pub fn vid(&self) -> StreamSelector {
        self.read().info.vid
    }

    pub fn aid(&self) -> StreamSelector {
        self.read().info.aid
    }

    pub fn width(&self) -> u32 {
        self.read().info.width
    }

    pub fn height(&self) -> u32 {
        self.read().info.height
    }

    pub fn framerate(&self) -> f32 {
        self.read().info.fps
    }

    /// Stream duration in milliseconds.
    pub fn duration(&self) -> i64 {
        self.read().info.duration_ms
    }

    pub fn stream_bitrate(&self) -> u64 {
        self.read().info.stream_bitrate
    }

    pub fn video_bitrate(&self) -> u32 {
        self.read().info.video_bitrate
    }

    pub fn audio_bitrate(&self) -> u32 {
        self.read().info.audio_bitrate
    }

    pub fn video_codec(&self) -> Option<String> {
        self.read().info.video_codec.clone()
    }

    pub fn audio_codec(&self) -> Option<String> {
        self.read().info.audio_codec.clone()
    }

    pub fn video_frames(&self) -> u32 {
        self.read().info.video_frames
    }

    pub fn audio_frames(&self) -> u32 {
        self.read().info.audio_frames
    }

    pub fn decoded_frame_count(&self) -> u64 {
        self.read()
            .pipeline
            .as_ref()
            .map_or(0, FramePipeline::decoded_frame_count)
    }

    pub fn presented_frame_count(&self) -> u64 {
        self.read()
            .pipeline
            .as_ref()
            .map_or(0, FramePipeline::presented_frame_count)
    }

    pub fn video_pts(&self) -> i64 {
        self.read().sync.video_pts()
    }

    pub fn audio_pts(&self) -> i64 {
        self.read().sync.audio_pts()
    }

    pub fn texture_count(&self) -> usize {
        self.read()
            .pipeline
            .as_ref()
            .map_or(0, FramePipeline::texture_count)
    }

    pub fn textures(&self) -> Vec<TextureId> {
        self.read()
            .pipeline
            .as_ref()
            .map(|p| p.textures().to_vec())
            .unwrap_or_default()
    }

    pub fn last_frame(&self) -> Option<VideoFrame> {
        self.read().pipeline.as_ref().and_then(FramePipeline::last_frame)
    }

    pub fn perf_string(&self) -> String {
        let inner = self.read();
        let (decoded, presented, dropped) = inner.pipeline.as_ref().map_or((0, 0, 0), |p| {
            (
                p.decoded_frame_count(),
                p.presented_frame_count(),
                p.dropped_frame_count(),
            )
        });
        let audio = inner
            .audio_sink()
            .map_or_else(|| "no audio".to_string(), |sink| sink.perf_string());
        format!(
            "frames decoded {decoded}, presented {presented}, dropped {dropped}; pts v {} a {} (d {}); {audio}",
            inner.sync.video_pts(),
            inner.sync.audio_pts(),
            inner.sync.av_delta(),
        )
    }
}

impl fmt::Display for MediaPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        let info = &inner.info;
        write!(
            f,
            "MediaPlayer#{}[{}, {}, {}x{} @ {} fps, {} ms, speed {}, vid {}, aid {}, codecs {}/{}]",
            inner.id,
            inner.state,
            inner.source.as_ref().map_or("<none>", Url::as_str),
            info.width,
            info.height,
            info.fps,
            info.duration_ms,
            inner.play_speed,
            info.vid,
            info.aid,
            info.video_codec.as_deref().unwrap_or("-"),
            info.audio_codec.as_deref().unwrap_or("-"),
        )
    }
}

impl fmt::Debug for MediaPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Creates `count` textures sized for the stream's picture layout. Textures
/// already created are deleted again if one fails.
fn allocate_textures(
    mut backend: Box<dyn TextureBackend>,
    count: usize,
    info: &StreamInfo,
    config: &PlayerConfig,
) -> Result<(Box<dyn TextureBackend>, Vec<TextureId>)> {
    let (width, height) = info
        .pixel_format
        .and_then(|format| format.packed_texture_size(info.width, info.height))
        .unwrap_or((info.width, info.height));
    // audio-only streams still get a minimal ring
    let (width, height) = (width.max(1), height.max(1));

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        match backend.create_texture(width, height, &config.texture) {
            Ok(id) => ids.push(id),
            Err(err) => {
                for id in ids {
                    let _ = backend.delete_texture(id);
                }
                return Err(match err {
                    Error::DeviceInit(_) => err,
                    other => Error::DeviceInit(other.to_string()),
                });
            }
        }
    }
    Ok((backend, ids))
}
