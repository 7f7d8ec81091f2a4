//! Decode/present cycle over a fixed ring of texture slots.
//!
//! Each cycle fills the next slot in forward order. A decoder read may yield
//! audio, video or nothing, so a cycle makes a bounded number of reads and
//! succeeds only once a video unit with a positive PTS lands in the slot.
//! Audio met along the way goes straight to the audio sink.
//!
//! With more than one slot the decode can run on a worker thread; the render
//! side then only ever sees slots the worker has finished with.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::audio::{AudioFrame, AudioSink, NullAudioDevice};
use crate::config::PlayerConfig;
use crate::decoder::{DecodedUnit, Decoder, FrameTarget, StreamInfo};
use crate::ring_buffer::RingBuffer;
use crate::sync::{SyncDecision, SyncPolicy, Synchronizer};
use crate::texture::{TextureBackend, TextureId};
use crate::Result;

const WORKER_POLL: Duration = Duration::from_millis(16);

/// A texture slot holding a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrame {
    /// Index of the slot in the pipeline's texture ring.
    pub slot: usize,
    pub texture: TextureId,
    pub pts: i64,
}

/// Decoder and render context, locked together for every decoder call.
pub(crate) struct DecodeContext {
    pub(crate) decoder: Box<dyn Decoder>,
    pub(crate) textures: Option<Box<dyn TextureBackend>>,
}

#[derive(Debug, Clone, Copy)]
struct PlaySpeed {
    rate: f32,
    /// Whether the audio sink plays at `rate` too.
    audio_applied: bool,
}

struct Shared {
    context: Arc<Mutex<DecodeContext>>,
    audio: RwLock<Arc<dyn AudioSink>>,
    sync: Arc<Synchronizer>,
    policy: Arc<dyn SyncPolicy>,
    retry_budget: u32,
    max_consecutive_drops: u32,
    speed: Mutex<PlaySpeed>,
    decoded: AtomicU64,
    dropped: AtomicU64,
    audio_fallback: AtomicBool,
    attribute_changes: Mutex<Option<StreamInfo>>,
}

impl Shared {
    /// Runs one decode cycle into `slot`. `on_frame` is called before the
    /// decode context is released.
    fn decode_cycle(
        &self,
        slot: usize,
        texture: TextureId,
        on_frame: impl FnOnce(&VideoFrame),
    ) -> Option<VideoFrame> {
        let mut guard = self.context.lock();
        let ctx = &mut *guard;
        let textures = ctx.textures.as_deref_mut()?;

        let mut result = None;
        let mut drops = 0;
        for _ in 0..self.retry_budget {
            let mut target = FrameTarget::new(&mut *textures, texture);
            let unit = match ctx.decoder.read_next_unit(&mut target) {
                Ok(unit) => unit,
                Err(err) => {
                    log::warn!("decoding into slot {slot} failed: {err}");
                    break;
                }
            };
            match unit {
                DecodedUnit::Video { pts } if pts > 0 => {
                    self.decoded.fetch_add(1, Ordering::Relaxed);
                    if drops < self.max_consecutive_drops
                        && self.policy.decide(pts, self.sync.audio_pts()) == SyncDecision::Drop
                    {
                        drops += 1;
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("dropping late frame {pts}");
                        continue;
                    }
                    result = Some(VideoFrame { slot, texture, pts });
                    break;
                }
                DecodedUnit::Video { pts } => log::trace!("skipping video unit with pts {pts}"),
                DecodedUnit::Audio(frame) => self.push_audio(frame),
                DecodedUnit::None => {}
            }
        }

        if let Some(info) = ctx.decoder.take_attribute_changes() {
            *self.attribute_changes.lock() = Some(info);
        }
        if let Some(frame) = &result {
            on_frame(frame);
        }
        result
    }

    fn push_audio(&self, frame: AudioFrame) {
        let speed = *self.speed.lock();
        if speed.rate != 1.0 && !speed.audio_applied {
            return;
        }
        let sink = self.audio_sink();
        let pts = frame.pts;
        match sink.enqueue(frame) {
            Ok(()) => self
                .sync
                .update_audio(if sink.is_null() { pts } else { sink.pts() }),
            Err(err) => self.audio_failed(&sink, err),
        }
    }

    /// Drops a frame on transient errors, replaces the sink on fatal ones.
    fn audio_failed(&self, sink: &Arc<dyn AudioSink>, err: crate::Error) {
        if !err.is_fatal() {
            log::warn!("dropping audio frame: {err}");
            return;
        }
        log::error!("{} is broken, continuing without audio: {err}", sink.name());
        sink.destroy();
        *self.audio.write() = Arc::new(NullAudioDevice::new());
        self.audio_fallback.store(true, Ordering::Release);
    }

    fn audio_sink(&self) -> Arc<dyn AudioSink> {
        Arc::clone(&self.audio.read())
    }
}

struct DecodeWorker {
    alive: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    free: Arc<RingBuffer<usize>>,
    ready: Arc<RingBuffer<VideoFrame>>,
    thread: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    fn spawn(shared: Arc<Shared>, textures: Vec<TextureId>) -> Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicBool::new(false));
        let free = Arc::new(RingBuffer::full((0..textures.len()).collect()));
        let ready = Arc::new(RingBuffer::new(textures.len()));

        let alive_ref = Arc::clone(&alive);
        let active_ref = Arc::clone(&active);
        let free_ref = Arc::clone(&free);
        let ready_ref = Arc::clone(&ready);

        let thread = thread::Builder::new()
            .name("frame-decoder".into())
            .spawn(move || {
                // a slot whose cycle failed is retried before taking the next one
                let mut pending = None;
                while alive_ref.load(Ordering::Acquire) {
                    if !active_ref.load(Ordering::Acquire) {
                        thread::park_timeout(WORKER_POLL);
                        continue;
                    }
                    let Some(slot) = pending.take().or_else(|| free_ref.get_timeout(WORKER_POLL))
                    else {
                        continue;
                    };
                    let delivered = shared.decode_cycle(slot, textures[slot], |frame| {
                        if ready_ref.put(*frame).is_err() {
                            log::error!("ready ring overflow for slot {}", frame.slot);
                        }
                    });
                    if delivered.is_none() {
                        pending = Some(slot);
                        thread::park_timeout(WORKER_POLL);
                    }
                }
            })
            .map_err(|e| crate::Error::DeviceInit(format!("failed to spawn decode thread: {e}")))?;

        Ok(Self {
            alive,
            active,
            free,
            ready,
            thread: Some(thread),
        })
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if let Err(err) = thread.join() {
                match err.downcast_ref::<String>() {
                    Some(e) => log::error!("decode thread panicked: {e}"),
                    None => log::error!("decode thread panicked with unknown reason"),
                }
            }
        }
    }
}

/// Owns the texture slots of one stream and produces frames for presentation.
pub struct FramePipeline {
    shared: Arc<Shared>,
    textures: Vec<TextureId>,
    last: Option<VideoFrame>,
    cursor: usize,
    presented: u64,
    worker: Option<DecodeWorker>,
}

impl FramePipeline {
    pub(crate) fn new(
        context: Arc<Mutex<DecodeContext>>,
        textures: Vec<TextureId>,
        audio: Arc<dyn AudioSink>,
        sync: Arc<Synchronizer>,
        policy: Arc<dyn SyncPolicy>,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            context,
            audio: RwLock::new(audio),
            sync,
            policy,
            retry_budget: config.retry_budget.max(1),
            max_consecutive_drops: config.max_consecutive_drops,
            speed: Mutex::new(PlaySpeed {
                rate: 1.0,
                audio_applied: true,
            }),
            decoded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            audio_fallback: AtomicBool::new(false),
            attribute_changes: Mutex::new(None),
        });
        let worker = if config.decodes_off_thread(textures.len()) {
            log::debug!("decoding {} slots on a worker thread", textures.len());
            Some(DecodeWorker::spawn(Arc::clone(&shared), textures.clone())?)
        } else {
            None
        };
        Ok(Self {
            shared,
            textures,
            last: None,
            cursor: 0,
            presented: 0,
            worker,
        })
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn textures(&self) -> &[TextureId] {
        &self.textures
    }

    pub fn decodes_off_thread(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts or stops decoding ahead on the worker thread.
    pub fn set_active(&self, active: bool) {
        if let Some(worker) = &self.worker {
            worker.set_active(active);
        }
    }

    /// Runs or collects one decode cycle. Returns the newly presented frame,
    /// or `None` if no new frame could be produced this time.
    pub fn next_frame(&mut self, blocking: bool, frame_wait: Duration) -> Option<VideoFrame> {
        let frame = match &self.worker {
            Some(worker) => {
                if blocking {
                    worker.ready.get_timeout(frame_wait)
                } else {
                    worker.ready.get()
                }
            }
            None => {
                let slot = self.cursor;
                let frame = self.shared.decode_cycle(slot, self.textures[slot], |_| {})?;
                self.cursor = (slot + 1) % self.textures.len();
                Some(frame)
            }
        }?;
        self.present(frame);
        Some(frame)
    }

    /// Makes `frame` the shown frame. The video clock follows what is shown,
    /// not what the worker has decoded ahead.
    fn present(&mut self, frame: VideoFrame) {
        self.shared.sync.update_video(frame.pts);
        if let Some(previous) = self.last.replace(frame) {
            if let Some(worker) = &self.worker {
                if worker.free.put(previous.slot).is_err() {
                    log::error!("slot {} returned twice", previous.slot);
                }
            }
        }
        self.presented += 1;
    }

    /// The frame presented most recently.
    pub fn last_frame(&self) -> Option<VideoFrame> {
        self.last
    }

    /// Seeks the decoder and discards everything decoded before the seek.
    ///
    /// Audio is flushed and both clocks are moved to the reached position.
    pub fn seek(&mut self, ms: i64) -> Result<i64> {
        let mut ctx = self.shared.context.lock();
        let position = ctx.decoder.seek(ms)?;
        if let Some(worker) = &self.worker {
            for frame in worker.ready.drain() {
                let _ = worker.free.put(frame.slot);
            }
        }
        let sink = self.shared.audio_sink();
        if let Err(err) = sink.flush() {
            self.shared.audio_failed(&sink, err);
        }
        self.shared.sync.reset(position);
        drop(ctx);
        log::debug!("seeked to {position} ms (requested {ms} ms)");
        Ok(position)
    }

    pub fn audio_sink(&self) -> Arc<dyn AudioSink> {
        self.shared.audio_sink()
    }

    /// Whether the audio sink was replaced by a null device after a fatal error.
    pub fn audio_fell_back(&self) -> bool {
        self.shared.audio_fallback.load(Ordering::Acquire)
    }

    /// Hands a failed audio call over to the same policy the decode path uses.
    pub(crate) fn audio_error(&self, err: crate::Error) {
        let sink = self.shared.audio_sink();
        self.shared.audio_failed(&sink, err);
    }

    /// Sets the video rate and whether audio follows it.
    pub(crate) fn set_play_speed(&self, rate: f32, audio_applied: bool) {
        *self.shared.speed.lock() = PlaySpeed {
            rate,
            audio_applied,
        };
    }

    pub fn play_speed(&self) -> f32 {
        self.shared.speed.lock().rate
    }

    pub fn decoded_frame_count(&self) -> u64 {
        self.shared.decoded.load(Ordering::Relaxed)
    }

    pub fn presented_frame_count(&self) -> u64 {
        self.presented
    }

    pub fn dropped_frame_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn take_attribute_changes(&self) -> Option<StreamInfo> {
        self.shared.attribute_changes.lock().take()
    }

    /// Stops the worker and deletes the textures. The audio sink and the
    /// decoder are left to the owner.
    pub(crate) fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        let mut ctx = self.shared.context.lock();
        if let Some(mut backend) = ctx.textures.take() {
            for texture in self.textures.drain(..) {
                if let Err(err) = backend.delete_texture(texture) {
                    log::warn!("failed to delete texture {}: {err}", texture.0);
                }
            }
        }
        self.last = None;
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
