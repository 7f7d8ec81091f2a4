//! Audio sink over a fixed pool of backend buffers.
//!
//! Every generated buffer lives in exactly one of two rings: `available`
//! (free to fill) or `playing` (queued on the backend, oldest first). All
//! state sits behind one reentrant context lock that is only let go while
//! sleeping for the backend to finish a buffer.

use std::cell::RefCell;
use std::thread;
use std::time::Instant;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use super::backend::{AudioBackend, AudioCapabilities, BufferHandle};
use super::{AudioFrame, AudioSink};
use crate::config::AudioDeviceConfig;
use crate::format::AudioFormat;
use crate::ring_buffer::RingBuffer;
use crate::sync::Synchronizer;
use crate::{Error, Result};

/// A buffer currently queued on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayingBuffer {
    pub handle: BufferHandle,
    pub pts: i64,
    pub size: usize,
}

struct DeviceState<B> {
    backend: B,
    format: Option<AudioFormat>,
    handles: Vec<BufferHandle>,
    available: RingBuffer<BufferHandle>,
    playing: RingBuffer<PlayingBuffer>,
    bytes_queued: usize,
    pts_playing: i64,
    enqueued_frames: u64,
    play_requested: bool,
    play_speed: f32,
    closed: bool,
}

impl<B: AudioBackend> DeviceState<B> {
    fn new(backend: B) -> Self {
        Self {
            backend,
            format: None,
            handles: Vec::new(),
            available: RingBuffer::new(1),
            playing: RingBuffer::new(1),
            bytes_queued: 0,
            pts_playing: 0,
            enqueued_frames: 0,
            play_requested: false,
            play_speed: 1.0,
            closed: false,
        }
    }

    /// Moves `count` processed buffers from `playing` back to `available`.
    ///
    /// The backend hands buffers back oldest first, so each one must match the
    /// head of `playing`.
    fn release(&mut self, count: usize) -> Result<usize> {
        if count == 0 {
            return Ok(0);
        }
        let handles = self.backend.unqueue_buffers(count)?;
        if handles.len() != count {
            return Err(Error::InternalConsistency(format!(
                "asked to unqueue {count} buffers, backend returned {}",
                handles.len()
            )));
        }
        for handle in handles {
            let Some(oldest) = self.playing.get() else {
                return Err(Error::InternalConsistency(format!(
                    "unqueued buffer {} while no buffer is playing",
                    handle.0
                )));
            };
            if oldest.handle != handle {
                return Err(Error::InternalConsistency(format!(
                    "unqueued buffer {} but buffer {} was queued first",
                    handle.0, oldest.handle.0
                )));
            }
            self.bytes_queued = self.bytes_queued.checked_sub(oldest.size).ok_or_else(|| {
                Error::InternalConsistency("queued byte count went negative".into())
            })?;
            if self.available.put(handle).is_err() {
                return Err(Error::InternalConsistency(format!(
                    "buffer {} released into a full available ring",
                    handle.0
                )));
            }
        }
        if let Some(oldest) = self.playing.peek() {
            self.pts_playing = oldest.pts;
        }
        Ok(count)
    }

    /// Releases whatever the backend has finished, without waiting.
    fn release_processed(&mut self) -> Result<usize> {
        if self.playing.is_empty() {
            return Ok(0);
        }
        let processed = self.backend.processed_buffers()?;
        self.release(processed.min(self.playing.size()))
    }

    /// Stops the backend and returns every playing buffer to `available`.
    fn release_all(&mut self) -> Result<()> {
        if let Err(err) = self.backend.stop() {
            log::warn!("failed to stop audio output: {err}");
        }
        let count = self.playing.size();
        match self.release(count) {
            Ok(_) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::warn!(
                    "backend did not return {count} buffers ({err}), reclaiming them anyway"
                );
                for buffer in self.playing.drain() {
                    // capacity matches the pool, so this only fails on a duplicate
                    if self.available.put(buffer.handle).is_err() {
                        return Err(Error::InternalConsistency(format!(
                            "buffer {} is both available and playing",
                            buffer.handle.0
                        )));
                    }
                }
            }
        }
        self.bytes_queued = 0;
        self.pts_playing = 0;
        self.check_pool()
    }

    fn check_pool(&self) -> Result<()> {
        let total = self.handles.len();
        let (available, playing) = (self.available.size(), self.playing.size());
        if available + playing != total {
            return Err(Error::InternalConsistency(format!(
                "{available} available + {playing} playing buffers, pool holds {total}"
            )));
        }
        let playing = self.playing.to_vec();
        let queued: usize = playing.iter().map(|b| b.size).sum();
        if queued != self.bytes_queued {
            return Err(Error::InternalConsistency(format!(
                "{} bytes accounted as queued, playing buffers hold {queued}",
                self.bytes_queued
            )));
        }
        let mut seen: Vec<BufferHandle> = self.available.to_vec();
        seen.extend(playing.iter().map(|b| b.handle));
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != total {
            return Err(Error::InternalConsistency(
                "a buffer is tracked in both rings".into(),
            ));
        }
        Ok(())
    }

    fn backend_playing(&mut self) -> Result<bool> {
        self.backend.is_playing()
    }
}

type ContextLock<B> = ReentrantMutex<RefCell<DeviceState<B>>>;

/// Holds the device context lock. Every sink call made while it is alive
/// runs as one uninterrupted sequence.
pub struct ContextGuard<'a, B> {
    _guard: ReentrantMutexGuard<'a, RefCell<DeviceState<B>>>,
}

/// [`AudioSink`] backed by an [`AudioBackend`] with a pool of queued buffers.
pub struct PooledAudioDevice<B> {
    name: String,
    config: AudioDeviceConfig,
    capabilities: AudioCapabilities,
    context: ContextLock<B>,
}

impl<B: AudioBackend> PooledAudioDevice<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, AudioDeviceConfig::default())
    }

    pub fn with_config(backend: B, config: AudioDeviceConfig) -> Self {
        let capabilities = backend.capabilities();
        Self {
            name: capabilities.device_name.clone(),
            config,
            capabilities,
            context: ReentrantMutex::new(RefCell::new(DeviceState::new(backend))),
        }
    }

    pub fn capabilities(&self) -> &AudioCapabilities {
        &self.capabilities
    }

    /// Takes the context lock for a sequence of calls.
    pub fn lock_context(&self) -> ContextGuard<'_, B> {
        ContextGuard {
            _guard: self.context.lock(),
        }
    }

    /// Releases buffers the backend has finished, without waiting.
    pub fn reclaim(&self) -> Result<usize> {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        state.release_processed()
    }

    /// Free handles in the order they will be reused.
    pub fn available_handles(&self) -> Vec<BufferHandle> {
        let guard = self.context.lock();
        let state = guard.borrow();
        state.available.to_vec()
    }

    /// Queued buffers, oldest first.
    pub fn playing_buffers(&self) -> Vec<PlayingBuffer> {
        let guard = self.context.lock();
        let state = guard.borrow();
        state.playing.to_vec()
    }

    /// Verifies the pool bookkeeping: both rings partition the pool and the
    /// queued byte count matches the playing buffers.
    pub fn check_invariants(&self) -> Result<()> {
        let guard = self.context.lock();
        let state = guard.borrow();
        state.check_pool()
    }

    /// Reclaims processed buffers before an enqueue. While the backend is
    /// playing and at most one buffer is free, sleeps in bounded steps until
    /// one finishes or `max_reclaim_wait` runs out.
    fn reclaim_for_enqueue(
        &self,
        guard: &mut ReentrantMutexGuard<'_, RefCell<DeviceState<B>>>,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.max_reclaim_wait;
        loop {
            let wait = {
                let mut state = guard.borrow_mut();
                let released = state.release_processed()?;
                if released > 0 || state.available.size() > 1 || !state.backend_playing()? {
                    return Ok(());
                }
                let per_buffer = state.bytes_queued / state.playing.size().max(1);
                let buffer_ms = state
                    .format
                    .map_or(0, |f| Synchronizer::queued_duration_ms(&f, per_buffer));
                self.config.wait_interval(buffer_ms)
            };
            if Instant::now() >= deadline {
                return Ok(());
            }
            log::trace!("{}: waiting {wait:?} for a processed buffer", self.name);
            ReentrantMutexGuard::unlocked(guard, || thread::sleep(wait));
        }
    }
}

impl<B: AudioBackend> AudioSink for PooledAudioDevice<B> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn preferred_format(&self) -> AudioFormat {
        AudioFormat::DEFAULT
    }

    fn init_sink(&self, requested: &AudioFormat, frame_count: usize) -> Result<AudioFormat> {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.format.is_some() {
            return Err(Error::DeviceInit(format!("{} is already initialized", self.name)));
        }
        if state.closed {
            return Err(Error::DeviceInit(format!("{} was destroyed", self.name)));
        }
        if !self.capabilities.supports(requested) {
            log::debug!("{}: cannot play {requested}", self.name);
            return Err(Error::FormatUnsupported(*requested));
        }
        let frame_count = frame_count.max(1);
        state.backend.configure(requested)?;
        let handles = state.backend.generate_buffers(frame_count)?;
        if handles.len() != frame_count {
            let _ = state.backend.delete_buffers(&handles);
            return Err(Error::DeviceInit(format!(
                "requested {frame_count} buffers, backend generated {}",
                handles.len()
            )));
        }
        state.available = RingBuffer::full(handles.clone());
        state.playing = RingBuffer::new(frame_count);
        state.handles = handles;
        state.bytes_queued = 0;
        state.pts_playing = 0;
        state.format = Some(*requested);
        log::info!("{}: initialized {requested} with {frame_count} buffers", self.name);
        Ok(*requested)
    }

    fn is_initialized(&self) -> bool {
        self.context.lock().borrow().format.is_some()
    }

    fn enqueue(&self, frame: AudioFrame) -> Result<()> {
        let mut guard = self.context.lock();
        if guard.borrow().format.is_none() || frame.is_empty() {
            return Ok(());
        }
        self.reclaim_for_enqueue(&mut guard)?;

        let mut state = guard.borrow_mut();
        let Some(handle) = state.available.get() else {
            state.check_pool()?;
            let total = state.handles.len();
            return if state.backend_playing()? {
                Err(Error::Timeout(format!(
                    "no audio buffer finished within {:?}",
                    self.config.max_reclaim_wait
                )))
            } else {
                Err(Error::DeviceRuntime(format!(
                    "all {total} audio buffers are queued and output is not playing"
                )))
            };
        };
        if let Err(err) = state.backend.queue_buffer(handle, &frame.data) {
            let _ = state.available.put(handle);
            return Err(err);
        }
        let size = frame.len();
        if state
            .playing
            .put(PlayingBuffer {
                handle,
                pts: frame.pts,
                size,
            })
            .is_err()
        {
            return Err(Error::InternalConsistency(format!(
                "buffer {} queued into a full playing ring",
                handle.0
            )));
        }
        state.bytes_queued += size;
        state.enqueued_frames += 1;
        state.pts_playing = state.playing.peek().map_or(frame.pts, |b| b.pts);

        // the backend stops by itself once it drains, restart it while playback is wanted
        if state.play_requested && !state.backend_playing()? {
            log::debug!("{}: restarting drained output", self.name);
            state.backend.play()?;
        }
        Ok(())
    }

    fn play(&self) -> Result<()> {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.format.is_none() {
            return Ok(());
        }
        state.play_requested = true;
        if !state.playing.is_empty() && !state.backend_playing()? {
            state.backend.play()?;
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.format.is_none() {
            return Ok(());
        }
        state.play_requested = false;
        if state.backend_playing()? {
            state.backend.pause()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.format.is_none() {
            return Ok(());
        }
        state.play_requested = false;
        state.release_all()?;
        log::debug!("{}: flushed", self.name);
        Ok(())
    }

    fn destroy(&self) {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.closed {
            return;
        }
        if state.format.is_some() {
            if let Err(err) = state.release_all() {
                log::error!("{}: inconsistent buffer pool on destroy: {err}", self.name);
            }
            let handles = std::mem::take(&mut state.handles);
            if let Err(err) = state.backend.delete_buffers(&handles) {
                log::warn!("{}: failed to delete buffers: {err}", self.name);
            }
        }
        if let Err(err) = state.backend.close() {
            log::warn!("{}: failed to close output: {err}", self.name);
        }
        state.available = RingBuffer::new(1);
        state.playing = RingBuffer::new(1);
        state.bytes_queued = 0;
        state.play_requested = false;
        state.format = None;
        state.closed = true;
        log::debug!("{}: destroyed", self.name);
    }

    fn is_playing(&self) -> bool {
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.format.is_none() {
            return false;
        }
        state.backend_playing().unwrap_or_else(|err| {
            log::warn!("{}: state query failed: {err}", self.name);
            false
        })
    }

    fn set_play_speed(&self, rate: f32) -> bool {
        let Some(rate) = self.config.normalize_speed(rate) else {
            return false;
        };
        let guard = self.context.lock();
        let mut state = guard.borrow_mut();
        if state.format.is_none() {
            return false;
        }
        if let Err(err) = state.backend.set_pitch(rate) {
            log::debug!("{}: play speed {rate} rejected: {err}", self.name);
            return false;
        }
        state.play_speed = rate;
        true
    }

    fn play_speed(&self) -> f32 {
        self.context.lock().borrow().play_speed
    }

    fn enqueued_frame_count(&self) -> u64 {
        self.context.lock().borrow().enqueued_frames
    }

    fn frame_count(&self) -> usize {
        self.context.lock().borrow().handles.len()
    }

    fn queued_frame_count(&self) -> usize {
        let guard = self.context.lock();
        let state = guard.borrow();
        if state.format.is_none() {
            return 0;
        }
        state.playing.size()
    }

    fn free_frame_count(&self) -> usize {
        let guard = self.context.lock();
        let state = guard.borrow();
        if state.format.is_none() {
            return 0;
        }
        state.available.size()
    }

    fn queued_byte_count(&self) -> usize {
        self.context.lock().borrow().bytes_queued
    }

    fn queued_time_ms(&self) -> u32 {
        let guard = self.context.lock();
        let state = guard.borrow();
        state.format.map_or(0, |f| f.duration_ms(state.bytes_queued))
    }

    fn pts(&self) -> i64 {
        self.context.lock().borrow().pts_playing
    }
}

impl<B> Drop for PooledAudioDevice<B> {
    fn drop(&mut self) {
        let state = self.context.get_mut().get_mut();
        if !state.closed && !state.handles.is_empty() {
            log::warn!(
                "{}: dropped without destroy, {} buffers leaked",
                self.name,
                state.handles.len()
            );
        }
    }
}
