//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use media_texture_player::audio::{
    AudioBackend, AudioCapabilities, BufferHandle, NullAudioDevice, PooledAudioDevice,
    SoftwareBackend, SoftwareBackendHandle,
};
use media_texture_player::{
    AudioDeviceConfig, AudioFormat, AudioSink, AudioSinkFactory, CpuTextureBackend, DecodedUnit,
    Decoder, DecoderCapabilities, Error, EventMask, FrameTarget, MediaEventListener, PixelFormat,
    Result, StreamInfo, StreamSelector, TextureBackend, TextureId, TextureParams, Url, VideoFrame,
};
use parking_lot::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn pattern_url() -> Url {
    Url::parse("pattern://bars").unwrap()
}

/// A pooled device over a software voice, with a short reclaim wait.
pub fn software_sink(
    name: &str,
) -> (Arc<PooledAudioDevice<SoftwareBackend>>, SoftwareBackendHandle) {
    let (backend, voice) = SoftwareBackend::new(name);
    let config = AudioDeviceConfig {
        max_reclaim_wait: Duration::from_millis(50),
        ..AudioDeviceConfig::default()
    };
    (Arc::new(PooledAudioDevice::with_config(backend, config)), voice)
}

/// Software voice that reports unknown handles when buffers are unqueued,
/// as a buggy driver would.
pub struct MisreportingBackend(SoftwareBackend);

impl AudioBackend for MisreportingBackend {
    fn capabilities(&self) -> AudioCapabilities {
        self.0.capabilities()
    }

    fn configure(&mut self, format: &AudioFormat) -> Result<()> {
        self.0.configure(format)
    }

    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>> {
        self.0.generate_buffers(count)
    }

    fn delete_buffers(&mut self, handles: &[BufferHandle]) -> Result<()> {
        self.0.delete_buffers(handles)
    }

    fn queue_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        self.0.queue_buffer(handle, data)
    }

    fn processed_buffers(&mut self) -> Result<usize> {
        self.0.processed_buffers()
    }

    fn unqueue_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>> {
        let handles = self.0.unqueue_buffers(count)?;
        Ok(handles.into_iter().map(|h| BufferHandle(h.0 + 1_000)).collect())
    }

    fn play(&mut self) -> Result<()> {
        self.0.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.0.pause()
    }

    fn stop(&mut self) -> Result<()> {
        self.0.stop()
    }

    fn is_playing(&mut self) -> Result<bool> {
        self.0.is_playing()
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        self.0.set_pitch(pitch)
    }

    fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}

/// A pooled device over a [`MisreportingBackend`].
pub fn misreporting_sink(
    name: &str,
) -> (Arc<PooledAudioDevice<MisreportingBackend>>, SoftwareBackendHandle) {
    let (backend, voice) = SoftwareBackend::new(name);
    let config = AudioDeviceConfig {
        max_reclaim_wait: Duration::from_millis(50),
        ..AudioDeviceConfig::default()
    };
    (
        Arc::new(PooledAudioDevice::with_config(MisreportingBackend(backend), config)),
        voice,
    )
}

/// Plays a software voice in the background, like an output callback would.
pub struct Drain {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drain {
    pub fn spawn(voice: SoftwareBackendHandle) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_ref = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            let mut chunk = vec![0u8; 1024];
            while !stop_ref.load(Ordering::Acquire) {
                voice.drain_bytes(&mut chunk);
                thread::sleep(Duration::from_millis(1));
            }
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Texture backend that fails once `budget` textures exist.
pub struct LimitedTextures {
    inner: CpuTextureBackend,
    budget: usize,
    pub live: Arc<AtomicUsize>,
}

impl LimitedTextures {
    pub fn new(budget: usize) -> Self {
        Self {
            inner: CpuTextureBackend::new(),
            budget,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl TextureBackend for LimitedTextures {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        params: &TextureParams,
    ) -> Result<TextureId> {
        if self.live.load(Ordering::SeqCst) >= self.budget {
            return Err(Error::DeviceInit("out of texture memory".into()));
        }
        let id = self.inner.create_texture(width, height, params)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn upload(
        &mut self,
        texture: TextureId,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()> {
        self.inner.upload(texture, format, width, height, data)
    }

    fn delete_texture(&mut self, texture: TextureId) -> Result<()> {
        self.inner.delete_texture(texture)?;
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Decoder whose open always fails.
#[derive(Default)]
pub struct UnopenableDecoder {
    pub closed: Arc<AtomicUsize>,
}

impl Decoder for UnopenableDecoder {
    fn capabilities(&self) -> DecoderCapabilities {
        DecoderCapabilities {
            name: "unopenable".into(),
            version: None,
            available: true,
            seekable: false,
        }
    }

    fn open(
        &mut self,
        source: &Url,
        _video: StreamSelector,
        _audio: StreamSelector,
        _preferred_audio: &AudioFormat,
    ) -> Result<StreamInfo> {
        Err(Error::Decode(format!("{source}: no such file")))
    }

    fn read_next_unit(&mut self, _target: &mut FrameTarget<'_>) -> Result<DecodedUnit> {
        Ok(DecodedUnit::None)
    }

    fn seek(&mut self, ms: i64) -> Result<i64> {
        Ok(ms)
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub masks: Mutex<Vec<EventMask>>,
    pub frames: Mutex<Vec<i64>>,
}

impl MediaEventListener for RecordingListener {
    fn attributes_changed(&self, _player_id: u64, mask: EventMask, _when: u64) {
        self.masks.lock().push(mask);
    }

    fn new_frame_available(&self, _player_id: u64, frame: &VideoFrame, _when: u64) {
        self.frames.lock().push(frame.pts);
    }
}

/// Factory handing out a prepared sink once, null sinks afterwards.
pub fn factory_of(sink: Arc<dyn AudioSink>) -> Arc<dyn AudioSinkFactory> {
    let slot = Mutex::new(Some(sink));
    Arc::new(move || -> Arc<dyn AudioSink> {
        slot.lock()
            .take()
            .unwrap_or_else(|| -> Arc<dyn AudioSink> { Arc::new(NullAudioDevice::new()) })
    })
}
