//! Audio output: the [`AudioSink`] contract and its implementations.

mod backend;
#[cfg(feature = "cpal")]
mod cpal_backend;
mod null;
mod pooled;
mod software;

use std::sync::Arc;

pub use backend::{AudioBackend, AudioCapabilities, BufferHandle};
#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
pub use null::NullAudioDevice;
pub use pooled::{ContextGuard, PlayingBuffer, PooledAudioDevice};
pub use software::{SoftwareBackend, SoftwareBackendHandle, SourceState};

use crate::config::AudioDeviceConfig;
use crate::format::AudioFormat;
use crate::Result;

/// Decoded PCM bytes with their presentation timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub pts: i64,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, pts: i64) -> Self {
        Self { data, pts }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An audio output the player pushes decoded frames into.
///
/// Implementations serialize all calls internally, so a sink can be shared
/// between the decode path and the controlling thread.
pub trait AudioSink: Send + Sync {
    fn name(&self) -> String;

    /// The format the sink would pick without other constraints.
    fn preferred_format(&self) -> AudioFormat;

    /// Negotiates `requested` and allocates `frame_count` buffers.
    ///
    /// Returns the chosen format. An error means the sink cannot play this
    /// stream; the caller should switch to a null sink.
    fn init_sink(&self, requested: &AudioFormat, frame_count: usize) -> Result<AudioFormat>;

    fn is_initialized(&self) -> bool;

    /// Queues one frame, taking ownership of its bytes.
    fn enqueue(&self, frame: AudioFrame) -> Result<()>;

    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    /// Stops output and drops everything queued.
    fn flush(&self) -> Result<()>;

    /// Releases the sink. Errors are logged, never returned. Safe to call repeatedly.
    fn destroy(&self);

    fn is_playing(&self) -> bool;

    /// Applies a playback rate. Returns `false` if the rate is not supported,
    /// in which case the previous rate stays in effect.
    fn set_play_speed(&self, rate: f32) -> bool;

    fn play_speed(&self) -> f32;

    /// Frames enqueued since creation.
    fn enqueued_frame_count(&self) -> u64;

    /// Size of the buffer pool.
    fn frame_count(&self) -> usize;

    /// Buffers waiting to be played.
    fn queued_frame_count(&self) -> usize;

    /// Buffers free for the next enqueue.
    fn free_frame_count(&self) -> usize;

    fn queued_byte_count(&self) -> usize;

    /// Playback time of everything queued.
    fn queued_time_ms(&self) -> u32;

    /// PTS of the oldest frame still playing.
    fn pts(&self) -> i64;

    fn is_null(&self) -> bool {
        false
    }

    fn perf_string(&self) -> String {
        format!(
            "{}[frames {}/{} free, queued {} ({} bytes, {} ms), pts {}, speed {}]",
            self.name(),
            self.free_frame_count(),
            self.frame_count(),
            self.queued_frame_count(),
            self.queued_byte_count(),
            self.queued_time_ms(),
            self.pts(),
            self.play_speed(),
        )
    }
}

/// Supplies the sink a player binds at stream initialization.
pub trait AudioSinkFactory: Send + Sync {
    fn create_default(&self) -> Arc<dyn AudioSink>;

    fn create_null(&self) -> Arc<dyn AudioSink> {
        Arc::new(NullAudioDevice::new())
    }
}

impl<F> AudioSinkFactory for F
where
    F: Fn() -> Arc<dyn AudioSink> + Send + Sync,
{
    fn create_default(&self) -> Arc<dyn AudioSink> {
        self()
    }
}

/// Opens the system output when built with the `cpal` feature and falls back
/// to [`NullAudioDevice`] otherwise.
#[derive(Debug, Clone, Default)]
pub struct DefaultAudioSinkFactory {
    pub config: AudioDeviceConfig,
}

impl DefaultAudioSinkFactory {
    pub fn new(config: AudioDeviceConfig) -> Self {
        Self { config }
    }
}

impl AudioSinkFactory for DefaultAudioSinkFactory {
    #[cfg(feature = "cpal")]
    fn create_default(&self) -> Arc<dyn AudioSink> {
        match CpalBackend::open(None) {
            Ok(backend) => Arc::new(PooledAudioDevice::with_config(backend, self.config.clone())),
            Err(err) => {
                log::warn!("no audio output available, audio is muted: {err}");
                self.create_null()
            }
        }
    }

    #[cfg(not(feature = "cpal"))]
    fn create_default(&self) -> Arc<dyn AudioSink> {
        log::debug!("built without an audio output backend, audio is muted");
        self.create_null()
    }
}
