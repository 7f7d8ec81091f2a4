use smallvec::SmallVec;

use crate::Result;
use crate::format::AudioFormat;

/// Name of a hardware buffer generated by an [`AudioBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// What an output backend can play, reported once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCapabilities {
    pub device_name: String,
    /// `false` if the output library or device could not be opened.
    pub available: bool,
    pub channel_counts: SmallVec<[u32; 2]>,
    pub sample_sizes: SmallVec<[u32; 2]>,
    pub fixed_point_only: bool,
    pub little_endian_only: bool,
}

impl AudioCapabilities {
    /// Mono/stereo, 8/16 bit, little-endian fixed point PCM.
    pub fn pcm_8_16(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            available: true,
            channel_counts: SmallVec::from_slice(&[1, 2]),
            sample_sizes: SmallVec::from_slice(&[8, 16]),
            fixed_point_only: true,
            little_endian_only: true,
        }
    }

    pub fn unavailable(device_name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::pcm_8_16(device_name)
        }
    }

    pub fn supports(&self, format: &AudioFormat) -> bool {
        self.available
            && self.channel_counts.contains(&format.channel_count)
            && self.sample_sizes.contains(&format.sample_size)
            && (format.fixed_point || !self.fixed_point_only)
            && (format.little_endian || !self.little_endian_only)
            && format.sample_rate > 0
    }
}

/// A source-with-buffer-queue style output, modelled after hardware voices:
/// buffers are generated up front, filled and queued, and handed back once
/// the device reports them processed.
///
/// All calls happen under the owning device's context lock.
pub trait AudioBackend: Send {
    fn capabilities(&self) -> AudioCapabilities;

    /// Prepares the output for `format`. Called before buffers are generated.
    fn configure(&mut self, format: &AudioFormat) -> Result<()>;

    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>>;

    fn delete_buffers(&mut self, handles: &[BufferHandle]) -> Result<()>;

    /// Fills `handle` with `data` and appends it to the play queue.
    fn queue_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()>;

    /// Buffers finished since they were last unqueued.
    fn processed_buffers(&mut self) -> Result<usize>;

    /// Removes `count` processed buffers from the head of the queue, oldest first.
    fn unqueue_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Stops output; every queued buffer counts as processed afterwards.
    fn stop(&mut self) -> Result<()>;

    fn is_playing(&mut self) -> Result<bool>;

    fn set_pitch(&mut self, pitch: f32) -> Result<()>;

    /// Releases the device. Further calls may fail.
    fn close(&mut self) -> Result<()>;
}
