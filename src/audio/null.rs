use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{AudioFrame, AudioSink};
use crate::config::AudioDeviceConfig;
use crate::format::AudioFormat;
use crate::Result;

/// Sink that accepts everything and plays nothing.
///
/// Used when audio is muted, when no output is configured and as the
/// fallback after a real device fails to initialize.
#[derive(Debug, Default)]
pub struct NullAudioDevice {
    initialized: AtomicBool,
    playing: AtomicBool,
    play_speed: Mutex<Option<f32>>,
}

impl NullAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for NullAudioDevice {
    fn name(&self) -> String {
        "null".into()
    }

    fn preferred_format(&self) -> AudioFormat {
        AudioFormat::DEFAULT
    }

    fn init_sink(&self, requested: &AudioFormat, _frame_count: usize) -> Result<AudioFormat> {
        self.initialized.store(true, Ordering::Release);
        Ok(*requested)
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn enqueue(&self, _frame: AudioFrame) -> Result<()> {
        Ok(())
    }

    fn play(&self) -> Result<()> {
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn destroy(&self) {
        self.playing.store(false, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    fn set_play_speed(&self, rate: f32) -> bool {
        match AudioDeviceConfig::default().normalize_speed(rate) {
            Some(rate) => {
                *self.play_speed.lock() = Some(rate);
                true
            }
            None => false,
        }
    }

    fn play_speed(&self) -> f32 {
        self.play_speed.lock().unwrap_or(1.0)
    }

    fn enqueued_frame_count(&self) -> u64 {
        0
    }

    fn frame_count(&self) -> usize {
        0
    }

    fn queued_frame_count(&self) -> usize {
        0
    }

    fn free_frame_count(&self) -> usize {
        0
    }

    fn queued_byte_count(&self) -> usize {
        0
    }

    fn queued_time_ms(&self) -> u32 {
        0
    }

    fn pts(&self) -> i64 {
        0
    }

    fn is_null(&self) -> bool {
        true
    }
}
