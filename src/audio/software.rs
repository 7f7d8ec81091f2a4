//! In-memory output backend.
//!
//! Nothing is played by itself: whoever holds a [`SoftwareBackendHandle`]
//! drives consumption, either whole buffers at a time (tests, headless
//! playback) or byte-wise from a real output callback.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{AudioBackend, AudioCapabilities, BufferHandle};
use crate::format::AudioFormat;
use crate::{Error, Result};

/// Playback state of the software voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug)]
struct Queued {
    handle: BufferHandle,
    offset: usize,
}

#[derive(Debug)]
struct Voice {
    next_handle: u32,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    queue: VecDeque<Queued>,
    processed: VecDeque<BufferHandle>,
    state: SourceState,
    pitch: f32,
    format: Option<AudioFormat>,
    bytes_played: u64,
    fail_queries: bool,
    closed: bool,
}

impl Voice {
    fn new() -> Self {
        Self {
            next_handle: 0,
            buffers: HashMap::new(),
            queue: VecDeque::new(),
            processed: VecDeque::new(),
            state: SourceState::Initial,
            pitch: 1.0,
            format: None,
            bytes_played: 0,
            fail_queries: false,
            closed: false,
        }
    }

    fn finish_front(&mut self) {
        if let Some(done) = self.queue.pop_front() {
            self.processed.push_back(done.handle);
        }
        if self.queue.is_empty() && self.state == SourceState::Playing {
            // a voice that runs dry stops, like hardware does
            self.state = SourceState::Stopped;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::DeviceRuntime("software voice is closed".into()));
        }
        Ok(())
    }
}

/// Backend that keeps queued buffers in memory.
#[derive(Debug, Clone)]
pub struct SoftwareBackend {
    name: String,
    voice: Arc<Mutex<Voice>>,
}

/// Drives consumption of a [`SoftwareBackend`] from outside the device lock.
#[derive(Debug, Clone)]
pub struct SoftwareBackendHandle {
    voice: Arc<Mutex<Voice>>,
}

impl SoftwareBackend {
    pub fn new(name: impl Into<String>) -> (Self, SoftwareBackendHandle) {
        let voice = Arc::new(Mutex::new(Voice::new()));
        let handle = SoftwareBackendHandle {
            voice: Arc::clone(&voice),
        };
        (
            Self {
                name: name.into(),
                voice,
            },
            handle,
        )
    }
}

impl SoftwareBackendHandle {
    /// Marks up to `count` whole buffers as played. Only a playing voice consumes.
    pub fn consume_buffers(&self, count: usize) -> usize {
        let mut voice = self.voice.lock();
        let mut consumed = 0;
        while consumed < count && voice.state == SourceState::Playing {
            let Some(front) = voice.queue.front() else {
                break;
            };
            let len = voice.buffers.get(&front.handle).map_or(0, Vec::len);
            let remaining = len.saturating_sub(front.offset);
            voice.bytes_played += remaining as u64;
            voice.finish_front();
            consumed += 1;
        }
        consumed
    }

    /// Copies queued bytes into `out`, finishing buffers as they run out.
    ///
    /// Returns the number of bytes written; zero while not playing.
    pub fn drain_bytes(&self, out: &mut [u8]) -> usize {
        let mut guard = self.voice.lock();
        let voice = &mut *guard;
        let mut written = 0;
        while written < out.len() && voice.state == SourceState::Playing {
            let Some(front) = voice.queue.front() else {
                break;
            };
            let (handle, offset) = (front.handle, front.offset);
            let data = voice.buffers.get(&handle).map_or(&[][..], Vec::as_slice);
            let offset = offset.min(data.len());
            let n = (data.len() - offset).min(out.len() - written);
            out[written..written + n].copy_from_slice(&data[offset..offset + n]);
            let finished = offset + n >= data.len();
            written += n;
            voice.bytes_played += n as u64;
            if finished {
                voice.finish_front();
            } else if let Some(front) = voice.queue.front_mut() {
                front.offset += n;
            }
        }
        written
    }

    pub fn state(&self) -> SourceState {
        self.voice.lock().state
    }

    pub fn pitch(&self) -> f32 {
        self.voice.lock().pitch
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.voice.lock().format
    }

    /// Buffers queued and not yet processed.
    pub fn queued_buffers(&self) -> usize {
        self.voice.lock().queue.len()
    }

    pub fn processed_buffers(&self) -> usize {
        self.voice.lock().processed.len()
    }

    /// Buffers generated and not deleted.
    pub fn allocated_buffers(&self) -> usize {
        self.voice.lock().buffers.len()
    }

    pub fn bytes_played(&self) -> u64 {
        self.voice.lock().bytes_played
    }

    pub fn is_closed(&self) -> bool {
        self.voice.lock().closed
    }

    /// Makes every processed-count query fail until cleared.
    pub fn set_fail_queries(&self, fail: bool) {
        self.voice.lock().fail_queries = fail;
    }
}

impl AudioBackend for SoftwareBackend {
    fn capabilities(&self) -> AudioCapabilities {
        AudioCapabilities::pcm_8_16(self.name.clone())
    }

    fn configure(&mut self, format: &AudioFormat) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        voice.format = Some(*format);
        Ok(())
    }

    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            voice.next_handle += 1;
            let handle = BufferHandle(voice.next_handle);
            voice.buffers.insert(handle, Vec::new());
            handles.push(handle);
        }
        Ok(handles)
    }

    fn delete_buffers(&mut self, handles: &[BufferHandle]) -> Result<()> {
        let mut voice = self.voice.lock();
        for handle in handles {
            voice.buffers.remove(handle);
        }
        voice.queue.retain(|q| !handles.contains(&q.handle));
        voice.processed.retain(|h| !handles.contains(h));
        Ok(())
    }

    fn queue_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        let Some(storage) = voice.buffers.get_mut(&handle) else {
            return Err(Error::DeviceRuntime(format!("unknown buffer {}", handle.0)));
        };
        storage.clear();
        storage.extend_from_slice(data);
        voice.queue.push_back(Queued { handle, offset: 0 });
        Ok(())
    }

    fn processed_buffers(&mut self) -> Result<usize> {
        let voice = self.voice.lock();
        voice.ensure_open()?;
        if voice.fail_queries {
            return Err(Error::DeviceRuntime("processed buffer query failed".into()));
        }
        Ok(voice.processed.len())
    }

    fn unqueue_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        if count > voice.processed.len() {
            return Err(Error::DeviceRuntime(format!(
                "cannot unqueue {count} buffers, only {} processed",
                voice.processed.len()
            )));
        }
        Ok(voice.processed.drain(..count).collect())
    }

    fn play(&mut self) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        voice.state = if voice.queue.is_empty() {
            SourceState::Stopped
        } else {
            SourceState::Playing
        };
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        if voice.state == SourceState::Playing {
            voice.state = SourceState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        while !voice.queue.is_empty() {
            voice.finish_front();
        }
        voice.state = SourceState::Stopped;
        Ok(())
    }

    fn is_playing(&mut self) -> Result<bool> {
        let voice = self.voice.lock();
        voice.ensure_open()?;
        Ok(voice.state == SourceState::Playing)
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.ensure_open()?;
        voice.pitch = pitch;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut voice = self.voice.lock();
        voice.buffers.clear();
        voice.queue.clear();
        voice.processed.clear();
        voice.state = SourceState::Stopped;
        voice.closed = true;
        Ok(())
    }
}
