//! System audio output through cpal.
//!
//! A cpal stream is not `Send` on every platform, so a control thread owns
//! the device and its stream. Buffers are queued into a [`SoftwareBackend`]
//! whose bytes the output callback drains.

use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use super::backend::{AudioBackend, AudioCapabilities, BufferHandle};
use super::software::{SoftwareBackend, SoftwareBackendHandle};
use crate::format::AudioFormat;
use crate::{Error, Result};

enum Command {
    Configure(AudioFormat, Sender<Result<()>>),
    Shutdown,
}

/// [`AudioBackend`] playing through the default (or a named) output device.
pub struct CpalBackend {
    name: String,
    queue: SoftwareBackend,
    commands: Sender<Command>,
    control: Option<JoinHandle<()>>,
}

impl CpalBackend {
    /// Opens the output device called `device_name`, or the default one.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let (queue, voice) = SoftwareBackend::new("cpal");
        let (commands, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let wanted = device_name.map(str::to_owned);

        let control = thread::Builder::new()
            .name("cpal-output".into())
            .spawn(move || {
                let device = match pick_device(wanted.as_deref()) {
                    Ok(device) => device,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let name = device.name().unwrap_or_else(|_| "unknown".into());
                let _ = ready_tx.send(Ok(name));
                run_control(device, voice, command_rx);
            })
            .map_err(|e| Error::DeviceInit(format!("failed to spawn output thread: {e}")))?;

        let name = ready_rx
            .recv()
            .map_err(|_| Error::DeviceInit("output thread exited during startup".into()))??;
        log::info!("using audio output device {name}");
        Ok(Self {
            name,
            queue,
            commands,
            control: Some(control),
        })
    }
}

fn pick_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::DeviceInit(format!("failed to enumerate devices: {e}")))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            return Ok(device);
        }
        log::warn!("output device '{name}' not found, using the default device");
    }
    host.default_output_device()
        .ok_or_else(|| Error::DeviceInit("no default output device".into()))
}

fn run_control(device: cpal::Device, voice: SoftwareBackendHandle, commands: Receiver<Command>) {
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(command) = commands.recv() {
        match command {
            Command::Configure(format, reply) => {
                // drop the old stream before opening a new one
                stream = None;
                let result = build_stream(&device, &format, voice.clone()).and_then(|s| {
                    s.play()
                        .map_err(|e| Error::DeviceInit(format!("failed to start stream: {e}")))?;
                    Ok(s)
                });
                let _ = reply.send(result.map(|s| stream = Some(s)));
            }
            Command::Shutdown => break,
        }
    }
    drop(stream);
    log::debug!("audio output thread finished");
}

fn build_stream(
    device: &cpal::Device,
    format: &AudioFormat,
    voice: SoftwareBackendHandle,
) -> Result<cpal::Stream> {
    let sample_format = device
        .default_output_config()
        .map_err(|e| Error::DeviceInit(format!("failed to get default config: {e}")))?
        .sample_format();
    let config = cpal::StreamConfig {
        channels: format.channel_count as u16,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    log::debug!("opening output stream {format} as {sample_format:?}");
    match sample_format {
        cpal::SampleFormat::F32 => stream_for::<f32>(device, &config, format, voice),
        cpal::SampleFormat::I16 => stream_for::<i16>(device, &config, format, voice),
        cpal::SampleFormat::U16 => stream_for::<u16>(device, &config, format, voice),
        other => Err(Error::DeviceInit(format!("unsupported sample format {other:?}"))),
    }
}

fn stream_for<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: &AudioFormat,
    voice: SoftwareBackendHandle,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16> + FromSample<u8>,
{
    let wide = format.sample_size == 16;
    let bytes_per_sample = if wide { 2 } else { 1 };
    let mut scratch = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() * bytes_per_sample, 0u8);
                let filled = voice.drain_bytes(&mut scratch) / bytes_per_sample;
                if wide {
                    for (out, bytes) in data.iter_mut().zip(scratch.chunks_exact(2)) {
                        *out = T::from_sample(i16::from_le_bytes([bytes[0], bytes[1]]));
                    }
                } else {
                    for (out, byte) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*byte);
                    }
                }
                // underrun is silence
                for out in &mut data[filled..] {
                    *out = T::EQUILIBRIUM;
                }
            },
            |err| log::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| Error::DeviceInit(format!("failed to build stream: {e}")))
}

impl AudioBackend for CpalBackend {
    fn capabilities(&self) -> AudioCapabilities {
        AudioCapabilities::pcm_8_16(self.name.clone())
    }

    fn configure(&mut self, format: &AudioFormat) -> Result<()> {
        self.queue.configure(format)?;
        let (reply, result) = bounded(1);
        self.commands
            .send(Command::Configure(*format, reply))
            .map_err(|_| Error::DeviceRuntime("output thread is gone".into()))?;
        result
            .recv()
            .map_err(|_| Error::DeviceRuntime("output thread is gone".into()))?
    }

    fn generate_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>> {
        self.queue.generate_buffers(count)
    }

    fn delete_buffers(&mut self, handles: &[BufferHandle]) -> Result<()> {
        self.queue.delete_buffers(handles)
    }

    fn queue_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        self.queue.queue_buffer(handle, data)
    }

    fn processed_buffers(&mut self) -> Result<usize> {
        self.queue.processed_buffers()
    }

    fn unqueue_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>> {
        self.queue.unqueue_buffers(count)
    }

    fn play(&mut self) -> Result<()> {
        self.queue.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.queue.pause()
    }

    fn stop(&mut self) -> Result<()> {
        self.queue.stop()
    }

    fn is_playing(&mut self) -> Result<bool> {
        self.queue.is_playing()
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        if pitch != 1.0 {
            return Err(Error::DeviceRuntime(format!(
                "{} cannot change pitch to {pitch}",
                self.name
            )));
        }
        self.queue.set_pitch(pitch)
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(control) = self.control.take() {
            if control.join().is_err() {
                log::error!("audio output thread panicked");
            }
        }
        self.queue.close()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if self.control.is_some() {
            let _ = self.close();
        }
    }
}
