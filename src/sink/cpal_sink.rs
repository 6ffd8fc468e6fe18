//! Reference `AudioSink` backed by `cpal`'s default output device.
//!
//! Grounded on the teacher's `audio/player.rs` (same `cpal` device/stream
//! setup, same "pop from a ring of samples, fall back to silence on
//! underrun" callback shape). The teacher hands its callback a lock-free
//! `ringbuf::RingBuffer`; here the shared buffer is a `parking_lot::Mutex`-
//! guarded `VecDeque` instead, because `flush()` needs to drop whatever is
//! still buffered and a plain `ringbuf::Producer` has no way to do that
//! without consumer-side access — see DESIGN.md.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::sink::AudioSink;

pub struct CpalAudioSink {
    stream: cpal::Stream,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
    channels: u16,
    sample_rate: u32,
}

impl CpalAudioSink {
    /// Opens the host's default output device and starts it in a paused
    /// state; the engine calls `play()` once it is ready to deliver audio.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::AllocFailed("no audio output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::AllocFailed(e.to_string()))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(EngineError::AllocFailed(format!(
                "unsupported output sample format: {:?}",
                config.sample_format()
            )));
        }

        let stream_config: cpal::StreamConfig = config.into();
        let channels = stream_config.channels;
        let sample_rate = stream_config.sample_rate.0;

        let capacity = (sample_rate as usize) * (channels as usize) * 2;
        let buffer = Arc::new(Mutex::new(VecDeque::<f32>::with_capacity(capacity)));
        let cb_buffer = buffer.clone();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    let mut buf = cb_buffer.lock();
                    for sample in data.iter_mut() {
                        *sample = buf.pop_front().unwrap_or(0.0);
                    }
                },
                |err| warn!("cpal output stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::AllocFailed(e.to_string()))?;
        stream
            .pause()
            .map_err(|e| EngineError::AllocFailed(e.to_string()))?;

        Ok(CpalAudioSink {
            stream,
            buffer,
            capacity,
            channels,
            sample_rate,
        })
    }
}

impl AudioSink for CpalAudioSink {
    fn write(&mut self, buffer: &[i16], offset: usize, length: usize) -> Result<usize> {
        let slice = &buffer[offset..offset + length];
        let mut buf = self.buffer.lock();
        let mut written = 0;
        for &sample in slice {
            if buf.len() >= self.capacity {
                break;
            }
            buf.push_back(sample as f32 / i16::MAX as f32);
            written += 1;
        }
        Ok(written)
    }

    fn play(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| EngineError::AudioWriteFailed(e.to_string()))
    }

    fn pause(&mut self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| EngineError::AudioWriteFailed(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.buffer.lock().clear();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.flush()?;
        self.pause()
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
