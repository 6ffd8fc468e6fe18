//! Concurrent audio/video playback engine built on FFmpeg.
//!
//! A host embeds [`Engine`]: call [`Engine::open`] with its own
//! [`FrameSink`](sink::FrameSink)/[`AudioSink`](sink::AudioSink)
//! implementations (or the reference [`BufferFrameSink`](sink::BufferFrameSink)
//! and, with the `cpal-sink` feature, [`CpalAudioSink`](sink::CpalAudioSink)),
//! then drive `render_start`/`render_frame`/`release_frame` on its own
//! render thread while `pause`/`resume`/`seek`/`stop` are safe to call from
//! any other thread at any time.

mod clock;
mod decoder;
mod engine;
mod error;
mod open;
mod options;
mod queue;
mod reader;
mod renderer;
pub mod sink;
mod stream;

pub use engine::{Engine, RenderedFrame};
pub use error::{EngineError, Result};
pub use options::{OpenOptions, PixelFormat, StreamSelect};
pub use stream::StreamKind;

/// Must be called once, before the first [`Engine::open`] (spec §4.6
/// step 1's implicit `av_register_all`/`avformat_network_init`
/// equivalent — modern FFmpeg only needs `ffmpeg_next::init`).
pub fn init() -> Result<()> {
    ffmpeg_next::init().map_err(Into::into)
}
