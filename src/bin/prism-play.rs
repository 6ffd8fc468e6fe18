//! Headless reference player: drives `prism_core::Engine` against a file
//! path, using `BufferFrameSink`/`CpalAudioSink` rather than any GPU or
//! windowing toolkit (that pipeline is out of scope for this crate — spec
//! §6.3). Exists so the crate is runnable out of the box, the way the
//! teacher's GUI binary is, without embedding an engine is required to
//! exercise it end to end.

use std::thread;
use std::time::Duration;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info};

use prism_core::sink::BufferFrameSink;
#[cfg(feature = "cpal-sink")]
use prism_core::sink::CpalAudioSink;
use prism_core::{Engine, OpenOptions};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Play a media file through the reference headless sinks.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the media file to play.
    path: String,

    /// Disable audio output even when the `cpal-sink` feature is enabled.
    #[arg(long)]
    no_audio: bool,
}

fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("off,prism_core=info"))
        .unwrap();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = prism_core::init() {
        error!("failed to initialize ffmpeg: {e}");
        std::process::exit(1);
    }

    let engine = Engine::new();
    let options = OpenOptions::new(args.path);
    let frame_sink = Box::new(BufferFrameSink::new(options.pixel_format.bytes_per_pixel()));

    #[cfg(feature = "cpal-sink")]
    let audio_sink = if args.no_audio {
        None
    } else {
        match CpalAudioSink::new() {
            Ok(sink) => Some(Box::new(sink) as Box<dyn prism_core::sink::AudioSink>),
            Err(e) => {
                error!("failed to open audio output, continuing without audio: {e}");
                None
            }
        }
    };
    #[cfg(not(feature = "cpal-sink"))]
    let audio_sink = None;

    if let Err(e) = engine.open(options, frame_sink, audio_sink) {
        error!("failed to open input: {e}");
        std::process::exit(1);
    }

    if let Err(e) = engine.resume() {
        error!("failed to start playback: {e}");
        std::process::exit(1);
    }
    if let Err(e) = engine.render_start() {
        error!("failed to start rendering: {e}");
        std::process::exit(1);
    }

    let duration = engine.duration().unwrap_or(0.0);
    info!("playing ({duration:.1}s)");

    loop {
        match engine.render_frame() {
            Ok(frame) if frame.eos => {
                info!("end of stream");
                engine.release_frame();
                break;
            }
            Ok(_frame) => {
                engine.release_frame();
            }
            Err(e) => {
                error!("render_frame failed: {e}");
                break;
            }
        }
    }

    engine.render_stop();
    // Give any in-flight audio a moment to drain before tearing down.
    thread::sleep(Duration::from_millis(100));
    if let Err(e) = engine.stop() {
        error!("failed to stop cleanly: {e}");
    }
}
