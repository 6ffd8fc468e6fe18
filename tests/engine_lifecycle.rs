//! Lifecycle-level integration tests that don't require a decodable media
//! fixture: open failure paths, idempotence (spec.md §8), and the
//! render_start/render_stop/pause/resume guards that don't need a running
//! pipeline to exercise.

use std::io::Write;

use prism_core::sink::BufferFrameSink;
use prism_core::{Engine, EngineError, OpenOptions};

fn init_once() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        prism_core::init().expect("ffmpeg init");
    });
}

#[test]
fn open_nonexistent_path_fails_without_leaving_a_session() {
    init_once();
    let engine = Engine::new();
    let options = OpenOptions::new("/nonexistent/path/does-not-exist.mp4");
    let frame_sink = Box::new(BufferFrameSink::new(2));

    let err = engine.open(options, frame_sink, None).unwrap_err();
    assert!(matches!(err, EngineError::OpenFailed(_)));

    // A failed open must not leave a session behind (spec §4.6 step 10).
    assert!(matches!(engine.duration(), Err(EngineError::NotPlaying)));
}

#[test]
fn open_on_garbage_file_fails_with_a_setup_error() {
    init_once();
    let mut file = tempfile::Builder::new()
        .suffix(".mp4")
        .tempfile()
        .expect("create temp file");
    file.write_all(&[0u8; 4096]).expect("write garbage bytes");

    let engine = Engine::new();
    let options = OpenOptions::new(file.path().to_str().unwrap());
    let frame_sink = Box::new(BufferFrameSink::new(2));

    let err = engine.open(options, frame_sink, None).unwrap_err();
    assert!(matches!(
        err,
        EngineError::OpenFailed(_) | EngineError::StreamInfoFailed(_) | EngineError::NoDecoder(_)
    ));
}

#[test]
fn controller_ops_require_an_open_session() {
    init_once();
    let engine = Engine::new();

    assert!(matches!(engine.pause(), Err(EngineError::NotPlaying)));
    assert!(matches!(engine.resume(), Err(EngineError::NotPlaying)));
    assert!(matches!(engine.seek(1.0), Err(EngineError::NotPlaying)));
    assert!(matches!(engine.duration(), Err(EngineError::NotPlaying)));
    assert!(matches!(engine.current_time(), Err(EngineError::NotPlaying)));
}

#[test]
fn stop_without_an_open_session_is_an_idempotent_no_op() {
    init_once();
    let engine = Engine::new();

    // spec §4.6 "stop: if not playing, return" — not a programmer error,
    // unlike pause/render_start misuse (spec §7).
    assert!(engine.stop().is_ok());
    assert!(engine.stop().is_ok());
}

#[test]
fn render_start_then_render_start_again_is_a_programmer_error() {
    let engine = Engine::new();

    engine.render_start().expect("first render_start succeeds");
    assert!(matches!(
        engine.render_start(),
        Err(EngineError::AlreadyRendering)
    ));

    engine.render_stop();
    // After render_stop, render_start is available again.
    assert!(engine.render_start().is_ok());
}

#[test]
fn render_frame_without_an_open_session_reports_not_playing() {
    let engine = Engine::new();
    engine.render_start().unwrap();
    assert!(matches!(
        engine.render_frame(),
        Err(EngineError::NotPlaying)
    ));
}
