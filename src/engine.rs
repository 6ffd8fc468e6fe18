//! Engine controller: owns the pipeline, exposes the lifecycle surface
//! (spec §4.6), and coordinates thread creation/teardown and flush fan-out.
//!
//! Grounded on the teacher's `media::VideoPlayerState` (thread lifecycle,
//! `Drop` teardown ordering), generalized from single-stream video-only
//! playback into the full open/stop/pause/resume/seek/render surface with
//! the fan-out flush/stop barriers from `original_source`'s
//! `player_set_data_source`/`player_stop`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Instant;

use ffmpeg_next::{self as ffmpeg, media::Type as MediaType};
use parking_lot::{Condvar, Mutex};
use tracing::{instrument, warn};

use crate::clock::ClockState;
use crate::decoder::{self, audio as audio_decoder, video as video_decoder};
use crate::error::{EngineError, Result};
use crate::open::open_input;
use crate::options::{OpenOptions, StreamSelect};
use crate::queue::{BoundedQueue, Predicate, ReadGuard};
use crate::reader;
use crate::renderer;
use crate::sink::{AudioSink, Bitmap, FrameSink};
use crate::stream::{FrameSlot, PacketSlot, StreamKind};

pub(crate) const MIN_SLEEP_MS: f64 = 2.0;
pub(crate) const MAX_SLEEP_MS: f64 = 1000.0;
pub(crate) const PAUSE_POLL_MS: u64 = 10;

/// Reason a predicate aborted a blocking queue operation (spec §4.1 "Skip").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Stop,
    Seek,
    Flush,
    Interrupt,
}

/// Engine state guarded by the *queue mutex* (spec §3 "Engine state").
pub(crate) struct SharedState {
    pub playing: bool,
    pub stopping: bool,
    pub rendering: bool,
    pub interrupt_renderer: bool,
    pub flush_video_play: bool,
    pub seek_position: Option<f64>,
    pub flush_requested: HashMap<StreamKind, bool>,
    pub stop_requested: HashMap<StreamKind, bool>,
    /// Cleared by a decoder thread just before it returns, for any reason
    /// (a normal STOP ack or a self-terminating pipeline error). The
    /// reader's fan-out barriers (`barrier_clear`) treat a dead stream as
    /// vacuously satisfying its flag, so a decoder that already exited from
    /// a pipeline error (spec §7) can never deadlock a later `stop()`.
    pub stream_alive: HashMap<StreamKind, bool>,
    pub clock: ClockState,
    pub video_duration: f64,
    pub last_reported_time: f64,
    pub has_audio: bool,
}

impl SharedState {
    /// `pub(crate)` so `queue.rs`'s tests can build a standalone
    /// `SharedState` to pair with a `BoundedQueue` without going through
    /// `Engine::open`.
    pub(crate) fn new(now: Instant) -> Self {
        SharedState {
            playing: false,
            stopping: false,
            rendering: false,
            interrupt_renderer: false,
            flush_video_play: false,
            seek_position: None,
            flush_requested: HashMap::new(),
            stop_requested: HashMap::new(),
            stream_alive: HashMap::new(),
            clock: ClockState::new(now),
            video_duration: 0.0,
            last_reported_time: 0.0,
            has_audio: false,
        }
    }

    /// True once every stream tracked in `flags` has either acked (its flag
    /// cleared) or is no longer alive (spec §4.3 SEEK/STOP fan-out wait).
    pub(crate) fn barrier_clear(&self, flags: &HashMap<StreamKind, bool>) -> bool {
        flags
            .iter()
            .all(|(kind, requested)| !*requested || !self.stream_alive.get(kind).copied().unwrap_or(false))
    }
}

struct Session {
    reader: JoinHandle<()>,
    decoders: Vec<JoinHandle<()>>,
    video_queue: Arc<BoundedQueue<FrameSlot>>,
    frame_sink: Arc<Mutex<Box<dyn FrameSink>>>,
    audio_sink: Option<Arc<Mutex<Box<dyn AudioSink>>>>,
    bitmaps: Vec<Bitmap>,
}

/// The concurrent A/V playback engine (spec §1, §4.6). One instance owns at
/// most one open container at a time.
pub struct Engine {
    operation: Mutex<()>,
    shared: Arc<Mutex<SharedState>>,
    cv: Arc<Condvar>,
    /// Observed by the ffmpeg interrupt callback without needing the
    /// operation mutex, so `stop()` can abort a stuck `open()` promptly
    /// (mirrors `original_source`'s unsynchronized `player->stop` read from
    /// `decoder_interrupt_cb`).
    stop_flag: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
    pending_frame: Mutex<Option<ReadGuard<FrameSlot>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame handed to the host by [`Engine::render_frame`].
///
/// `current_time`/`duration`/`eos` together carry what spec §6.4's
/// `on_update_time(current_seconds, duration_seconds, finished_bool)` host
/// callback reported in the original: since `render_frame` is already a
/// pull interface the host calls once per displayed frame, there is no
/// need for a second callback channel — the same information rides back on
/// the return value instead (see DESIGN.md).
pub struct RenderedFrame {
    pub bitmap: Bitmap,
    pub eos: bool,
    pub current_time: f64,
    pub duration: f64,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            operation: Mutex::new(()),
            shared: Arc::new(Mutex::new(SharedState::new(Instant::now()))),
            cv: Arc::new(Condvar::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
            pending_frame: Mutex::new(None),
        }
    }

    /// spec §4.6 `open`.
    #[instrument(skip(self, options, frame_sink, audio_sink), fields(path = %options.path))]
    pub fn open(
        &self,
        options: OpenOptions,
        frame_sink: Box<dyn FrameSink>,
        audio_sink: Option<Box<dyn AudioSink>>,
    ) -> Result<()> {
        let _op = self.operation.lock();

        if self.session.lock().is_some() {
            return Err(EngineError::NotStopped);
        }

        self.stop_flag.store(false, Ordering::Relaxed);

        match self.open_inner(options, frame_sink, audio_sink) {
            Ok(session) => {
                *self.session.lock() = Some(session);
                Ok(())
            }
            Err(err) => {
                warn!("open failed: {err}");
                Err(err)
            }
        }
    }

    /// spec §4.6 `open` step 2-9.
    fn open_inner(
        &self,
        options: OpenOptions,
        mut frame_sink: Box<dyn FrameSink>,
        audio_sink: Option<Box<dyn AudioSink>>,
    ) -> Result<Session> {
        let start = Instant::now();
        let timeout = options.open_timeout;
        let stop_flag = self.stop_flag.clone();

        // Step 2: open the container, interruptible by `stop()` or a
        // wall-clock timeout (original_source's 7-second default).
        let mut input = open_input(&options.path, &options.ffmpeg_options, move || {
            stop_flag.load(Ordering::Relaxed) || start.elapsed() > timeout
        })?;

        // Step 3: select streams honoring caller indices, falling back to
        // ffmpeg's own "best stream" heuristic. The subtitle index is
        // resolved for selection symmetry with the original's fan-out
        // arrays (spec.md §4.6, DESIGN.md "subtitle stream") but never
        // decoded — subtitle rendering is a Non-goal.
        let video_stream = select_stream(&input, MediaType::Video, options.video_stream);
        let audio_stream = select_stream(&input, MediaType::Audio, options.audio_stream);
        let _subtitle_stream = select_stream(&input, MediaType::Subtitle, options.subtitle_stream);

        let (video_index, video_params, video_time_base, video_duration_ticks) = video_stream
            .ok_or_else(|| EngineError::NoDecoder("no video stream selected".into()))?;

        // A selected audio stream is only actually opened if the host also
        // supplied a sink for it (spec §9 "Video-only mode").
        let has_audio = audio_stream.is_some() && audio_sink.is_some();

        // Step 4: open codecs for every selected stream.
        let video_ctx = ffmpeg::codec::context::Context::from_parameters(video_params)
            .map_err(|e| EngineError::OpenCodecFailed(e.to_string()))?;
        let video_decoder_ctx = video_ctx
            .decoder()
            .video()
            .map_err(|e| EngineError::OpenCodecFailed(e.to_string()))?;

        let audio_decoder_ctx = if has_audio {
            let (_, audio_params, _, _) = audio_stream.as_ref().unwrap();
            let audio_ctx = ffmpeg::codec::context::Context::from_parameters(audio_params.clone())
                .map_err(|e| EngineError::OpenCodecFailed(e.to_string()))?;
            Some(
                audio_ctx
                    .decoder()
                    .audio()
                    .map_err(|e| EngineError::OpenCodecFailed(e.to_string()))?,
            )
        } else {
            None
        };

        let (out_width, out_height) = (video_decoder_ctx.width(), video_decoder_ctx.height());

        // Step 6: allocate the RGB frame queue, one host bitmap per slot.
        let mut allocated_bitmaps: Vec<Bitmap> = Vec::with_capacity(options.frame_queue_capacity);
        let video_queue = BoundedQueue::new(
            options.frame_queue_capacity,
            self.shared.clone(),
            self.cv.clone(),
            |_i| {
                let bitmap = frame_sink.allocate_bitmap(out_width, out_height)?;
                allocated_bitmaps.push(bitmap);
                Ok(FrameSlot {
                    bitmap: Some(bitmap),
                    time: 0.0,
                    eos: false,
                })
            },
        );
        let video_queue = match video_queue {
            Ok(q) => q,
            Err(e) => {
                for bitmap in &allocated_bitmaps {
                    frame_sink.release_bitmap(bitmap);
                }
                return Err(e);
            }
        };

        // Step 7: allocate the per-stream packet queues.
        let teardown_on_err = |e: EngineError, bitmaps: &[Bitmap], sink: &mut dyn FrameSink| -> EngineError {
            for bitmap in bitmaps {
                sink.release_bitmap(bitmap);
            }
            e
        };

        let video_packet_queue = BoundedQueue::new(
            options.packet_queue_capacity,
            self.shared.clone(),
            self.cv.clone(),
            |_| Ok(PacketSlot::empty()),
        )
        .map_err(|e| teardown_on_err(e, &allocated_bitmaps, frame_sink.as_mut()))?;

        let mut queues: HashMap<StreamKind, Arc<BoundedQueue<PacketSlot>>> = HashMap::new();
        queues.insert(StreamKind::Video, video_packet_queue.clone());

        let audio_packet_queue = if has_audio {
            let q = BoundedQueue::new(
                options.packet_queue_capacity,
                self.shared.clone(),
                self.cv.clone(),
                |_| Ok(PacketSlot::empty()),
            )
            .map_err(|e| teardown_on_err(e, &allocated_bitmaps, frame_sink.as_mut()))?;
            queues.insert(StreamKind::Audio, q.clone());
            Some(q)
        } else {
            None
        };

        // Step 8: duration, preferring the video stream's own duration and
        // falling back to the container's (both in AV_TIME_BASE-scaled
        // seconds once rescaled through the relevant time base).
        let video_duration = if video_duration_ticks > 0 {
            video_duration_ticks as f64 * f64::from(video_time_base.numerator())
                / f64::from(video_time_base.denominator())
        } else {
            input.duration() as f64 / 1_000_000.0
        };

        let mut container_index_to_kind = HashMap::new();
        container_index_to_kind.insert(video_index, StreamKind::Video);
        let audio_time_base;
        if let Some((audio_index, _, tb, _)) = &audio_stream {
            if has_audio {
                container_index_to_kind.insert(*audio_index, StreamKind::Audio);
            }
            audio_time_base = *tb;
        } else {
            audio_time_base = ffmpeg::Rational(1, 1);
        }

        // Step 9: publish initial state (paused, no pending seek/flush/stop)
        // before any worker can observe it.
        {
            let mut g = self.shared.lock();
            g.playing = true;
            g.stopping = false;
            g.rendering = false;
            g.interrupt_renderer = false;
            g.flush_video_play = false;
            g.seek_position = None;
            g.flush_requested.clear();
            g.stop_requested.clear();
            g.stream_alive.clear();
            for kind in queues.keys() {
                g.flush_requested.insert(*kind, false);
                g.stop_requested.insert(*kind, false);
                g.stream_alive.insert(*kind, true);
            }
            let now = Instant::now();
            g.clock = ClockState::new(now);
            g.clock.on_pause(now);
            g.video_duration = video_duration;
            g.last_reported_time = 0.0;
            g.has_audio = has_audio;
        }

        let frame_sink_arc: Arc<Mutex<Box<dyn FrameSink>>> = Arc::new(Mutex::new(frame_sink));
        let audio_sink_arc: Option<Arc<Mutex<Box<dyn AudioSink>>>> =
            audio_sink.filter(|_| has_audio).map(|s| Arc::new(Mutex::new(s)));

        let mut decoder_handles = Vec::new();

        if let (Some(audio_decoder_ctx), Some(audio_queue), Some(audio_sink_arc)) =
            (audio_decoder_ctx, audio_packet_queue.clone(), audio_sink_arc.clone())
        {
            let args = decoder::AudioDecodeArgs {
                decoder: audio_decoder_ctx,
                time_base: audio_time_base,
                queue: audio_queue,
                shared: self.shared.clone(),
                cv: self.cv.clone(),
                sink: audio_sink_arc,
            };
            decoder_handles.push(
                thread::Builder::new()
                    .name("prism-audio-decode".into())
                    .spawn(move || audio_decoder(args))
                    .map_err(|e| EngineError::ThreadFailed(e.to_string()))?,
            );
        }

        {
            let args = decoder::VideoDecodeArgs {
                decoder: video_decoder_ctx,
                time_base: video_time_base,
                queue: video_packet_queue,
                video_queue: video_queue.clone(),
                shared: self.shared.clone(),
                cv: self.cv.clone(),
                frame_sink: frame_sink_arc.clone(),
                pixel_format: options.pixel_format,
            };
            decoder_handles.push(
                thread::Builder::new()
                    .name("prism-video-decode".into())
                    .spawn(move || video_decoder(args))
                    .map_err(|e| EngineError::ThreadFailed(e.to_string()))?,
            );
        }

        let reader_args = reader::ReaderArgs {
            input,
            container_index_to_kind,
            video_container_index: Some(video_index),
            video_time_base,
            queues,
            shared: self.shared.clone(),
            cv: self.cv.clone(),
        };
        let reader_handle = thread::Builder::new()
            .name("prism-reader".into())
            .spawn(move || reader::run(reader_args))
            .map_err(|e| EngineError::ThreadFailed(e.to_string()))?;

        Ok(Session {
            reader: reader_handle,
            decoders: decoder_handles,
            video_queue,
            frame_sink: frame_sink_arc,
            audio_sink: audio_sink_arc,
            bitmaps: allocated_bitmaps,
        })
    }

    /// spec §4.6 `stop`: "if not playing, return" — unlike `pause`/`resume`,
    /// a redundant `stop` is not a programmer error, it's the documented
    /// no-op half of the `stop; stop ≡ stop` idempotence property (spec
    /// §8), so this returns `Ok(())` rather than `NotPlaying`.
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        let _op = self.operation.lock();
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        {
            let mut g = self.shared.lock();
            g.rendering = false;
            g.interrupt_renderer = true;
            g.stopping = true;
        }
        self.cv.notify_all();

        let _ = session.reader.join();
        for handle in session.decoders {
            let _ = handle.join();
        }

        {
            let mut fs = session.frame_sink.lock();
            for bitmap in &session.bitmaps {
                fs.release_bitmap(bitmap);
            }
        }
        if let Some(sink) = &session.audio_sink {
            let _ = sink.lock().stop();
        }

        {
            let mut g = self.shared.lock();
            g.playing = false;
            g.stopping = false;
            g.flush_requested.clear();
            g.stop_requested.clear();
            g.stream_alive.clear();
            g.has_audio = false;
        }
        *self.pending_frame.lock() = None;

        Ok(())
    }

    /// spec §4.6 `pause`: no-op if already paused.
    pub fn pause(&self) -> Result<()> {
        let _op = self.operation.lock();
        let audio_sink = self.active_audio_sink()?;
        if self.shared.lock().clock.is_paused() {
            return Ok(());
        }
        if let Some(sink) = &audio_sink {
            let _ = sink.lock().pause();
        }
        self.shared.lock().clock.on_pause(Instant::now());
        self.cv.notify_all();
        Ok(())
    }

    /// spec §4.6 `resume`: symmetric with `pause` — a no-op if not paused.
    pub fn resume(&self) -> Result<()> {
        let _op = self.operation.lock();
        let audio_sink = self.active_audio_sink()?;
        if !self.shared.lock().clock.is_paused() {
            return Ok(());
        }
        self.shared.lock().clock.on_resume(Instant::now());
        if let Some(sink) = &audio_sink {
            let _ = sink.lock().play();
        }
        self.cv.notify_all();
        Ok(())
    }

    /// spec §4.6 `seek`: blocks until the reader's flush fan-out has fully
    /// cleared `seek_position`.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let _op = self.operation.lock();
        if self.session.lock().is_none() {
            return Err(EngineError::NotPlaying);
        }
        {
            let mut g = self.shared.lock();
            g.seek_position = Some(seconds);
        }
        self.cv.notify_all();

        let mut g = self.shared.lock();
        while g.seek_position.is_some() {
            self.cv.wait(&mut g);
        }
        Ok(())
    }

    /// `last_reported_time` (spec §3), exposed so a host can poll the
    /// current position between `render_frame` calls rather than only
    /// learning it from a `RenderedFrame`.
    pub fn current_time(&self) -> Result<f64> {
        let _op = self.operation.lock();
        if self.session.lock().is_none() {
            return Err(EngineError::NotPlaying);
        }
        Ok(self.shared.lock().last_reported_time)
    }

    /// spec §4.6 `duration`.
    pub fn duration(&self) -> Result<f64> {
        let _op = self.operation.lock();
        if self.session.lock().is_none() {
            return Err(EngineError::NotPlaying);
        }
        Ok(self.shared.lock().video_duration)
    }

    /// spec §4.5 `render_start`. Deliberately does not serialize with the
    /// `operation` mutex used by pause/resume/seek, so it can proceed while
    /// another controller call is mid-flight, and so `render_stop` is never
    /// blocked behind it. Calling this while already rendering is a
    /// programmer error; per spec §7 that is reported as an `EngineError`
    /// rather than a panic, since a panic across an embedding boundary is
    /// undefined behavior in most hosts.
    pub fn render_start(&self) -> Result<()> {
        let mut g = self.shared.lock();
        if g.rendering {
            return Err(EngineError::AlreadyRendering);
        }
        g.rendering = true;
        g.interrupt_renderer = false;
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    /// spec §4.5 `render_stop`.
    pub fn render_stop(&self) {
        let mut g = self.shared.lock();
        g.rendering = false;
        g.interrupt_renderer = true;
        drop(g);
        self.cv.notify_all();
    }

    /// spec §4.5 `render_frame`. Pops exactly one slot and then paces
    /// around *that same frame*, re-evaluating the sleep calculation on
    /// every wake rather than re-popping (spec §4.5 step 5 "on early wake,
    /// re-evaluate from step 3").
    pub fn render_frame(&self) -> Result<RenderedFrame> {
        let (video_queue, has_audio) = {
            let session = self.session.lock();
            let s = session.as_ref().ok_or(EngineError::NotPlaying)?;
            (s.video_queue.clone(), self.shared.lock().has_audio)
        };

        'restart: loop {
            let popped = BoundedQueue::pop_start(&video_queue, |g: &SharedState| {
                if g.flush_video_play {
                    Predicate::Skip(Signal::Flush)
                } else if g.interrupt_renderer {
                    Predicate::Skip(Signal::Interrupt)
                } else if !g.rendering || g.clock.is_paused() {
                    Predicate::Wait
                } else {
                    Predicate::Test
                }
            });
            let guard = match popped {
                Ok(guard) => guard,
                Err(Signal::Interrupt) => return Err(EngineError::Interrupted),
                Err(Signal::Flush) => {
                    self.drain_for_flush(&video_queue);
                    continue 'restart;
                }
                Err(_) => unreachable!("render predicate only yields Interrupt/Flush"),
            };

            if guard.eos {
                let duration = {
                    let mut g = self.shared.lock();
                    g.last_reported_time = g.video_duration;
                    g.video_duration
                };
                *self.pending_frame.lock() = Some(guard);
                return Ok(RenderedFrame {
                    bitmap: Bitmap {
                        id: 0,
                        width: 0,
                        height: 0,
                    },
                    eos: true,
                    current_time: duration,
                    duration,
                });
            }

            loop {
                let now = Instant::now();
                let sleep = {
                    let g = self.shared.lock();
                    let (pts_delta_ms, wall_delta_ms) = if has_audio {
                        (
                            (guard.time - g.clock.audio_pts) * 1000.0,
                            now.saturating_duration_since(g.clock.audio_write_time).as_secs_f64() * 1000.0,
                        )
                    } else {
                        ((guard.time - g.clock.video_clock_now(now)) * 1000.0, 0.0)
                    };
                    renderer::sleep_ms(pts_delta_ms, wall_delta_ms)
                };

                match renderer::pace(sleep) {
                    renderer::Pacing::PresentNow => {
                        let bitmap = guard.bitmap.expect("non-eos frame slot carries a bitmap");
                        let time = guard.time;
                        let duration = {
                            let mut g = self.shared.lock();
                            g.clock.update_video_pts(time, Instant::now());
                            g.last_reported_time = time;
                            g.video_duration
                        };
                        *self.pending_frame.lock() = Some(guard);
                        return Ok(RenderedFrame {
                            bitmap,
                            eos: false,
                            current_time: time,
                            duration,
                        });
                    }
                    renderer::Pacing::Wait(ms) => {
                        let mut g = self.shared.lock();
                        if g.flush_video_play {
                            drop(g);
                            BoundedQueue::pop_finish(guard);
                            self.drain_for_flush(&video_queue);
                            continue 'restart;
                        }
                        if g.interrupt_renderer {
                            drop(g);
                            BoundedQueue::pop_finish(guard);
                            return Err(EngineError::Interrupted);
                        }
                        self.cv
                            .wait_for(&mut g, std::time::Duration::from_millis(ms as u64));
                    }
                }
            }
        }
    }

    /// The render side of the `flush_video_play` baton handoff (spec
    /// §4.4.2): drains every frame already queued (the decoder stopped
    /// producing before handing off the baton), then clears the flag so
    /// the decoder's `flush_video` can proceed.
    fn drain_for_flush(&self, video_queue: &Arc<BoundedQueue<FrameSlot>>) {
        while let Some(slot) = BoundedQueue::pop_start_nonblocking(video_queue) {
            BoundedQueue::pop_finish(slot);
        }
        let mut g = self.shared.lock();
        g.flush_video_play = false;
        drop(g);
        self.cv.notify_all();
    }

    /// spec §4.5 `release_frame`: must be called exactly once per
    /// successful `render_frame`.
    pub fn release_frame(&self) {
        if let Some(guard) = self.pending_frame.lock().take() {
            BoundedQueue::pop_finish(guard);
        }
    }

    fn active_audio_sink(&self) -> Result<Option<Arc<Mutex<Box<dyn AudioSink>>>>> {
        let session = self.session.lock();
        session
            .as_ref()
            .map(|s| s.audio_sink.clone())
            .ok_or(EngineError::NotPlaying)
    }
}

type StreamInfo = (usize, ffmpeg::codec::Parameters, ffmpeg::Rational, i64);

fn select_stream(
    input: &ffmpeg::format::context::Input,
    kind: MediaType,
    select: StreamSelect,
) -> Option<StreamInfo> {
    let stream = match select {
        StreamSelect::None => return None,
        StreamSelect::Auto => input.streams().best(kind)?,
        StreamSelect::Index(i) => {
            let stream = input.stream(i)?;
            if stream.parameters().medium() != kind {
                return None;
            }
            stream
        }
    };
    Some((
        stream.index(),
        stream.parameters(),
        stream.time_base(),
        stream.duration(),
    ))
}
