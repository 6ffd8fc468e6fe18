//! Per-stream decode threads (spec §4.4).
//!
//! One thread per open stream kind. Each owns its codec context exclusively
//! (spec §5: "codec contexts... read by at most one thread per kind during
//! steady state"), which is why, unlike `original_source`'s reader-side
//! `avcodec_flush_buffers` call, FLUSH/STOP calls it from the owning decoder
//! thread itself — the only place that can touch the context without a
//! second lock.
//!
//! Decode-loop shape (EAGAIN/EOF matching, `send_packet`/`receive_frame`)
//! is generalized from the teacher's `audio::decoder::AudioDecoder` and
//! `video::decoder::VideoDecoder` iterators; resampler construction is
//! generalized from `audio::player::spawn_audio`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ffmpeg_next::{self as ffmpeg, software::resampling, software::scaling};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::engine::{Signal, SharedState, PAUSE_POLL_MS};
use crate::options::PixelFormat;
use crate::queue::{BoundedQueue, Predicate};
use crate::sink::{AudioSink, FrameSink};
use crate::stream::{FrameSlot, PacketSlot, StreamKind};

fn pending_signal(shared: &Mutex<SharedState>, kind: StreamKind) -> Option<Signal> {
    pending_signal_from(&shared.lock(), kind)
}

/// Same check as [`pending_signal`], for callers that already hold the
/// shared lock (queue predicate closures receive it rather than re-locking
/// it — `BoundedQueue` pairs its condvar with exactly one mutex).
fn pending_signal_from(g: &SharedState, kind: StreamKind) -> Option<Signal> {
    if g.stop_requested.get(&kind).copied().unwrap_or(false) {
        Some(Signal::Stop)
    } else if g.flush_requested.get(&kind).copied().unwrap_or(false) {
        Some(Signal::Flush)
    } else {
        None
    }
}

fn drain_packets(queue: &Arc<BoundedQueue<PacketSlot>>) {
    while let Some(slot) = BoundedQueue::pop_start_nonblocking(queue) {
        BoundedQueue::pop_finish(slot);
    }
}

fn drain_frames(queue: &Arc<BoundedQueue<FrameSlot>>) {
    while let Some(slot) = BoundedQueue::pop_start_nonblocking(queue) {
        BoundedQueue::pop_finish(slot);
    }
}

/// Acks a STOP request: drains the packet queue, flushes the codec
/// context, clears this stream's flags, and marks it dead so a concurrent
/// reader fan-out never blocks on a thread that has already exited (spec
/// §4.4, §7 "pipeline errors... enter FLUSH/STOP").
fn ack_stop(
    kind: StreamKind,
    queue: &Arc<BoundedQueue<PacketSlot>>,
    shared: &Arc<Mutex<SharedState>>,
    cv: &Arc<Condvar>,
) {
    drain_packets(queue);
    let mut g = shared.lock();
    g.stop_requested.insert(kind, false);
    g.stream_alive.insert(kind, false);
    drop(g);
    cv.notify_all();
}

fn ack_flush(
    kind: StreamKind,
    queue: &Arc<BoundedQueue<PacketSlot>>,
    shared: &Arc<Mutex<SharedState>>,
    cv: &Arc<Condvar>,
) {
    drain_packets(queue);
    let mut g = shared.lock();
    g.flush_requested.insert(kind, false);
    drop(g);
    cv.notify_all();
}

fn is_eagain(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::sys::EAGAIN)
}

/// Blocks while paused, re-checking for a pending FLUSH/STOP every poll
/// (spec §4.4 step 1). Returns the signal that broke the wait, if any.
fn wait_out_pause(shared: &Arc<Mutex<SharedState>>, kind: StreamKind) -> Option<Signal> {
    loop {
        if let Some(sig) = pending_signal(shared, kind) {
            return Some(sig);
        }
        if !shared.lock().clock.is_paused() {
            return None;
        }
        thread::sleep(Duration::from_millis(PAUSE_POLL_MS));
    }
}

pub(crate) struct AudioDecodeArgs {
    pub decoder: ffmpeg::codec::decoder::Audio,
    pub time_base: ffmpeg::Rational,
    pub queue: Arc<BoundedQueue<PacketSlot>>,
    pub shared: Arc<Mutex<SharedState>>,
    pub cv: Arc<Condvar>,
    pub sink: Arc<Mutex<Box<dyn AudioSink>>>,
}

/// Audio decode thread (spec §4.4.1).
pub(crate) fn audio(args: AudioDecodeArgs) {
    let AudioDecodeArgs {
        mut decoder,
        time_base,
        queue,
        shared,
        cv,
        sink,
    } = args;

    let kind = StreamKind::Audio;
    let mut resampler: Option<resampling::Context> = None;
    let mut pts_accumulator: f64 = 0.0;
    let mut samples_since_pts: i64 = 0;

    'outer: loop {
        match wait_out_pause(&shared, kind) {
            Some(Signal::Stop) => {
                decoder.flush();
                ack_stop(kind, &queue, &shared, &cv);
                return;
            }
            Some(Signal::Flush) => {
                let _ = sink.lock().flush();
                decoder.flush();
                ack_flush(kind, &queue, &shared, &cv);
                continue 'outer;
            }
            _ => {}
        }

        let popped = BoundedQueue::pop_start(&queue, |g: &SharedState| {
            match pending_signal_from(g, kind) {
                Some(Signal::Stop) => Predicate::Skip(Signal::Stop),
                Some(Signal::Flush) => Predicate::Skip(Signal::Flush),
                _ => Predicate::Test,
            }
        });
        let slot = match popped {
            Ok(slot) => slot,
            Err(Signal::Stop) => {
                decoder.flush();
                ack_stop(kind, &queue, &shared, &cv);
                return;
            }
            Err(Signal::Flush) => {
                let _ = sink.lock().flush();
                decoder.flush();
                ack_flush(kind, &queue, &shared, &cv);
                continue 'outer;
            }
            Err(_) => unreachable!("audio predicate only yields Stop/Flush"),
        };

        if slot.eos {
            // EOS only ever travels through the video queue (spec §4.3);
            // an audio slot never carries one, but skip it harmlessly.
            BoundedQueue::pop_finish(slot);
            continue;
        }

        let packet = slot.packet.as_ref().expect("non-eos audio slot carries a packet");
        let send_result = decoder.send_packet(packet);
        BoundedQueue::pop_finish(slot);

        if let Err(e) = send_result {
            warn!("audio send_packet failed: {e}");
            ack_stop(kind, &queue, &shared, &cv);
            return;
        }

        loop {
            let mut raw = ffmpeg::frame::Audio::empty();
            match decoder.receive_frame(&mut raw) {
                Ok(()) => {}
                Err(ref e) if is_eagain(e) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("audio decode failed: {e}");
                    ack_stop(kind, &queue, &shared, &cv);
                    return;
                }
            }

            let pts = raw.pts().map(|p| {
                p as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator())
            }).unwrap_or_else(|| pts_accumulator + samples_since_pts as f64 / raw.rate().max(1) as f64);
            pts_accumulator = pts;
            samples_since_pts = raw.samples() as i64;

            let (sink_channels, sink_rate) = {
                let s = sink.lock();
                (s.channel_count(), s.sample_rate())
            };
            let target_format = ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed);
            let needs_resample =
                raw.format() != target_format || raw.channels() != sink_channels || raw.rate() != sink_rate;

            let pcm_bytes: Vec<u8>;
            if needs_resample {
                if resampler.is_none() {
                    let out_layout = match sink_channels {
                        1 => ffmpeg::channel_layout::ChannelLayout::MONO,
                        2 => ffmpeg::channel_layout::ChannelLayout::STEREO,
                        _ => ffmpeg::channel_layout::ChannelLayout::STEREO_DOWNMIX,
                    };
                    match resampling::Context::get(
                        raw.format(),
                        raw.channel_layout(),
                        raw.rate(),
                        target_format,
                        out_layout,
                        sink_rate,
                    ) {
                        Ok(r) => resampler = Some(r),
                        Err(e) => {
                            warn!("failed to build audio resampler: {e}");
                            ack_stop(kind, &queue, &shared, &cv);
                            return;
                        }
                    }
                }
                let mut resampled = ffmpeg::frame::Audio::empty();
                match resampler.as_mut().unwrap().run(&raw, &mut resampled) {
                    Err(e) => {
                        // original_source's "buffer full" path: the
                        // resampler's internal FIFO overran. Drop it and
                        // rebuild fresh on the next frame rather than get
                        // stuck.
                        warn!("resampler overflow, reinitializing: {e}");
                        resampler = None;
                        continue;
                    }
                    Ok(Some(_delay)) => {
                        // The success path of the same condition: the
                        // output buffer filled exactly, so samples may
                        // remain buffered inside the resampler. Reinit
                        // rather than silently drop them on the next call.
                        warn!("resampler output buffer filled, reinitializing");
                        resampler = None;
                        continue;
                    }
                    Ok(None) => {}
                }
                pcm_bytes = resampled.data(0).to_vec();
            } else {
                pcm_bytes = raw.data(0).to_vec();
            }

            {
                let mut g = shared.lock();
                g.clock.update_audio_pts(pts, Instant::now());
                drop(g);
                cv.notify_all();
            }

            let samples: Vec<i16> = pcm_bytes
                .chunks_exact(2)
                .map(|c| i16::from_ne_bytes([c[0], c[1]]))
                .collect();
            let len = samples.len();
            if let Err(e) = sink.lock().write(&samples, 0, len) {
                warn!("audio sink write failed: {e}");
                ack_stop(kind, &queue, &shared, &cv);
                return;
            }
        }
    }
}

pub(crate) struct VideoDecodeArgs {
    pub decoder: ffmpeg::codec::decoder::Video,
    pub time_base: ffmpeg::Rational,
    pub queue: Arc<BoundedQueue<PacketSlot>>,
    pub video_queue: Arc<BoundedQueue<FrameSlot>>,
    pub shared: Arc<Mutex<SharedState>>,
    pub cv: Arc<Condvar>,
    pub frame_sink: Arc<Mutex<Box<dyn FrameSink>>>,
    pub pixel_format: PixelFormat,
}

/// Video decode thread (spec §4.4.2).
pub(crate) fn video(args: VideoDecodeArgs) {
    let VideoDecodeArgs {
        mut decoder,
        time_base,
        queue,
        video_queue,
        shared,
        cv,
        frame_sink,
        pixel_format,
    } = args;

    let kind = StreamKind::Video;
    let (out_width, out_height) = (decoder.width(), decoder.height());
    let dst_format = pixel_format.to_ffmpeg();
    let mut scaler: Option<scaling::Context> = None;

    'outer: loop {
        match wait_out_pause(&shared, kind) {
            Some(Signal::Stop) => {
                decoder.flush();
                ack_stop(kind, &queue, &shared, &cv);
                drain_frames(&video_queue);
                return;
            }
            Some(Signal::Flush) => {
                flush_video(kind, &queue, &video_queue, &mut decoder, &shared, &cv);
                continue 'outer;
            }
            _ => {}
        }

        let popped = BoundedQueue::pop_start(&queue, |g: &SharedState| {
            match pending_signal_from(g, kind) {
                Some(Signal::Stop) => Predicate::Skip(Signal::Stop),
                Some(Signal::Flush) => Predicate::Skip(Signal::Flush),
                _ => Predicate::Test,
            }
        });
        let slot = match popped {
            Ok(slot) => slot,
            Err(Signal::Stop) => {
                decoder.flush();
                ack_stop(kind, &queue, &shared, &cv);
                drain_frames(&video_queue);
                return;
            }
            Err(Signal::Flush) => {
                flush_video(kind, &queue, &video_queue, &mut decoder, &shared, &cv);
                continue 'outer;
            }
            Err(_) => unreachable!("video predicate only yields Stop/Flush"),
        };

        if slot.eos {
            BoundedQueue::pop_finish(slot);
            push_eos_frame(&video_queue);
            continue;
        }

        let packet = slot.packet.as_ref().expect("non-eos video slot carries a packet");
        let send_result = decoder.send_packet(packet);
        BoundedQueue::pop_finish(slot);

        if let Err(e) = send_result {
            warn!("video send_packet failed: {e}");
            decoder.flush();
            ack_stop(kind, &queue, &shared, &cv);
            return;
        }

        loop {
            let mut raw = ffmpeg::frame::Video::empty();
            match decoder.receive_frame(&mut raw) {
                Ok(()) => {}
                Err(ref e) if is_eagain(e) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("video decode failed: {e}");
                    decoder.flush();
                    ack_stop(kind, &queue, &shared, &cv);
                    return;
                }
            }

            let pts = raw
                .pts()
                .map(|p| p as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator()))
                .unwrap_or(0.0);

            if scaler.is_none() {
                match scaling::Context::get(
                    raw.format(),
                    raw.width(),
                    raw.height(),
                    dst_format,
                    out_width,
                    out_height,
                    scaling::Flags::BICUBIC,
                ) {
                    Ok(s) => scaler = Some(s),
                    Err(e) => {
                        warn!("failed to build video scaler: {e}");
                        decoder.flush();
                        ack_stop(kind, &queue, &shared, &cv);
                        return;
                    }
                }
            }

            let mut scaled = ffmpeg::frame::Video::empty();
            if let Err(e) = scaler.as_mut().unwrap().run(&raw, &mut scaled) {
                warn!("video scale failed: {e}");
                continue;
            }

            let frame_guard = BoundedQueue::push_start::<()>(&video_queue, |_| Predicate::Test);
            let mut frame_guard = frame_guard.expect("video frame push uses Test only, never Skip");
            frame_guard.time = pts;
            frame_guard.eos = false;
            let bitmap = frame_guard
                .bitmap
                .expect("frame slot pre-allocated with a bitmap at open");

            // Pixels must be copied in before the slot is published (spec
            // §4.4.2): push_finish makes it visible to the renderer, which
            // may display the bitmap immediately.
            let copy_result = frame_sink
                .lock()
                .with_locked_pixels(&bitmap, &mut |dst: &mut [u8]| {
                    let src = scaled.data(0);
                    let n = src.len().min(dst.len());
                    dst[..n].copy_from_slice(&src[..n]);
                });
            if let Err(e) = copy_result {
                warn!("failed to lock bitmap for scaled frame: {e}");
            }

            BoundedQueue::push_finish(frame_guard);
        }
    }
}

/// Video FLUSH (spec §4.4.2): when a render loop is actively pulling
/// frames, it must be the one to drain the queue (it may be mid-copy into
/// a slot otherwise), so this hands it the `flush_video_play` baton and
/// waits for the render side to clear it. Otherwise the decoder drains the
/// queue itself directly.
fn flush_video(
    kind: StreamKind,
    queue: &Arc<BoundedQueue<PacketSlot>>,
    video_queue: &Arc<BoundedQueue<FrameSlot>>,
    decoder: &mut ffmpeg::codec::decoder::Video,
    shared: &Arc<Mutex<SharedState>>,
    cv: &Arc<Condvar>,
) {
    let rendering = shared.lock().rendering;
    if rendering {
        let mut g = shared.lock();
        g.flush_video_play = true;
        drop(g);
        cv.notify_all();
        let mut g = shared.lock();
        while g.flush_video_play {
            cv.wait(&mut g);
        }
    } else {
        drain_frames(video_queue);
    }
    decoder.flush();
    ack_flush(kind, queue, shared, cv);
}

fn push_eos_frame(video_queue: &Arc<BoundedQueue<FrameSlot>>) {
    if let Ok(mut guard) = BoundedQueue::push_start::<()>(video_queue, |_| Predicate::Test) {
        guard.eos = true;
        BoundedQueue::push_finish(guard);
    }
}
