//! Demuxer/reader thread (spec §4.3): the sole initiator of both fan-out
//! barriers (SEEK's FLUSH, and STOP), and the only thread that calls
//! `av_seek_frame`/`avformat_close_input`-equivalents.
//!
//! Read-loop shape (`packets().next()`, EOF handling) is generalized from
//! the teacher's `audio::decoder::AudioDecoder`/`video::decoder::VideoDecoder`
//! iterators; the SEEK/STOP fan-out is grounded on `original_source`'s
//! `player_read_thread` (`FFmpegLibrary/jni/player.c`).

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ffmpeg_next::{self as ffmpeg};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::engine::{SharedState, PAUSE_POLL_MS};
use crate::queue::{BoundedQueue, Predicate};
use crate::stream::{PacketSlot, StreamKind};

pub(crate) struct ReaderArgs {
    pub input: ffmpeg::format::context::Input,
    pub container_index_to_kind: HashMap<usize, StreamKind>,
    pub video_container_index: Option<usize>,
    pub video_time_base: ffmpeg::Rational,
    pub queues: HashMap<StreamKind, Arc<BoundedQueue<PacketSlot>>>,
    pub shared: Arc<Mutex<SharedState>>,
    pub cv: Arc<Condvar>,
}

/// Demuxer/reader thread body (spec §4.3).
pub(crate) fn run(args: ReaderArgs) {
    let ReaderArgs {
        mut input,
        container_index_to_kind,
        video_container_index,
        video_time_base,
        queues,
        shared,
        cv,
    } = args;

    'outer: loop {
        // Step 1: pause/seek/stop poll (spec §4.3 step 1).
        loop {
            let (paused, stopping, seeking) = {
                let g = shared.lock();
                (g.clock.is_paused(), g.stopping, g.seek_position.is_some())
            };
            if stopping {
                do_stop(&queues, &shared, &cv);
                return;
            }
            if seeking {
                do_seek(&mut input, video_container_index, video_time_base, &queues, &shared, &cv);
                continue 'outer;
            }
            if !paused {
                break;
            }
            thread::sleep(Duration::from_millis(PAUSE_POLL_MS));
        }

        match input.packets().next() {
            None => {
                // EOF: push an EOS marker through the video queue (spec
                // §4.3 step "EOF") and wait for SEEK or STOP.
                if let Some(video_queue) = queues.get(&StreamKind::Video) {
                    let pushed = BoundedQueue::push_start(video_queue, |g: &SharedState| {
                        if g.stopping {
                            Predicate::Skip(())
                        } else {
                            Predicate::Test
                        }
                    });
                    if let Ok(mut guard) = pushed {
                        guard.eos = true;
                        BoundedQueue::push_finish(guard);
                    }
                }

                let mut g = shared.lock();
                while !g.stopping && g.seek_position.is_none() {
                    cv.wait(&mut g);
                }
                let stopping = g.stopping;
                drop(g);
                if stopping {
                    do_stop(&queues, &shared, &cv);
                    return;
                }
                do_seek(&mut input, video_container_index, video_time_base, &queues, &shared, &cv);
                continue 'outer;
            }
            Some((stream, packet)) => {
                let index = stream.index();
                let Some(&kind) = container_index_to_kind.get(&index) else {
                    // Not a selected stream; drop it (spec §4.3 "route by
                    // stream index").
                    continue 'outer;
                };
                let Some(queue) = queues.get(&kind) else {
                    continue 'outer;
                };

                let pushed = BoundedQueue::push_start(queue, |g: &SharedState| {
                    if g.stopping {
                        Predicate::Skip(())
                    } else if g.seek_position.is_some() {
                        Predicate::Skip(())
                    } else {
                        Predicate::Test
                    }
                });
                if let Ok(mut guard) = pushed {
                    guard.eos = false;
                    guard.packet = Some(packet);
                    BoundedQueue::push_finish(guard);
                }
                // If `pushed` was skipped, the packet is simply dropped —
                // the outer loop re-enters step 1 and handles the seek/stop
                // that interrupted the push.
            }
        }
    }
}

/// SEEK fan-out (spec §4.3 SEEK): rescale into the video stream's time
/// base, request the seek, then flush every active stream and wait for
/// every decoder to ack before resuming reads.
fn do_seek(
    input: &mut ffmpeg::format::context::Input,
    video_container_index: Option<usize>,
    video_time_base: ffmpeg::Rational,
    queues: &HashMap<StreamKind, Arc<BoundedQueue<PacketSlot>>>,
    shared: &Arc<Mutex<SharedState>>,
    cv: &Arc<Condvar>,
) {
    let seek_seconds = shared.lock().seek_position;
    let Some(seconds) = seek_seconds else { return };

    let seek_ok = if let Some(stream_index) = video_container_index {
        let timestamp = (seconds * f64::from(video_time_base.denominator())
            / f64::from(video_time_base.numerator())) as i64;
        // ffmpeg-next doesn't expose a per-stream `av_seek_frame`, only the
        // format-wide timestamp seek, so this goes through the raw API
        // exactly like `original_source`'s call with `whence = 0`.
        unsafe {
            ffmpeg::sys::av_seek_frame(input.as_mut_ptr(), stream_index as i32, timestamp, 0) >= 0
        }
    } else {
        false
    };

    if !seek_ok {
        warn!("seek failed, resuming playback at the current position");
        let mut g = shared.lock();
        g.seek_position = None;
        drop(g);
        cv.notify_all();
        return;
    }

    // Fan-out FLUSH: ask every active stream's decoder to drain and flush
    // its codec context, then wait for all of them to ack.
    {
        let mut g = shared.lock();
        for kind in queues.keys() {
            g.flush_requested.insert(*kind, true);
        }
        drop(g);
        cv.notify_all();

        let mut g = shared.lock();
        while !g.barrier_clear(&g.flush_requested.clone()) {
            cv.wait(&mut g);
        }
    }

    let mut g = shared.lock();
    g.seek_position = None;
    let now = std::time::Instant::now();
    g.clock.update_external_clock_pts(seconds, now);
    drop(g);
    cv.notify_all();
}

/// STOP fan-out (spec §4.3 STOP): ask every active stream's decoder to
/// drain, flush, and mark itself dead, wait for all of them, then this
/// thread exits too.
fn do_stop(
    queues: &HashMap<StreamKind, Arc<BoundedQueue<PacketSlot>>>,
    shared: &Arc<Mutex<SharedState>>,
    cv: &Arc<Condvar>,
) {
    {
        let mut g = shared.lock();
        for kind in queues.keys() {
            g.stop_requested.insert(*kind, true);
        }
        drop(g);
        cv.notify_all();

        let mut g = shared.lock();
        while !g.barrier_clear(&g.stop_requested.clone()) {
            cv.wait(&mut g);
        }
    }
}
