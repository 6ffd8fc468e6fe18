//! Three-clock model: audio, video (with drift), and external reference
//! clock, plus the pause/resume bookkeeping that hides paused wall time
//! (spec §4.2).
//!
//! Generalizes the teacher's `media::clock::GlobalClock` (a single
//! offset-plus-`Instant` clock used to drive one video pipeline) into the
//! three independent clocks the engine needs for audio-slaved video timing
//! and a reference clock that survives seeks. All readings are pure
//! functions of stored state plus a wall-clock `Instant`; callers hold the
//! engine's queue mutex while calling these, so no internal locking is
//! needed here.

use std::time::Instant;

/// All fields mirror spec §3's "Engine state... Clock fields" and §4.2's
/// audio/video/external clock state.
pub struct ClockState {
    epoch: Instant,

    /// Last audio pts (or sample-arithmetic advance) handed to the sink.
    pub audio_pts: f64,
    /// Wall instant of the last audio write.
    pub audio_write_time: Instant,
    /// Snapshot taken at `pause`; consumed at the next `resume`.
    audio_pause_time: Option<Instant>,

    /// Latest displayed video pts.
    pub video_current_pts: f64,
    /// `pts - wall_now` at the moment `video_current_pts` was last set.
    pub video_current_pts_drift: f64,

    external_value: f64,
    external_wall_ref: Instant,
    external_drift: f64,
    /// Pinned to 1.0 — see spec §9 open question on adaptive slaving.
    external_speed: f64,

    paused: bool,
}

impl ClockState {
    pub fn new(now: Instant) -> Self {
        ClockState {
            epoch: now,
            audio_pts: 0.0,
            audio_write_time: now,
            audio_pause_time: None,
            video_current_pts: 0.0,
            video_current_pts_drift: 0.0,
            external_value: 0.0,
            external_wall_ref: now,
            external_drift: 0.0,
            external_speed: 1.0,
            paused: false,
        }
    }

    fn wall_seconds(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.epoch).as_secs_f64()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// §4.2 "Audio clock": set directly by the audio decode thread on each
    /// write, either from `pts * time_base` or from sample arithmetic when
    /// the packet carries `NO_PTS`.
    pub fn update_audio_pts(&mut self, pts: f64, at: Instant) {
        self.audio_pts = pts;
        self.audio_write_time = at;
    }

    /// §4.2 "Video clock": `drift = pts - wall_now`; reading while playing
    /// is `drift + wall_now`.
    pub fn update_video_pts(&mut self, pts: f64, at: Instant) {
        self.video_current_pts = pts;
        self.video_current_pts_drift = pts - self.wall_seconds(at);
    }

    pub fn video_clock_now(&self, at: Instant) -> f64 {
        if self.paused {
            self.video_current_pts
        } else {
            self.video_current_pts_drift + self.wall_seconds(at)
        }
    }

    /// §4.2 "External clock". `update_external_clock_pts` in the original
    /// recomputes drift and republishes the wall reference every call.
    pub fn update_external_clock_pts(&mut self, value: f64, at: Instant) {
        self.external_value = value;
        self.external_drift = value - self.wall_seconds(at);
        self.external_wall_ref = at;
    }

    /// Pinned to 1.0 per the spec's open question; kept so a future
    /// adaptive-slaving feature has a seam to hook into without touching
    /// the read path below.
    #[allow(dead_code)]
    pub fn update_external_clock_speed(&mut self, speed: f64) {
        self.external_speed = speed;
    }

    pub fn external_clock_now(&self, at: Instant) -> f64 {
        if self.paused {
            self.external_value
        } else {
            let wall_now = self.wall_seconds(at);
            let wall_ref = self.wall_seconds(self.external_wall_ref);
            self.external_drift + wall_now - (wall_now - wall_ref) * (1.0 - self.external_speed)
        }
    }

    /// §4.2 "Pause/resume bookkeeping", pause half: snapshot
    /// `audio_pause_time`.
    pub fn on_pause(&mut self, at: Instant) {
        self.audio_pause_time = Some(at);
        self.paused = true;
    }

    /// §4.2 "Pause/resume bookkeeping", resume half: hide the paused wall
    /// interval from the audio write timestamp, then recompute video drift
    /// and republish the external clock against the new wall reading.
    pub fn on_resume(&mut self, at: Instant) {
        let pause_time = self.audio_pause_time.take().unwrap_or(at);
        if self.audio_write_time < pause_time {
            self.audio_write_time = at;
        } else if self.audio_write_time < at {
            let hidden = at.saturating_duration_since(pause_time);
            self.audio_write_time += hidden;
        }

        self.video_current_pts_drift = self.video_current_pts - self.wall_seconds(at);

        let republished = self.external_clock_now(at);
        self.paused = false;
        self.update_external_clock_pts(republished, at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn external_clock_reads_back_pts_when_paused() {
        let t0 = Instant::now();
        let mut clock = ClockState::new(t0);
        clock.on_pause(t0);
        clock.update_external_clock_pts(12.5, t0 + Duration::from_millis(5));
        assert_eq!(clock.external_clock_now(t0 + Duration::from_secs(1)), 12.5);
    }

    #[test]
    fn pause_then_resume_hides_paused_interval() {
        let t0 = Instant::now();
        let mut clock = ClockState::new(t0);
        clock.update_audio_pts(1.0, t0 + Duration::from_millis(100));

        let pause_at = t0 + Duration::from_millis(200);
        clock.on_pause(pause_at);

        let resume_at = pause_at + Duration::from_secs(1);
        clock.on_resume(resume_at);

        // audio_write_time was before pause_time, so it should now read
        // resume_at exactly (not 1s earlier).
        assert_eq!(clock.audio_write_time, resume_at);
        assert!(!clock.is_paused());
    }

    #[test]
    fn video_clock_holds_steady_while_paused() {
        let t0 = Instant::now();
        let mut clock = ClockState::new(t0);
        clock.update_video_pts(3.0, t0 + Duration::from_millis(50));
        clock.on_pause(t0 + Duration::from_millis(60));
        let reading_a = clock.video_clock_now(t0 + Duration::from_millis(100));
        let reading_b = clock.video_clock_now(t0 + Duration::from_secs(5));
        assert_eq!(reading_a, reading_b);
        assert_eq!(reading_a, 3.0);
    }
}
