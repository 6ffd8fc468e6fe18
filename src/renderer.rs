//! Render pacing (spec §4.5). `Engine::render_frame` owns the loop itself
//! (it needs the engine's private session/queue state); this module holds
//! the pure sleep-interval arithmetic so it can be exercised without a
//! running pipeline.

use crate::engine::{MAX_SLEEP_MS, MIN_SLEEP_MS};

/// `pts_delta_ms − wall_delta_ms` (spec §4.5 steps 4-5). Callers compute
/// `pts_delta_ms` as the frame's presentation time minus the reference
/// clock (audio clock, or the video clock in video-only mode), and
/// `wall_delta_ms` as elapsed wall time since that clock was last stamped
/// (zero in video-only mode, where the clock reading is taken at `now`).
pub(crate) fn sleep_ms(pts_delta_ms: f64, wall_delta_ms: f64) -> f64 {
    pts_delta_ms - wall_delta_ms
}

/// Whether to present immediately, or the (already-capped) duration to
/// wait before re-evaluating (spec §4.5 step 5).
pub(crate) enum Pacing {
    PresentNow,
    Wait(f64),
}

pub(crate) fn pace(sleep: f64) -> Pacing {
    if sleep <= MIN_SLEEP_MS {
        Pacing::PresentNow
    } else {
        Pacing::Wait(sleep.min(MAX_SLEEP_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ahead_of_schedule_waits_capped_at_max() {
        let sleep = sleep_ms(100.0, 0.0);
        match pace(sleep) {
            Pacing::Wait(ms) => assert_eq!(ms, MAX_SLEEP_MS),
            Pacing::PresentNow => panic!("expected a wait"),
        }
    }

    #[test]
    fn within_threshold_presents_now() {
        let sleep = sleep_ms(0.5, 0.0);
        assert!(matches!(pace(sleep), Pacing::PresentNow));
    }

    #[test]
    fn behind_schedule_presents_now() {
        let sleep = sleep_ms(-500.0, 0.0);
        assert!(matches!(pace(sleep), Pacing::PresentNow));
    }
}
