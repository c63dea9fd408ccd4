use std::{
    future::{pending, Pending},
    pin::Pin,
    time::Duration,
};

use futures::future::Either;
use tokio::time::{sleep, Sleep};

use super::state::PlaybackState;

/// Repeating timer that interpolates progress between polls.
///
/// Only armed while a track is loaded and playing.
pub struct ProgressTicker {
    period: Duration,
    timer: Pin<Box<Either<Sleep, Pending<()>>>>,
}

impl ProgressTicker {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timer: Box::pin(Either::Right(pending())),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.timer.as_ref().get_ref(), Either::Left(_))
    }

    /// Start or stop the timer to follow the play state
    pub fn follow(&mut self, state: &PlaybackState) {
        let should_run = state.has_track() && state.is_playing();
        match (should_run, self.is_running()) {
            (true, false) => {
                tracing::debug!("Progress ticker started");
                self.timer = Box::pin(Either::Left(sleep(self.period)));
            }
            (false, true) => self.stop(),
            _ => {}
        }
    }

    pub fn stop(&mut self) {
        tracing::debug!("Progress ticker stopped");
        self.timer = Box::pin(Either::Right(pending()));
    }

    /// Wait for the next fire. Pending forever while stopped.
    ///
    /// Cancel safe: dropping the future keeps the deadline.
    pub async fn tick(&mut self) {
        (&mut self.timer).await;
        if let Either::Left(sleep) = self.timer.as_mut().as_pin_mut() {
            let next = sleep.deadline() + self.period;
            sleep.reset(next);
        }
    }

    #[must_use]
    pub const fn step_ms(&self) -> u64 {
        self.period.as_millis() as u64
    }
}

/// Advance the estimated progress by one step, pinned at the duration.
///
/// Returns whether the progress moved.
pub fn advance(state: &mut PlaybackState, step_ms: u64) -> bool {
    if !state.has_track() || !state.is_playing() {
        return false;
    }
    let next = state
        .estimated_progress_ms
        .saturating_add(step_ms)
        .min(state.duration_ms());
    let moved = next != state.estimated_progress_ms;
    state.estimated_progress_ms = next;
    moved
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::playback::PlaybackSnapshot;

    fn playing(progress_ms: u64, duration_ms: u64, is_playing: bool) -> PlaybackState {
        PlaybackState {
            snapshot: Some(PlaybackSnapshot {
                track_id: Some("t1".to_owned()),
                title: "Title".to_owned(),
                artist_names: Vec::new(),
                album_art_url: None,
                track_url: None,
                duration_ms,
                server_progress_ms: progress_ms,
                is_playing,
                fetched_at: Instant::now(),
            }),
            estimated_progress_ms: progress_ms,
            ..PlaybackState::default()
        }
    }

    #[test]
    fn three_ticks_advance_three_seconds() {
        let mut state = playing(10_000, 200_000, true);
        for _ in 0..3 {
            assert!(advance(&mut state, 1000));
        }
        assert_eq!(state.estimated_progress_ms, 13_000);
    }

    #[test]
    fn progress_is_pinned_at_duration() {
        let mut state = playing(2_500, 3_000, true);
        for _ in 0..10 {
            advance(&mut state, 1000);
            assert!(state.estimated_progress_ms <= 3_000);
        }
        assert_eq!(state.estimated_progress_ms, 3_000);
        assert!(!advance(&mut state, 1000));
    }

    #[test]
    fn paused_or_empty_state_does_not_advance() {
        let mut paused = playing(5_000, 10_000, false);
        assert!(!advance(&mut paused, 1000));
        assert_eq!(paused.estimated_progress_ms, 5_000);

        let mut empty = PlaybackState::default();
        assert!(!advance(&mut empty, 1000));
        assert_eq!(empty.estimated_progress_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_follows_play_state() {
        let mut ticker = ProgressTicker::new(Duration::from_millis(1000));
        assert!(!ticker.is_running());
        assert_eq!(ticker.step_ms(), 1000);

        ticker.follow(&playing(0, 10_000, true));
        assert!(ticker.is_running());

        let start = Instant::now();
        ticker.tick().await;
        ticker.tick().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "{elapsed:?}");

        ticker.follow(&playing(0, 10_000, false));
        assert!(!ticker.is_running());
        ticker.follow(&PlaybackState::default());
        assert!(!ticker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_ticker_never_fires() {
        let mut ticker = ProgressTicker::new(Duration::from_millis(1000));
        let fired = tokio::time::timeout(Duration::from_secs(10), ticker.tick()).await;
        assert!(fired.is_err());
    }
}
