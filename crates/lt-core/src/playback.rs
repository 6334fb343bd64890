//! Paced live playback.
//!
//! Newly merged live frames are queued and shown one at a time, each held
//! on screen for the real gap to the next frame divided by the speed factor.
//! A periodic drift check nudges the speed so the displayed frame trails the
//! live edge by roughly the desired lag.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::{MAX_DESIRED_LAG_MS, PlaybackConfig};
use crate::session::{EngineState, SessionContext};
use crate::source::FeedSource;
use crate::store::FrameStore;
use crate::timestamp::TimePoint;

/// Result of one drift check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftAction {
    /// Too far behind live; speed raised to the contained value.
    SpeedUp(f64),
    /// Too close to live; speed lowered to the contained value.
    SlowDown(f64),
    /// Near target; speed reset to 1.0.
    Reset,
    /// Nothing to do (or nothing measurable).
    Hold,
}

/// Pacing state for live mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    paused: bool,
    desired_lag_ms: i64,
    speed: f64,
    queue: VecDeque<TimePoint>,
}

impl PlaybackState {
    #[must_use]
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            paused: false,
            desired_lag_ms: config.desired_lag_ms,
            speed: config.clamp_speed(1.0),
            queue: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn desired_lag_ms(&self) -> i64 {
        self.desired_lag_ms
    }

    #[must_use]
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Pending frames, oldest first.
    #[must_use]
    pub fn queue(&self) -> &VecDeque<TimePoint> {
        &self.queue
    }

    /// Queued frames projected onto current timeline indices.
    #[must_use]
    pub fn queue_indices(&self, store: &FrameStore) -> Vec<usize> {
        self.queue
            .iter()
            .filter_map(|tp| store.index_of(*tp))
            .collect()
    }

    /// Append frames later than both the last queued and the displayed frame.
    ///
    /// Returns how many were accepted.
    pub fn enqueue(&mut self, new_frames: &[TimePoint], displayed: Option<TimePoint>) -> usize {
        let mut floor = self.queue.back().copied().or(displayed);
        let mut accepted = 0;
        let mut sorted = new_frames.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for tp in sorted {
            if floor.is_none_or(|f| tp > f) {
                self.queue.push_back(tp);
                floor = Some(tp);
                accepted += 1;
            }
        }
        accepted
    }

    /// Drop every queued frame at or before `tp`.
    pub fn drop_through(&mut self, tp: TimePoint) {
        while self.queue.front().is_some_and(|head| *head <= tp) {
            self.queue.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Set the target lag, clamped to `0..=MAX_DESIRED_LAG_MS`.
    pub fn set_desired_lag(&mut self, lag_ms: i64) {
        self.desired_lag_ms = lag_ms.clamp(0, MAX_DESIRED_LAG_MS);
    }

    /// Set the speed factor, clamped to the configured bounds.
    pub fn set_speed(&mut self, speed: f64, config: &PlaybackConfig) {
        self.speed = config.clamp_speed(speed);
    }

    /// Next frame to show and how long the current one stays up.
    ///
    /// `None` while paused, scrubbing or with nothing queued.
    #[must_use]
    pub fn next_frame(
        &self,
        store: &FrameStore,
        config: &PlaybackConfig,
    ) -> Option<(TimePoint, Duration)> {
        if self.paused || store.is_scrubbing() {
            return None;
        }
        let next = *self.queue.front()?;
        let gap = store.displayed_time_point().map(|shown| next - shown);
        Some((next, frame_delay(gap, self.speed, config)))
    }

    /// Show the queue head if it is still `expected`.
    ///
    /// Returns false when the head changed or playback is halted; the caller
    /// re-plans in that case.
    pub fn advance(&mut self, store: &mut FrameStore, expected: TimePoint) -> bool {
        if self.paused || store.is_scrubbing() || self.queue.front() != Some(&expected) {
            return false;
        }
        self.queue.pop_front();
        match store.index_of(expected) {
            Some(index) => {
                store.set_display_index(index);
                true
            }
            None => false,
        }
    }

    /// Adjust speed toward the desired lag behind the live edge.
    pub fn correct_drift(&mut self, store: &FrameStore, config: &PlaybackConfig) -> DriftAction {
        if self.paused || store.is_scrubbing() {
            return DriftAction::Hold;
        }
        let (Some(latest), Some(shown)) = (store.latest(), store.displayed_time_point()) else {
            return DriftAction::Hold;
        };
        let lag = latest.saturating_sub(shown);
        let target = self.desired_lag_ms;

        if lag > target.saturating_add(config.behind_margin_ms) {
            self.speed = (self.speed * config.speed_up_factor).min(config.max_speed);
            DriftAction::SpeedUp(self.speed)
        } else if lag < target.saturating_sub(config.ahead_margin_ms) {
            self.speed = (self.speed * config.slow_down_factor).max(config.min_speed);
            DriftAction::SlowDown(self.speed)
        } else if lag.abs_diff(target) < config.on_target_band_ms.unsigned_abs() {
            self.speed = config.clamp_speed(1.0);
            DriftAction::Reset
        } else {
            DriftAction::Hold
        }
    }
}

/// How long to hold a frame before showing one `gap_ms` later.
#[must_use]
pub fn frame_delay(gap_ms: Option<i64>, speed: f64, config: &PlaybackConfig) -> Duration {
    let min = config.min_frame_ms;
    let millis = match gap_ms {
        Some(gap) if gap > 0 && speed > 0.0 => {
            let scaled = (gap as f64 / speed).round();
            (scaled as u64).clamp(min, config.max_frame_ms)
        }
        _ => min,
    };
    Duration::from_millis(millis)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Scheduler task for one session.
///
/// Holds at most one pending frame deadline. The deadline is kept while the
/// queue head is unchanged, so merges that only append do not push it back.
pub(crate) async fn run<S: FeedSource>(ctx: Arc<SessionContext<S>>) {
    let config = ctx.config().playback.clone();
    let period = config.drift_check_interval();
    let mut drift = tokio::time::interval_at(Instant::now() + period, period);
    drift.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Option<(TimePoint, Instant)> = None;

    debug!(event_id = ctx.event_id(), "Playback scheduler started");
    while ctx.is_current() {
        let next = {
            let state = ctx.state().read().await;
            state.playback.next_frame(&state.store, &config)
        };
        pending = match (next, pending) {
            (Some((head, _)), Some((armed, deadline))) if head == armed => Some((armed, deadline)),
            (Some((head, delay)), _) => {
                trace!(frame = head, delay_ms = delay.as_millis() as u64, "Frame timer armed");
                Some((head, Instant::now() + delay))
            }
            (None, _) => None,
        };

        tokio::select! {
            () = ctx.wake().notified() => {}
            () = wait_until(pending.map(|(_, deadline)| deadline)) => {
                if let Some((frame, _)) = pending.take() {
                    let mut state = ctx.state().write().await;
                    let EngineState { store, playback, .. } = &mut *state;
                    if playback.advance(store, frame) {
                        trace!(frame, "Advanced display");
                    }
                }
            }
            _ = drift.tick() => {
                let mut state = ctx.state().write().await;
                let EngineState { store, playback, .. } = &mut *state;
                let action = playback.correct_drift(store, &config);
                if action != DriftAction::Hold {
                    debug!(?action, speed = playback.speed(), "Drift correction");
                }
            }
        }
    }
    debug!(event_id = ctx.event_id(), "Playback scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Chunk, WindowRecord};

    const BASE: TimePoint = 1_710_000_000_000;

    fn store_with(offsets: &[i64]) -> FrameStore {
        let mut store = FrameStore::new();
        store.merge(Chunk {
            window: offsets
                .iter()
                .map(|o| WindowRecord::new(crate::timestamp::display(BASE + o), "in_game"))
                .collect(),
            ..Chunk::default()
        });
        store
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig::default()
    }

    #[test]
    fn delay_is_gap_over_speed() {
        let cfg = config();
        assert_eq!(frame_delay(Some(2000), 1.0, &cfg), Duration::from_millis(2000));
        assert_eq!(frame_delay(Some(2000), 2.0, &cfg), Duration::from_millis(1000));
        assert_eq!(frame_delay(Some(1000), 0.5, &cfg), Duration::from_millis(2000));
    }

    #[test]
    fn delay_is_clamped() {
        let cfg = config();
        assert_eq!(frame_delay(Some(10), 1.0, &cfg), Duration::from_millis(150));
        assert_eq!(frame_delay(Some(60_000), 1.0, &cfg), Duration::from_millis(4000));
        assert_eq!(frame_delay(Some(0), 1.0, &cfg), Duration::from_millis(150));
        assert_eq!(frame_delay(Some(-500), 1.0, &cfg), Duration::from_millis(150));
        assert_eq!(frame_delay(None, 1.0, &cfg), Duration::from_millis(150));
    }

    #[test]
    fn enqueue_accepts_only_later_frames() {
        let mut playback = PlaybackState::new(&config());
        assert_eq!(playback.enqueue(&[BASE + 2000, BASE + 1000], Some(BASE)), 2);
        assert_eq!(playback.enqueue(&[BASE + 1500, BASE + 2000, BASE + 3000], Some(BASE)), 1);
        assert_eq!(playback.enqueue(&[BASE - 1000], None), 0);
        assert_eq!(
            playback.queue().iter().copied().collect::<Vec<_>>(),
            vec![BASE + 1000, BASE + 2000, BASE + 3000]
        );
    }

    #[test]
    fn next_frame_waits_for_real_gap() {
        let cfg = config();
        let mut store = store_with(&[0]);
        let mut playback = PlaybackState::new(&cfg);
        store.merge(Chunk {
            window: vec![WindowRecord::new(crate::timestamp::display(BASE + 2000), "in_game")],
            ..Chunk::default()
        });
        playback.enqueue(&[BASE + 2000], store.displayed_time_point());

        assert_eq!(
            playback.next_frame(&store, &cfg),
            Some((BASE + 2000, Duration::from_millis(2000)))
        );
        assert!(playback.advance(&mut store, BASE + 2000));
        assert_eq!(store.displayed_time_point(), Some(BASE + 2000));
        assert!(playback.queue().is_empty());
        assert_eq!(playback.next_frame(&store, &cfg), None);
    }

    #[test]
    fn paused_or_scrubbing_halts_pacing() {
        let cfg = config();
        let mut store = store_with(&[0, 1000]);
        store.seek(BASE);
        store.go_live();
        let mut playback = PlaybackState::new(&cfg);
        store.merge(Chunk {
            window: vec![WindowRecord::new(crate::timestamp::display(BASE + 2000), "in_game")],
            ..Chunk::default()
        });
        playback.enqueue(&[BASE + 2000], store.displayed_time_point());

        playback.pause();
        assert_eq!(playback.next_frame(&store, &cfg), None);
        assert!(!playback.advance(&mut store, BASE + 2000));
        assert_eq!(playback.queue().len(), 1);

        playback.resume();
        store.seek(BASE);
        assert_eq!(playback.next_frame(&store, &cfg), None);
    }

    #[test]
    fn advance_rejects_stale_head() {
        let cfg = config();
        let mut store = store_with(&[0, 1000, 2000]);
        let mut playback = PlaybackState::new(&cfg);
        store.seek(BASE);
        store.go_live();
        playback.enqueue(&[BASE + 3000], Some(BASE + 2000));
        assert!(!playback.advance(&mut store, BASE + 1000));
        assert_eq!(playback.queue().len(), 1);
    }

    #[test]
    fn drift_speeds_up_when_far_behind() {
        let cfg = config();
        let mut store = store_with(&[0, 20_000]);
        store.seek(BASE);
        store.go_live();
        store.set_display_index(0);
        let mut playback = PlaybackState::new(&cfg);

        assert_eq!(playback.correct_drift(&store, &cfg), DriftAction::SpeedUp(1.1));
        for _ in 0..20 {
            playback.correct_drift(&store, &cfg);
        }
        assert_eq!(playback.speed(), 2.0);
    }

    #[test]
    fn drift_slows_down_when_too_close() {
        let cfg = config();
        let mut store = store_with(&[0, 5_000]);
        store.set_display_index(0);
        let mut playback = PlaybackState::new(&cfg);

        assert_eq!(playback.correct_drift(&store, &cfg), DriftAction::SlowDown(0.9));
        for _ in 0..20 {
            playback.correct_drift(&store, &cfg);
        }
        assert_eq!(playback.speed(), 0.5);
    }

    #[test]
    fn drift_resets_near_target_and_holds_in_between() {
        let cfg = config();
        let mut playback = PlaybackState::new(&cfg);
        playback.set_speed(1.5, &cfg);

        let mut store = store_with(&[0, 10_500]);
        store.set_display_index(0);
        assert_eq!(playback.correct_drift(&store, &cfg), DriftAction::Reset);
        assert_eq!(playback.speed(), 1.0);

        playback.set_speed(1.5, &cfg);
        let mut store = store_with(&[0, 13_000]);
        store.set_display_index(0);
        assert_eq!(playback.correct_drift(&store, &cfg), DriftAction::Hold);
        assert_eq!(playback.speed(), 1.5);
    }

    #[test]
    fn drift_holds_while_paused() {
        let cfg = config();
        let mut store = store_with(&[0, 60_000]);
        store.set_display_index(0);
        let mut playback = PlaybackState::new(&cfg);
        playback.pause();
        assert_eq!(playback.correct_drift(&store, &cfg), DriftAction::Hold);
        assert_eq!(playback.speed(), 1.0);
    }

    #[test]
    fn speed_and_lag_controls_are_bounded() {
        let cfg = config();
        let mut playback = PlaybackState::new(&cfg);
        playback.set_speed(8.0, &cfg);
        assert_eq!(playback.speed(), 2.0);
        playback.set_speed(0.01, &cfg);
        assert_eq!(playback.speed(), 0.5);
        playback.set_desired_lag(-5);
        assert_eq!(playback.desired_lag_ms(), 0);
        playback.set_desired_lag(i64::MAX);
        assert_eq!(playback.desired_lag_ms(), MAX_DESIRED_LAG_MS);
    }

    #[test]
    fn huge_lag_target_slows_without_overflow() {
        let mut cfg = config();
        cfg.behind_margin_ms = i64::MAX;
        cfg.ahead_margin_ms = i64::MAX;
        let mut store = store_with(&[0, 20_000]);
        store.set_display_index(0);

        let mut playback = PlaybackState::new(&cfg);
        playback.set_desired_lag(i64::MAX);
        // 20 s behind against a one hour target: too close to live.
        assert_eq!(playback.correct_drift(&store, &config()), DriftAction::SlowDown(0.9));

        // Margins at the integer limit saturate instead of wrapping.
        let mut playback = PlaybackState::new(&cfg);
        playback.set_desired_lag(i64::MAX);
        assert_eq!(playback.correct_drift(&store, &cfg), DriftAction::Hold);
        assert_eq!(playback.speed(), 1.0);
    }

    #[test]
    fn drop_through_trims_head() {
        let mut playback = PlaybackState::new(&config());
        playback.enqueue(&[BASE + 1000, BASE + 2000, BASE + 3000], Some(BASE));
        playback.drop_through(BASE + 2000);
        assert_eq!(playback.queue().iter().copied().collect::<Vec<_>>(), vec![BASE + 3000]);
        let store = store_with(&[1000, 2000, 3000]);
        assert_eq!(playback.queue_indices(&store), vec![2]);
    }
}
