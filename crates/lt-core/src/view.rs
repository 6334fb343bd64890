//! Read-only projection of a session for consumers.

use serde::Serialize;

use crate::backfill::BackfillStatus;
use crate::frames::{DetailRecord, Metadata, WindowRecord};
use crate::session::EngineState;
use crate::timestamp::TimePoint;

/// Snapshot of everything a consumer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineView {
    /// Tracked event, `None` when nothing is tracked.
    pub event_id: Option<String>,
    pub window: Option<WindowRecord>,
    /// Details for the current frame, or its nearest neighbour.
    pub details: Option<DetailRecord>,
    pub metadata: Option<Metadata>,
    pub timeline: Vec<TimePoint>,
    pub has_first_frame: bool,
    pub is_backfilling: bool,
    pub backfill: BackfillStatus,
    /// Not scrubbing.
    pub is_live: bool,
    pub is_final: bool,
    pub is_paused: bool,
    pub desired_lag_ms: i64,
    pub speed: f64,
    pub displayed: Option<TimePoint>,
    /// Scrub selection; `None` in live mode.
    pub selected: Option<TimePoint>,
    /// Scrub, else displayed, else live.
    pub current: Option<TimePoint>,
    pub live: Option<TimePoint>,
    pub queued: usize,
}

impl TimelineView {
    /// View of an engine with no tracked event.
    #[must_use]
    pub fn empty(desired_lag_ms: i64) -> Self {
        Self {
            event_id: None,
            window: None,
            details: None,
            metadata: None,
            timeline: Vec::new(),
            has_first_frame: false,
            is_backfilling: false,
            backfill: BackfillStatus::Idle,
            is_live: true,
            is_final: false,
            is_paused: false,
            desired_lag_ms,
            speed: 1.0,
            displayed: None,
            selected: None,
            current: None,
            live: None,
            queued: 0,
        }
    }

    pub(crate) fn from_state(event_id: &str, state: &EngineState) -> Self {
        let store = &state.store;
        let playback = &state.playback;
        Self {
            event_id: Some(event_id.to_string()),
            window: store.current_window().cloned(),
            details: store.current_details().cloned(),
            metadata: store.metadata().cloned(),
            timeline: store.timeline().to_vec(),
            has_first_frame: store.has_first_frame(),
            is_backfilling: state.backfill.is_running(),
            backfill: state.backfill,
            is_live: !store.is_scrubbing(),
            is_final: store.is_final(),
            is_paused: playback.is_paused(),
            desired_lag_ms: playback.desired_lag_ms(),
            speed: playback.speed(),
            displayed: store.displayed_time_point(),
            selected: store.scrub_index().and_then(|i| store.time_point_at(i)),
            current: store.current_time_point(),
            live: store.latest(),
            queued: playback.queue().len(),
        }
    }

    /// Distance between the live edge and the displayed frame.
    #[must_use]
    pub fn lag_ms(&self) -> Option<i64> {
        Some(self.live? - self.displayed?)
    }
}
