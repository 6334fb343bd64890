//! Per-event session state shared by the poll, backfill and scheduler tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backfill::{self, BackfillStatus};
use crate::config::EngineConfig;
use crate::frames::Chunk;
use crate::playback::PlaybackState;
use crate::source::FeedSource;
use crate::store::{FrameStore, MergeOutcome};
use crate::timestamp::TimePoint;
use crate::view::TimelineView;

/// Everything one tracked event owns, guarded by a single lock.
#[derive(Debug)]
pub struct EngineState {
    pub store: FrameStore,
    pub playback: PlaybackState,
    pub backfill: BackfillStatus,
}

impl EngineState {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: FrameStore::new(),
            playback: PlaybackState::new(&config.playback),
            backfill: BackfillStatus::Idle,
        }
    }

    /// Merge a chunk and queue its new live frames for playback.
    pub fn apply_chunk(&mut self, chunk: Chunk) -> MergeOutcome {
        let outcome = self.store.merge(chunk);
        if outcome.changed && !outcome.new_timestamps.is_empty() && !self.store.is_scrubbing() {
            let displayed = self.store.displayed_time_point();
            self.playback.enqueue(&outcome.new_timestamps, displayed);
        }
        outcome
    }

    /// Return to the live edge and resume paced playback from there.
    pub fn go_live(&mut self) {
        self.store.go_live();
        self.playback.resume();
        if let Some(shown) = self.store.displayed_time_point() {
            self.playback.drop_through(shown);
        }
    }

    /// Scrub to the frame nearest `target`; returns its time point.
    pub fn seek(&mut self, target: TimePoint) -> Option<TimePoint> {
        let index = self.store.seek(target)?;
        self.playback.clear();
        self.store.time_point_at(index)
    }

    /// Read-only projection for consumers.
    #[must_use]
    pub fn view(&self, event_id: &str) -> TimelineView {
        TimelineView::from_state(event_id, self)
    }
}

/// Shared context of one tracked event.
///
/// The generation number ties the context to the engine's current session;
/// once the engine moves on, every task sees `is_current() == false` and
/// results still in flight are dropped before they reach the store.
#[derive(Debug)]
pub struct SessionContext<S> {
    event_id: String,
    generation: u64,
    current_generation: Arc<AtomicU64>,
    config: EngineConfig,
    source: Arc<S>,
    state: Arc<RwLock<EngineState>>,
    wake: Notify,
    backfill_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FeedSource> SessionContext<S> {
    /// Context bound to the generation currently stored in `current_generation`.
    pub fn new(
        event_id: impl Into<String>,
        config: EngineConfig,
        source: Arc<S>,
        current_generation: Arc<AtomicU64>,
    ) -> Self {
        let generation = current_generation.load(Ordering::SeqCst);
        let state = EngineState::new(&config);
        Self {
            event_id: event_id.into(),
            generation,
            current_generation,
            config,
            source,
            state: Arc::new(RwLock::new(state)),
            wake: Notify::new(),
            backfill_task: Mutex::new(None),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn state(&self) -> &Arc<RwLock<EngineState>> {
        &self.state
    }

    /// Scheduler wake-up signal.
    pub fn wake(&self) -> &Notify {
        &self.wake
    }

    pub fn is_current(&self) -> bool {
        self.current_generation.load(Ordering::SeqCst) == self.generation
    }

    /// Advance the shared generation past this session (no-op if already
    /// superseded).
    pub fn retire(&self) {
        let _ = self.current_generation.compare_exchange(
            self.generation,
            self.generation + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Merge a fetched chunk unless the session has been superseded.
    pub async fn ingest(&self, chunk: Chunk) -> Option<MergeOutcome> {
        if !self.is_current() {
            debug!(event_id = %self.event_id, "Dropping chunk for stale session");
            return None;
        }
        let mut state = self.state.write().await;
        if !self.is_current() {
            return None;
        }
        let before = state.playback.queue().len();
        let outcome = state.apply_chunk(chunk);
        let queued = state.playback.queue().len() > before;
        drop(state);
        if queued {
            self.wake.notify_one();
        }
        Some(outcome)
    }

    /// Apply a control under the lock and wake the scheduler.
    pub async fn update<R>(&self, f: impl FnOnce(&mut EngineState, &EngineConfig) -> R) -> R {
        let mut state = self.state.write().await;
        let result = f(&mut state, &self.config);
        drop(state);
        self.wake.notify_one();
        result
    }

    pub async fn earliest(&self) -> Option<TimePoint> {
        self.state.read().await.store.earliest()
    }

    pub async fn is_final(&self) -> bool {
        self.state.read().await.store.is_final()
    }

    pub async fn reset_final(&self) {
        self.state.write().await.store.reset_final();
    }

    /// Spawn the backfill walk if the store calls for one and none is running.
    pub async fn maybe_start_backfill(self: &Arc<Self>) {
        if !self.config.backfill.enabled || !self.is_current() {
            return;
        }
        {
            let mut state = self.state.write().await;
            if state.store.is_empty() || state.store.has_first_frame() {
                return;
            }
            if !matches!(state.backfill, BackfillStatus::Idle | BackfillStatus::Cancelled) {
                return;
            }
            state.backfill = BackfillStatus::Running;
        }
        info!(event_id = %self.event_id, "Starting backfill");
        let handle = tokio::spawn(backfill::run(Arc::clone(self)));
        let previous = self
            .backfill_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Record how the backfill walk ended.
    pub async fn finish_backfill(&self, status: BackfillStatus) {
        let mut state = self.state.write().await;
        if status == BackfillStatus::Found {
            state.store.mark_first_frame();
        }
        state.backfill = status;
    }

    /// Abort a running backfill task, if any.
    pub fn abort_backfill(&self) {
        let handle = self
            .backfill_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub async fn view(&self) -> TimelineView {
        self.state.read().await.view(&self.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::WindowRecord;
    use crate::source::MemoryFeed;
    use crate::timestamp::display;

    const BASE: TimePoint = 1_710_000_000_000;

    fn chunk(offsets: &[i64]) -> Chunk {
        Chunk {
            window: offsets
                .iter()
                .map(|o| WindowRecord::new(display(BASE + o), "in_game"))
                .collect(),
            ..Chunk::default()
        }
    }

    fn context() -> SessionContext<MemoryFeed> {
        SessionContext::new(
            "game",
            EngineConfig::default(),
            Arc::new(MemoryFeed::new()),
            Arc::new(AtomicU64::new(7)),
        )
    }

    #[test]
    fn apply_chunk_queues_only_live_frames() {
        let mut state = EngineState::new(&EngineConfig::default());
        state.apply_chunk(chunk(&[10_000, 11_000]));
        assert!(state.playback.queue().is_empty());

        state.apply_chunk(chunk(&[12_000, 13_000]));
        assert_eq!(state.playback.queue().len(), 2);

        state.apply_chunk(chunk(&[0, 1000]));
        assert_eq!(state.playback.queue().len(), 2);
    }

    #[test]
    fn scrubbing_suppresses_queueing() {
        let mut state = EngineState::new(&EngineConfig::default());
        state.apply_chunk(chunk(&[0, 1000]));
        assert_eq!(state.seek(BASE + 100), Some(BASE));
        state.apply_chunk(chunk(&[2000]));
        assert!(state.playback.queue().is_empty());
    }

    #[test]
    fn go_live_unpauses_and_drops_stale_queue() {
        let mut state = EngineState::new(&EngineConfig::default());
        state.apply_chunk(chunk(&[0]));
        state.apply_chunk(chunk(&[1000, 2000]));
        state.playback.pause();
        assert_eq!(state.playback.queue().len(), 2);

        state.go_live();
        assert!(!state.playback.is_paused());
        assert!(state.playback.queue().is_empty());
        assert_eq!(state.store.displayed_time_point(), Some(BASE + 2000));
    }

    #[tokio::test]
    async fn retired_session_drops_chunks() {
        let ctx = context();
        assert!(ctx.is_current());
        assert!(ctx.ingest(chunk(&[0])).await.is_some());

        ctx.retire();
        assert!(!ctx.is_current());
        assert!(ctx.ingest(chunk(&[1000])).await.is_none());
        assert_eq!(ctx.view().await.timeline, vec![BASE]);
    }

    #[tokio::test]
    async fn retire_does_not_clobber_newer_generation() {
        let ctx = context();
        ctx.current_generation.store(42, Ordering::SeqCst);
        ctx.retire();
        assert_eq!(ctx.current_generation.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn backfill_needs_frames() {
        let ctx = Arc::new(context());
        ctx.maybe_start_backfill().await;
        assert_eq!(ctx.view().await.backfill, BackfillStatus::Idle);
    }

    #[tokio::test]
    async fn backfill_disabled_by_config() {
        let mut config = EngineConfig::default();
        config.backfill.enabled = false;
        let ctx = Arc::new(SessionContext::new(
            "game",
            config,
            Arc::new(MemoryFeed::new()),
            Arc::new(AtomicU64::new(0)),
        ));
        ctx.ingest(chunk(&[0])).await;
        ctx.maybe_start_backfill().await;
        assert_eq!(ctx.view().await.backfill, BackfillStatus::Idle);
    }
}
