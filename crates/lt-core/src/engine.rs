//! Engine lifecycle: one tracked event at a time.
//!
//! [`TimelineEngine::track`] starts a session (poll task + scheduler task;
//! the backfill task is started by polling once frames exist). Tracking a
//! different event, calling [`TimelineEngine::teardown`] or dropping the
//! engine aborts every task of the old session and discards its state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::session::SessionContext;
use crate::source::FeedSource;
use crate::timestamp::TimePoint;
use crate::view::TimelineView;
use crate::{Error, Result, playback, poll};

struct Session<S: FeedSource> {
    ctx: Arc<SessionContext<S>>,
    poll_task: JoinHandle<()>,
    scheduler_task: JoinHandle<()>,
}

impl<S: FeedSource> Drop for Session<S> {
    fn drop(&mut self) {
        self.ctx.retire();
        self.poll_task.abort();
        self.scheduler_task.abort();
        self.ctx.abort_backfill();
        info!(event_id = self.ctx.event_id(), "Session torn down");
    }
}

/// Frame timeline engine over a feed source.
pub struct TimelineEngine<S: FeedSource> {
    config: EngineConfig,
    source: Arc<S>,
    generation: Arc<AtomicU64>,
    session: Option<Session<S>>,
}

impl<S: FeedSource> TimelineEngine<S> {
    /// Create an idle engine. The configuration is validated here.
    pub fn new(source: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            generation: Arc::new(AtomicU64::new(0)),
            session: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Currently tracked event.
    pub fn event_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.ctx.event_id())
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_some()
    }

    /// Start tracking `event_id`, tearing down any previous session.
    ///
    /// Tracking the event that is already tracked is a no-op. Must be called
    /// from within a tokio runtime.
    pub fn track(&mut self, event_id: impl Into<String>) -> Result<()> {
        let event_id = event_id.into();
        if event_id.trim().is_empty() {
            return Err(Error::Config("event id must not be empty".into()));
        }
        if self.event_id() == Some(event_id.as_str()) {
            return Ok(());
        }
        let handle = Handle::try_current()
            .map_err(|err| Error::Runtime(format!("tracking requires a tokio runtime: {err}")))?;

        self.teardown();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let ctx = Arc::new(SessionContext::new(
            event_id,
            self.config.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.generation),
        ));
        info!(event_id = ctx.event_id(), "Tracking event");

        let poll_task = handle.spawn(poll::run(Arc::clone(&ctx)));
        let scheduler_task = handle.spawn(playback::run(Arc::clone(&ctx)));
        self.session = Some(Session {
            ctx,
            poll_task,
            scheduler_task,
        });
        Ok(())
    }

    /// Stop tracking. Returns whether a session was running.
    pub fn teardown(&mut self) -> bool {
        self.session.take().is_some()
    }

    fn ctx(&self) -> Option<&Arc<SessionContext<S>>> {
        self.session.as_ref().map(|s| &s.ctx)
    }

    /// Snapshot for consumers.
    pub async fn view(&self) -> TimelineView {
        match self.ctx() {
            Some(ctx) => ctx.view().await,
            None => TimelineView::empty(self.config.playback.desired_lag_ms),
        }
    }

    /// Hold the displayed frame; queued frames are kept.
    pub async fn pause(&self) {
        if let Some(ctx) = self.ctx() {
            ctx.update(|state, _| state.playback.pause()).await;
        }
    }

    pub async fn resume(&self) {
        if let Some(ctx) = self.ctx() {
            ctx.update(|state, _| state.playback.resume()).await;
        }
    }

    /// Leave scrub mode and jump to the live edge.
    pub async fn go_live(&self) {
        if let Some(ctx) = self.ctx() {
            ctx.update(|state, _| state.go_live()).await;
        }
    }

    /// Scrub to the frame nearest `target`. Returns the selected time point,
    /// `None` when nothing is tracked or the timeline is empty.
    pub async fn seek(&self, target: TimePoint) -> Option<TimePoint> {
        let ctx = self.ctx()?;
        ctx.update(|state, _| state.seek(target)).await
    }

    pub async fn set_desired_lag(&self, lag_ms: i64) {
        if let Some(ctx) = self.ctx() {
            ctx.update(|state, _| state.playback.set_desired_lag(lag_ms))
                .await;
        }
    }

    /// Set the speed factor (clamped to the configured bounds).
    pub async fn set_speed(&self, speed: f64) {
        if let Some(ctx) = self.ctx() {
            ctx.update(|state, config| state.playback.set_speed(speed, &config.playback))
                .await;
        }
    }
}
