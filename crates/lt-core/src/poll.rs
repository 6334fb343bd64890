//! Live edge polling with terminal-state backoff.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::SessionContext;
use crate::source::FeedSource;
use crate::timestamp::{live_starting_time, now_millis};

/// Poll task for one session.
///
/// Fetches immediately, then on every tick. Once a terminal game state has
/// been merged, polling stops for the backoff period; afterwards the final
/// flag is cleared and a fetch happens right away.
pub(crate) async fn run<S: FeedSource>(ctx: Arc<SessionContext<S>>) {
    let poll = ctx.config().poll.clone();
    let mut ticker = tokio::time::interval(poll.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        event_id = ctx.event_id(),
        interval_ms = poll.interval_ms,
        "Live polling started"
    );

    loop {
        ticker.tick().await;
        if !ctx.is_current() {
            break;
        }
        poll_once(&ctx).await;

        if ctx.is_final().await {
            info!(
                event_id = ctx.event_id(),
                backoff_ms = poll.final_backoff_ms,
                "Terminal game state; suspending live polling"
            );
            tokio::time::sleep(poll.final_backoff()).await;
            if !ctx.is_current() {
                break;
            }
            ctx.reset_final().await;
            info!(event_id = ctx.event_id(), "Terminal backoff expired; resuming live polling");
            ticker.reset_immediately();
        }
    }
    debug!(event_id = ctx.event_id(), "Live polling stopped");
}

/// One live fetch and merge. Failures are logged and skipped; the next tick
/// tries again either way.
pub(crate) async fn poll_once<S: FeedSource>(ctx: &Arc<SessionContext<S>>) {
    let starting_time = match live_starting_time(now_millis(), ctx.config().poll.live_offset_ms) {
        Ok(wire) => wire,
        Err(err) => {
            warn!(error = %err, "Cannot compute live starting time");
            return;
        }
    };

    let chunk = match ctx.source().fetch_chunk(ctx.event_id(), &starting_time).await {
        Ok(chunk) => chunk,
        Err(err) if err.is_transient() => {
            debug!(error = %err, starting_time, "Live poll failed");
            return;
        }
        Err(err) => {
            warn!(error = %err, starting_time, "Live poll failed with a non-transient error");
            return;
        }
    };

    let Some(outcome) = ctx.ingest(chunk).await else {
        return;
    };
    if outcome.changed {
        debug!(
            starting_time,
            new_frames = outcome.new_timestamps.len(),
            latest = ?outcome.latest,
            "Live chunk merged"
        );
    }
    if outcome.has_frames {
        ctx.maybe_start_backfill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::frames::WindowRecord;
    use crate::source::MemoryFeed;
    use crate::timestamp::{TimePoint, display};

    const BASE: TimePoint = 1_710_000_000_000;

    fn live_only() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.backfill.enabled = false;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn poll_once_merges_live_chunk() {
        let feed = Arc::new(MemoryFeed::new());
        feed.push_window(WindowRecord::new(display(BASE), "in_game"))
            .unwrap();
        let ctx = Arc::new(SessionContext::new(
            "game",
            live_only(),
            Arc::clone(&feed),
            Arc::new(AtomicU64::new(0)),
        ));

        poll_once(&ctx).await;
        assert_eq!(ctx.view().await.timeline, vec![BASE]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_skipped() {
        let feed = Arc::new(MemoryFeed::new());
        feed.push_window(WindowRecord::new(display(BASE), "in_game"))
            .unwrap();
        feed.fail_next(1);
        let ctx = Arc::new(SessionContext::new(
            "game",
            live_only(),
            Arc::clone(&feed),
            Arc::new(AtomicU64::new(0)),
        ));

        let task = tokio::spawn(run(Arc::clone(&ctx)));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(ctx.view().await.timeline.is_empty());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ctx.view().await.timeline, vec![BASE]);
        assert_eq!(feed.fetch_count(), 2);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_feed_keeps_polling() {
        let feed = Arc::new(MemoryFeed::new());
        feed.push_window(WindowRecord::new(display(BASE), "in_game"))
            .unwrap();
        feed.close();
        let ctx = Arc::new(SessionContext::new(
            "game",
            live_only(),
            Arc::clone(&feed),
            Arc::new(AtomicU64::new(0)),
        ));

        let task = tokio::spawn(run(Arc::clone(&ctx)));
        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert!(ctx.view().await.timeline.is_empty());
        // t = 0, 500, 1000
        assert_eq!(feed.fetch_count(), 3);
        task.abort();
    }
}
