//! Backward history walk.
//!
//! Starting from the earliest known frame, request the preceding chunk
//! over and over until the feed answers with nothing, which marks the start
//! of the event.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::SessionContext;
use crate::source::FeedSource;
use crate::timestamp::{display, round_down, to_wire};

/// Lifecycle of the backfill walk for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    #[default]
    Idle,
    Running,
    /// Reached the first frame of the event.
    Found,
    /// Stopped early; may be started again.
    Cancelled,
}

impl BackfillStatus {
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// Backfill task body. Records the final status on the session.
pub(crate) async fn run<S: FeedSource>(ctx: Arc<SessionContext<S>>) {
    let status = walk(&ctx).await;
    ctx.finish_backfill(status).await;
}

async fn walk<S: FeedSource>(ctx: &SessionContext<S>) -> BackfillStatus {
    let config = &ctx.config().backfill;
    let step = config.step_ms;
    let Some(earliest) = ctx.earliest().await else {
        return BackfillStatus::Cancelled;
    };
    let mut cursor = round_down(earliest, step);
    let mut fetches: u64 = 0;
    info!(
        event_id = ctx.event_id(),
        from = %display(cursor),
        "Backfill walking history"
    );

    loop {
        if !ctx.is_current() {
            return BackfillStatus::Cancelled;
        }
        let anchor = cursor;
        cursor -= step;
        let starting_time = match to_wire(cursor) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(error = %err, cursor, "Backfill cursor out of range");
                return BackfillStatus::Cancelled;
            }
        };

        let result = ctx.source().fetch_chunk(ctx.event_id(), &starting_time).await;
        fetches += 1;
        let chunk = match result {
            Ok(chunk) => chunk,
            Err(err) if !err.is_transient() => {
                warn!(error = %err, starting_time, fetches, "Backfill stopped on permanent error");
                return BackfillStatus::Cancelled;
            }
            Err(err) => {
                debug!(error = %err, starting_time, "Backfill fetch failed; retrying");
                cursor = anchor;
                tokio::time::sleep(config.retry_delay()).await;
                continue;
            }
        };

        if !ctx.is_current() {
            return BackfillStatus::Cancelled;
        }
        if chunk.is_empty() {
            info!(
                event_id = ctx.event_id(),
                first_before = %starting_time,
                fetches,
                "Backfill reached the first frame"
            );
            return BackfillStatus::Found;
        }

        let Some(outcome) = ctx.ingest(chunk).await else {
            return BackfillStatus::Cancelled;
        };
        if outcome.added_earlier {
            if let Some(earliest) = outcome.earliest {
                cursor = round_down(earliest, step);
            }
        }
        debug!(starting_time, added_earlier = outcome.added_earlier, "Backfill chunk merged");
        tokio::time::sleep(config.pacing_delay()).await;
    }
}
