//! Upstream feed boundary.
//!
//! [`FeedSource`] is the only way the engine reaches the network. The HTTP
//! implementation lives in [`crate::http`]; [`MemoryFeed`] serves a recorded
//! history from memory and doubles as the test harness for the controllers.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::frames::{Chunk, DetailRecord, Metadata, Timestamped, WindowRecord};
use crate::timestamp::{CHUNK_WIDTH_MS, TimePoint, parse_wire, round_down};
use crate::{Error, Result};

/// Boxed future used by feed implementations.
pub type FeedFuture<'a> = Pin<Box<dyn Future<Output = Result<Chunk>> + Send + 'a>>;

/// Source of feed chunks for one event at a time.
pub trait FeedSource: Send + Sync + 'static {
    /// Future returned by [`FeedSource::fetch_chunk`].
    type Fut<'a>: Future<Output = Result<Chunk>> + Send + 'a
    where
        Self: 'a;

    /// Fetch the chunk of both feeds beginning at `starting_time`
    /// (ISO 8601, `.000Z`).
    fn fetch_chunk<'a>(&'a self, event_id: &'a str, starting_time: &'a str) -> Self::Fut<'a>;
}

#[derive(Debug, Default)]
struct MemoryFeedInner {
    window: BTreeMap<TimePoint, WindowRecord>,
    details: BTreeMap<TimePoint, DetailRecord>,
    metadata: Option<Metadata>,
    pending_failures: u32,
    closed: bool,
    fetches: Vec<TimePoint>,
}

/// In-memory feed serving a fixed-width window of a recorded history.
///
/// A request whose starting time lies after the newest record is answered
/// with the chunk that contains the newest record, the way a live feed
/// answers requests near its edge.
#[derive(Debug)]
pub struct MemoryFeed {
    inner: Mutex<MemoryFeedInner>,
    chunk_width_ms: i64,
    latency: Duration,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFeed {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryFeedInner::default()),
            chunk_width_ms: CHUNK_WIDTH_MS,
            latency: Duration::ZERO,
        }
    }

    /// Delay every response by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryFeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a window record.
    pub fn push_window(&self, record: WindowRecord) -> Result<()> {
        let tp = record.time_point()?;
        self.lock().window.insert(tp, record);
        Ok(())
    }

    /// Add (or replace) a detail record.
    pub fn push_details(&self, record: DetailRecord) -> Result<()> {
        let tp = record.time_point()?;
        self.lock().details.insert(tp, record);
        Ok(())
    }

    pub fn set_metadata(&self, metadata: Metadata) {
        self.lock().metadata = Some(metadata);
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next(&self, count: u32) {
        self.lock().pending_failures = count;
    }

    /// Reject every later fetch with a non-transient error.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Starting times of every fetch served so far, failed ones included.
    #[must_use]
    pub fn fetches(&self) -> Vec<TimePoint> {
        self.lock().fetches.clone()
    }

    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches.len()
    }

    fn serve(&self, starting_time: &str) -> Result<Chunk> {
        let start = parse_wire(starting_time)?;
        let mut inner = self.lock();
        inner.fetches.push(start);

        if inner.closed {
            return Err(Error::Runtime("feed closed".into()));
        }
        if inner.pending_failures > 0 {
            inner.pending_failures -= 1;
            return Err(Error::Fetch(format!(
                "injected failure for startingTime={starting_time}"
            )));
        }

        let newest = inner
            .window
            .keys()
            .next_back()
            .copied()
            .max(inner.details.keys().next_back().copied());
        let from = match newest {
            Some(newest) if start > newest => round_down(newest, self.chunk_width_ms),
            _ => start,
        };
        let to = from + self.chunk_width_ms;

        Ok(Chunk {
            window: inner.window.range(from..to).map(|(_, r)| r.clone()).collect(),
            details: inner.details.range(from..to).map(|(_, r)| r.clone()).collect(),
            metadata: inner.metadata.clone(),
        })
    }
}

impl FeedSource for MemoryFeed {
    type Fut<'a> = FeedFuture<'a>;

    fn fetch_chunk<'a>(&'a self, _event_id: &'a str, starting_time: &'a str) -> Self::Fut<'a> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.serve(starting_time)
        })
    }
}
