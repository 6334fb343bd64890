//! lt-core: Core library for livetrack
//!
//! Follows one live event through two timestamped feeds (a coarse "window"
//! feed and a per-participant "details" feed), merges them into a single
//! ordered timeline, walks history backward to the first frame, and plays
//! new frames at a paced speed that trails the live edge.
//!
//! # Architecture
//!
//! ```text
//! FeedSource ──► Live Poll ──┐
//!      │                     ├──► FrameStore (merge) ──► Play Queue ──► Scheduler
//!      └──────► Backfill ────┘                                  │
//!                                                        TimelineView
//! ```
//!
//! # Modules
//!
//! - `timestamp`: TimePoint helpers, wire format, nearest-index search
//! - `frames`: Window/detail/metadata record types
//! - `store`: Merged timeline and its pointers
//! - `source`: Feed boundary trait plus an in-memory feed
//! - `http`: reqwest-backed live stats client
//! - `backfill`: Backward history walk
//! - `poll`: Live polling with terminal-state backoff
//! - `playback`: Paced playback and drift correction
//! - `session`: Per-event shared state
//! - `engine`: Lifecycle and controls
//! - `view`: Consumer snapshot
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod backfill;
pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod http;
pub mod logging;
pub mod playback;
pub mod poll;
pub mod session;
pub mod source;
pub mod store;
pub mod timestamp;
pub mod view;

pub use backfill::BackfillStatus;
pub use config::EngineConfig;
pub use engine::TimelineEngine;
pub use error::{Error, Result};
pub use frames::{Chunk, DetailRecord, Metadata, WindowRecord};
pub use http::LiveStatsClient;
pub use source::{FeedSource, MemoryFeed};
pub use timestamp::TimePoint;
pub use view::TimelineView;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
