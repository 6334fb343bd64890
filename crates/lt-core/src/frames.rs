//! Feed record types.
//!
//! Payloads beyond the timestamp and game state are kept as opaque JSON: the
//! engine only orders and selects records, it never interprets team or
//! participant state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::timestamp::{TimePoint, is_terminal_state, parse_wire};

/// A record carrying a feed timestamp.
pub trait Timestamped {
    /// Raw RFC 3339 timestamp as delivered by the feed.
    fn wire_timestamp(&self) -> &str;

    /// Timestamp converted to epoch milliseconds.
    fn time_point(&self) -> Result<TimePoint> {
        parse_wire(self.wire_timestamp())
    }
}

/// Coarse summary state for one instant (window feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRecord {
    pub rfc460_timestamp: String,
    #[serde(default)]
    pub game_state: String,
    #[serde(default)]
    pub blue_team: Value,
    #[serde(default)]
    pub red_team: Value,
}

impl WindowRecord {
    /// Record with empty team payloads.
    #[must_use]
    pub fn new(rfc460_timestamp: impl Into<String>, game_state: impl Into<String>) -> Self {
        Self {
            rfc460_timestamp: rfc460_timestamp.into(),
            game_state: game_state.into(),
            blue_team: Value::Null,
            red_team: Value::Null,
        }
    }

    /// Whether this record reports that the event has concluded.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        is_terminal_state(&self.game_state)
    }
}

impl Timestamped for WindowRecord {
    fn wire_timestamp(&self) -> &str {
        &self.rfc460_timestamp
    }
}

/// Fine-grained per-participant state for one instant (details feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub rfc460_timestamp: String,
    #[serde(default)]
    pub participants: Vec<Value>,
}

impl DetailRecord {
    #[must_use]
    pub fn new(rfc460_timestamp: impl Into<String>) -> Self {
        Self {
            rfc460_timestamp: rfc460_timestamp.into(),
            participants: Vec::new(),
        }
    }
}

impl Timestamped for DetailRecord {
    fn wire_timestamp(&self) -> &str {
        &self.rfc460_timestamp
    }
}

/// Event-scoped roster and identity mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub patch_version: String,
    #[serde(default)]
    pub blue_team_metadata: Value,
    #[serde(default)]
    pub red_team_metadata: Value,
}

/// Everything one fetch of the feeds returned for a starting time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub window: Vec<WindowRecord>,
    pub details: Vec<DetailRecord>,
    pub metadata: Option<Metadata>,
}

impl Chunk {
    /// True when neither feed returned any record (metadata alone does not count).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty() && self.details.is_empty()
    }
}
