//! Frame store: the merged, ordered timeline of one tracked event.
//!
//! Window and detail records are keyed independently by [`TimePoint`]; the
//! timeline is the sorted union of both key sets. All mutation goes through
//! [`FrameStore::merge`] plus a handful of pointer operations used by the
//! playback controls.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::frames::{Chunk, DetailRecord, Metadata, Timestamped, WindowRecord};
use crate::timestamp::{TimePoint, nearest_index};

/// What a merge did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Any record, timestamp or metadata actually changed.
    pub changed: bool,
    /// The earliest time point moved earlier (or the timeline was empty).
    pub added_earlier: bool,
    /// The latest time point moved later (or the timeline was empty).
    pub added_later: bool,
    /// The timeline is non-empty after the merge.
    pub has_frames: bool,
    /// Newly seen time points after the previous latest, ascending.
    pub new_timestamps: Vec<TimePoint>,
    /// Earliest time point after the merge.
    pub earliest: Option<TimePoint>,
    /// Latest time point after the merge.
    pub latest: Option<TimePoint>,
}

/// Owner of all records, the timeline and its pointers for one event.
#[derive(Debug, Default)]
pub struct FrameStore {
    window: HashMap<TimePoint, WindowRecord>,
    details: HashMap<TimePoint, DetailRecord>,
    timeline: Vec<TimePoint>,
    metadata: Option<Metadata>,
    scrub_index: Option<usize>,
    display_index: Option<usize>,
    is_final: bool,
    has_first_frame: bool,
}

impl FrameStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fetched chunk.
    ///
    /// Records overwrite earlier ones at the same time point (last write
    /// wins), metadata is captured only if none is held yet, and a terminal
    /// game state in any incoming window record latches the final flag.
    /// Records with unparseable timestamps are skipped. A chunk with no
    /// records and no capturable metadata leaves the store untouched.
    pub fn merge(&mut self, chunk: Chunk) -> MergeOutcome {
        let Chunk {
            window,
            details,
            metadata,
        } = chunk;

        let has_payload = !window.is_empty() || !details.is_empty();
        let takes_metadata = metadata.is_some() && self.metadata.is_none();
        if !has_payload && !takes_metadata {
            return self.unchanged_outcome();
        }

        let prev_earliest = self.earliest();
        let prev_latest = self.latest();
        let prev_scrub_ts = self.scrub_index.and_then(|i| self.timeline.get(i).copied());
        let prev_display_ts = self.display_index.and_then(|i| self.timeline.get(i).copied());

        let mut changed = false;
        let mut saw_terminal = false;
        let mut new_later = BTreeSet::new();

        for record in window {
            let Some(tp) = checked_time_point(&record) else {
                continue;
            };
            saw_terminal |= record.is_terminal();
            self.note_new(tp, prev_latest, &mut new_later);
            changed |= self.insert_time_point(tp);
            if self.window.insert(tp, record.clone()).as_ref() != Some(&record) {
                changed = true;
            }
        }

        for record in details {
            let Some(tp) = checked_time_point(&record) else {
                continue;
            };
            self.note_new(tp, prev_latest, &mut new_later);
            changed |= self.insert_time_point(tp);
            if self.details.insert(tp, record.clone()).as_ref() != Some(&record) {
                changed = true;
            }
        }

        if takes_metadata {
            self.metadata = metadata;
            changed = true;
        }

        self.scrub_index = prev_scrub_ts.and_then(|ts| self.index_of(ts));
        self.display_index = match prev_display_ts {
            Some(ts) => self.index_of(ts),
            None => self.display_index,
        };
        if self.display_index.is_none() && self.scrub_index.is_none() {
            self.display_index = self.live_index();
        }

        if saw_terminal && !self.is_final {
            debug!("Terminal game state observed; latching final flag");
            self.is_final = true;
            changed = true;
        }

        let earliest = self.earliest();
        let latest = self.latest();
        MergeOutcome {
            changed,
            added_earlier: earliest.is_some()
                && prev_earliest.is_none_or(|prev| earliest < Some(prev)),
            added_later: latest.is_some() && prev_latest.is_none_or(|prev| latest > Some(prev)),
            has_frames: !self.timeline.is_empty(),
            new_timestamps: new_later.into_iter().collect(),
            earliest,
            latest,
        }
    }

    fn unchanged_outcome(&self) -> MergeOutcome {
        MergeOutcome {
            has_frames: !self.timeline.is_empty(),
            earliest: self.earliest(),
            latest: self.latest(),
            ..MergeOutcome::default()
        }
    }

    /// Record `tp` as newly later when neither feed held it before.
    fn note_new(
        &self,
        tp: TimePoint,
        prev_latest: Option<TimePoint>,
        new_later: &mut BTreeSet<TimePoint>,
    ) {
        let unseen = !self.window.contains_key(&tp) && !self.details.contains_key(&tp);
        if unseen && prev_latest.is_none_or(|latest| tp > latest) {
            new_later.insert(tp);
        }
    }

    /// Insert into the sorted timeline; returns true when `tp` was new.
    fn insert_time_point(&mut self, tp: TimePoint) -> bool {
        match self.timeline.binary_search(&tp) {
            Ok(_) => false,
            Err(pos) => {
                self.timeline.insert(pos, tp);
                true
            }
        }
    }

    /// Sorted, deduplicated time points.
    #[must_use]
    pub fn timeline(&self) -> &[TimePoint] {
        &self.timeline
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    #[must_use]
    pub fn earliest(&self) -> Option<TimePoint> {
        self.timeline.first().copied()
    }

    #[must_use]
    pub fn latest(&self) -> Option<TimePoint> {
        self.timeline.last().copied()
    }

    #[must_use]
    pub fn index_of(&self, tp: TimePoint) -> Option<usize> {
        self.timeline.binary_search(&tp).ok()
    }

    #[must_use]
    pub fn time_point_at(&self, index: usize) -> Option<TimePoint> {
        self.timeline.get(index).copied()
    }

    /// Index of the most recent time point.
    #[must_use]
    pub fn live_index(&self) -> Option<usize> {
        self.timeline.len().checked_sub(1)
    }

    #[must_use]
    pub fn scrub_index(&self) -> Option<usize> {
        self.scrub_index
    }

    #[must_use]
    pub fn is_scrubbing(&self) -> bool {
        self.scrub_index.is_some()
    }

    #[must_use]
    pub fn display_index(&self) -> Option<usize> {
        self.display_index
    }

    #[must_use]
    pub fn displayed_time_point(&self) -> Option<TimePoint> {
        self.display_index.and_then(|i| self.time_point_at(i))
    }

    /// Move the display pointer; out-of-range indices are ignored.
    pub fn set_display_index(&mut self, index: usize) {
        if index < self.timeline.len() {
            self.display_index = Some(index);
        }
    }

    /// Enter scrub mode at the time point nearest `target`.
    ///
    /// Returns the selected index, or `None` when the timeline is empty.
    pub fn seek(&mut self, target: TimePoint) -> Option<usize> {
        let index = nearest_index(&self.timeline, target)?;
        self.scrub_index = Some(index);
        self.display_index = Some(index);
        Some(index)
    }

    /// Leave scrub mode and jump the display pointer to the live edge.
    pub fn go_live(&mut self) {
        self.scrub_index = None;
        self.display_index = self.live_index();
    }

    /// Index exposed to consumers: scrub, else display, else live.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.scrub_index
            .or(self.display_index)
            .or_else(|| self.live_index())
    }

    #[must_use]
    pub fn current_time_point(&self) -> Option<TimePoint> {
        self.current_index().and_then(|i| self.time_point_at(i))
    }

    #[must_use]
    pub fn window_at(&self, tp: TimePoint) -> Option<&WindowRecord> {
        self.window.get(&tp)
    }

    #[must_use]
    pub fn details_at(&self, tp: TimePoint) -> Option<&DetailRecord> {
        self.details.get(&tp)
    }

    #[must_use]
    pub fn current_window(&self) -> Option<&WindowRecord> {
        self.current_time_point().and_then(|tp| self.window_at(tp))
    }

    /// Detail record for the current index, falling back to the immediately
    /// preceding time point and then the immediately following one.
    #[must_use]
    pub fn current_details(&self) -> Option<&DetailRecord> {
        let index = self.current_index()?;
        let exact = self.time_point_at(index).and_then(|tp| self.details_at(tp));
        exact
            .or_else(|| {
                index
                    .checked_sub(1)
                    .and_then(|i| self.time_point_at(i))
                    .and_then(|tp| self.details_at(tp))
            })
            .or_else(|| {
                self.time_point_at(index + 1)
                    .and_then(|tp| self.details_at(tp))
            })
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Whether a terminal game state has been seen since the last reset.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Clear the final flag (terminal backoff expiry only).
    pub fn reset_final(&mut self) {
        self.is_final = false;
    }

    /// Whether backfill has reached the start of the event.
    #[must_use]
    pub fn has_first_frame(&self) -> bool {
        self.has_first_frame
    }

    pub fn mark_first_frame(&mut self) {
        self.has_first_frame = true;
    }
}

fn checked_time_point<R: Timestamped>(record: &R) -> Option<TimePoint> {
    match record.time_point() {
        Ok(tp) => Some(tp),
        Err(err) => {
            warn!(error = %err, "Skipping record with malformed timestamp");
            None
        }
    }
}
