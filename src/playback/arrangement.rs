//! The playback arrangement builder: accumulates clip placements, then
//! derives a time-sorted list of start/stop events from them.

use crate::clip::ClipId;
use crate::error::{EngineError, EngineResult};

/// A request to play a half-open slice `[start, end)` of `clip_id`'s
/// samples, starting at transport-time `playback_start`. `prev_active`/
/// `next_active` form an intrusive doubly-linked list used only while
/// this placement is part of the mixer's active list.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClip {
    pub clip_id: ClipId,
    pub start: usize,
    pub end: usize,
    pub playback_start: i64,
    pub prev_active: Option<usize>,
    pub next_active: Option<usize>,
}

impl PlaybackClip {
    fn new(clip_id: ClipId, start: usize, end: usize, playback_start: i64) -> Self {
        Self {
            clip_id,
            start,
            end,
            playback_start,
            prev_active: None,
            next_active: None,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
}

impl EventKind {
    /// Secondary sort key: a start and a stop at the same `sample_index`
    /// must order the start first.
    fn rank(self) -> u8 {
        match self {
            EventKind::Start => 0,
            EventKind::Stop => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackEvent {
    pub kind: EventKind,
    pub placement_index: usize,
    pub sample_index: i64,
}

/// Accumulates placements between `begin` and `finalize`, then derives the
/// sorted event list the mixer walks during playback.
#[derive(Debug, Default)]
pub struct PlaybackArrangement {
    placements: Vec<PlaybackClip>,
    events: Vec<PlaybackEvent>,
}

impl PlaybackArrangement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placements(&self) -> &[PlaybackClip] {
        &self.placements
    }

    pub fn events(&self) -> &[PlaybackEvent] {
        &self.events
    }

    /// Clear any placements from a previous build.
    pub fn begin(&mut self) {
        self.placements.clear();
        self.events.clear();
    }

    /// Validate bounds against `clip_len` (the referenced clip's current
    /// sample count) and append a placement.
    pub fn add_clip(
        &mut self,
        clip_id: ClipId,
        start: i64,
        end: i64,
        playback_start: i64,
        clip_len: usize,
    ) -> EngineResult<()> {
        if start < 0 || end < 0 || start > end || end as usize > clip_len {
            return Err(EngineError::Precondition(format!(
                "invalid placement bounds [{start}, {end}) for a clip of length {clip_len}"
            )));
        }
        self.placements
            .push(PlaybackClip::new(clip_id, start as usize, end as usize, playback_start));
        Ok(())
    }

    /// Derive the start/stop event for every placement and stable-sort by
    /// `sample_index`, with starts ordered before stops at equal indices.
    pub fn finalize(&mut self) {
        self.events.clear();
        self.events.reserve(self.placements.len() * 2);

        for (i, placement) in self.placements.iter().enumerate() {
            let len = placement.len() as i64;
            self.events.push(PlaybackEvent {
                kind: EventKind::Start,
                placement_index: i,
                sample_index: placement.playback_start,
            });
            self.events.push(PlaybackEvent {
                kind: EventKind::Stop,
                placement_index: i,
                sample_index: placement.playback_start + len,
            });
        }

        // `sort_by_key`/`sort_by` on `Vec` is a stable sort; the explicit
        // kind-rank tiebreak is still required so a start and a stop that
        // land on the same sample_index (a zero-length placement, or two
        // placements that happen to abut) order deterministically rather
        // than by push order alone.
        self.events
            .sort_by_key(|e| (e.sample_index, e.kind.rank()));
    }
}
