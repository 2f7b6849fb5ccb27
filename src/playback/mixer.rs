//! The playback mixer: per-callback cursor advancement, event processing,
//! and accumulation of active clips' samples into the output buffer.
//!
//! The active list is intrusive but realized here over a
//! plain `&mut [PlaybackClip]` slice using `Option<usize>` links rather
//! than raw pointers — the arena is the slice itself, indices are stable
//! for as long as the slice isn't resized, and `start_playback` builds a
//! fresh snapshot slice for exactly that reason (see
//! [`crate::engine::Engine::start_playback`]).

use std::collections::HashMap;
use std::sync::Arc;

use crate::clip::ClipId;

use super::arrangement::{EventKind, PlaybackClip, PlaybackEvent};

/// Insert `index` at the head of the active list, performing a
/// *consistent* doubly-linked-list insertion: `new.next = old_head;
/// old_head.prev = new; head = new`.
fn activate(placements: &mut [PlaybackClip], first_active: &mut Option<usize>, index: usize) {
    let old_head = *first_active;
    placements[index].next_active = old_head;
    placements[index].prev_active = None;
    if let Some(old) = old_head {
        placements[old].prev_active = Some(index);
    }
    *first_active = Some(index);
}

/// Unlink `index` from the active list, wherever it currently sits.
fn deactivate(placements: &mut [PlaybackClip], first_active: &mut Option<usize>, index: usize) {
    let prev = placements[index].prev_active;
    let next = placements[index].next_active;

    match prev {
        Some(p) => placements[p].next_active = next,
        None => *first_active = next,
    }
    if let Some(n) = next {
        placements[n].prev_active = prev;
    }

    placements[index].prev_active = None;
    placements[index].next_active = None;
}

fn apply_event(placements: &mut [PlaybackClip], first_active: &mut Option<usize>, event: &PlaybackEvent) {
    match event.kind {
        EventKind::Start => activate(placements, first_active, event.placement_index),
        EventKind::Stop => deactivate(placements, first_active, event.placement_index),
    }
}

/// Replay every event up to and including `requested_start`, returning the
/// resulting active-list head and the index of the first event strictly
/// after `requested_start`. Used by `start_playback` to put the mixer in
/// the correct state for a mid-arrangement start.
pub fn activate_for_start(placements: &mut [PlaybackClip], events: &[PlaybackEvent], requested_start: i64) -> (Option<usize>, usize) {
    let mut first_active = None;
    for placement in placements.iter_mut() {
        placement.prev_active = None;
        placement.next_active = None;
    }

    let mut next_event_index = 0;
    for (i, event) in events.iter().enumerate() {
        if event.sample_index > requested_start {
            break;
        }
        apply_event(placements, &mut first_active, event);
        next_event_index = i + 1;
    }

    (first_active, next_event_index)
}

/// Per-clip sample data the mixer needs during one playback session,
/// snapshotted once at `start_playback` via cheap `Arc` clones (see
/// [`crate::clip::ClipStore::samples_handle`]) so the real-time callback
/// never touches the clip store directly.
pub type ClipSnapshot = HashMap<ClipId, Arc<Vec<f32>>>;

/// Run one callback's worth of the mixing algorithm: zero the output
/// buffer, then walk `[cursor, cursor + output.len())`,
/// splitting at each event boundary, accumulating every active
/// placement's contribution, and applying events as they're reached.
/// Returns the new cursor (`cursor + output.len()`).
#[allow(clippy::too_many_arguments)]
pub fn mix_into(
    output: &mut [f32],
    clips: &ClipSnapshot,
    placements: &mut [PlaybackClip],
    events: &[PlaybackEvent],
    first_active: &mut Option<usize>,
    next_event_index: &mut usize,
    cursor_start: i64,
) -> i64 {
    output.fill(0.0);

    let frame_count = output.len() as i64;
    let mut cursor = cursor_start;
    let end = cursor + frame_count;
    let mut write_offset = 0usize;

    while cursor < end {
        let mut boundary = end;
        let mut event_to_apply: Option<usize> = None;
        if *next_event_index < events.len() {
            let event = &events[*next_event_index];
            if event.sample_index < end {
                boundary = event.sample_index;
                event_to_apply = Some(*next_event_index);
            }
        }

        if cursor < boundary {
            let len = (boundary - cursor) as usize;
            let mut active = *first_active;
            while let Some(index) = active {
                let placement = placements[index];
                let source_start = (cursor - placement.playback_start + placement.start as i64) as usize;
                if let Some(samples) = clips.get(&placement.clip_id) {
                    for i in 0..len {
                        output[write_offset + i] += samples[source_start + i];
                    }
                }
                active = placements[index].next_active;
            }
            cursor += len as i64;
            write_offset += len;
        }

        if let Some(event_index) = event_to_apply {
            let event = events[event_index];
            apply_event(placements, first_active, &event);
            *next_event_index += 1;
        }
    }

    end
}
