//! Per-chart playback state machine.
//!
//! A [`Cursor`] advances an immutable chart by exactly one audio sample
//! per call, applying lane inputs, emitting judgment events, and
//! requesting keysound voices through a trigger sink. It is the single
//! place where chart time, note progress, and player actions meet, so the
//! whole advance path is a plain synchronous function the audio thread
//! can run tens of thousands of times per second.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::chart::score::BAD_WINDOW;
use crate::chart::{BpmChange, Chart, ChartHash, LANE_COUNT, LaneKind, Note, NoteKind, WavSlot};
use crate::time::{NANOS_PER_SEC, Nanos, samples_to_ns};

/// A lane press or release, already translated from physical input by the
/// mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneInput {
    pub lane: LaneKind,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgmentEventKind {
    /// A simple note was hit or missed.
    Note,
    /// A long note was released (or timed out).
    Ln,
    /// A long note head was hit; the note is still held.
    LnStart,
}

/// A discrete judgment produced by the cursor. Timestamps are
/// chart-relative nanoseconds at the instant the event was emitted.
#[derive(Debug, Clone, Copy)]
pub struct JudgmentEvent {
    pub kind: JudgmentEventKind,
    pub lane: LaneKind,
    pub timestamp: Nanos,
    /// Offset of the hit from the note head; `None` is a miss.
    pub timing: Option<Nanos>,
    /// Offset of an LN release from the tail.
    pub release_timing: Option<Nanos>,
}

/// Stable identity of a logical sound slot within one chart, used by the
/// player to deduplicate voices. Playable lanes use one channel per lane,
/// so a retrigger restarts the lane's voice; the BGM lane uses one channel
/// per note, so overlapping background keysounds stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u32);

impl ChannelId {
    fn for_lane(lane: LaneKind) -> Self {
        Self(lane.index() as u32)
    }

    fn for_bgm(lane: LaneKind, note_index: usize) -> Self {
        Self(lane.index() as u32 | ((note_index as u32 + 1) << 5))
    }
}

/// A request to start (or restart) a keysound voice.
#[derive(Debug, Clone)]
pub struct KeysoundTrigger {
    pub chart: ChartHash,
    pub channel: ChannelId,
    pub pcm: WavSlot,
}

/// Consumer handle for a cursor's judgment stream. Obtained before the
/// cursor moves into the player, drained from the control thread.
#[derive(Clone)]
pub struct JudgmentEvents {
    rx: Receiver<JudgmentEvent>,
}

impl JudgmentEvents {
    /// Drains every event emitted since the last call.
    pub fn pending(&self) -> impl Iterator<Item = JudgmentEvent> + '_ {
        self.rx.try_iter()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LaneProgress {
    /// Index of the earliest note that hasn't been fully processed.
    next_note: usize,
    /// Head timing of the long note currently held. `Some` only while the
    /// note at `next_note` is a held (or, in autoplay, sounding) LN.
    ln_timing: Option<Nanos>,
    pressed: bool,
    /// Slot played when the player presses this lane with nothing to
    /// judge; follows the most recently passed note.
    active_slot: Option<usize>,
}

/// A moment in a chart's playback.
pub struct Cursor {
    chart: Arc<Chart>,
    autoplay: bool,
    sample_progress: u64,
    notes_judged: u32,
    lanes: [LaneProgress; LANE_COUNT],
    judgment_tx: Sender<JudgmentEvent>,
    judgment_rx: Receiver<JudgmentEvent>,
}

impl Cursor {
    /// Creates a cursor at the start of the chart. With `autoplay` the
    /// cursor triggers every keysound on time by itself and never emits
    /// judgment events.
    pub fn new(chart: Arc<Chart>, autoplay: bool) -> Self {
        let (judgment_tx, judgment_rx) = unbounded();
        let mut cursor = Self {
            chart,
            autoplay,
            sample_progress: 0,
            notes_judged: 0,
            lanes: [LaneProgress::default(); LANE_COUNT],
            judgment_tx,
            judgment_rx,
        };
        cursor.restart();
        cursor
    }

    pub fn chart(&self) -> &Arc<Chart> {
        &self.chart
    }

    pub fn is_autoplay(&self) -> bool {
        self.autoplay
    }

    /// Current position in samples.
    pub fn progress(&self) -> u64 {
        self.sample_progress
    }

    /// Current position in nanoseconds.
    pub fn progress_ns(&self) -> Nanos {
        samples_to_ns(self.sample_progress, self.chart.media.sampling_rate)
    }

    /// Number of playable notes already judged.
    pub fn judged_notes(&self) -> u32 {
        self.notes_judged
    }

    /// Consumer handle for this cursor's judgment stream.
    pub fn judgment_events(&self) -> JudgmentEvents {
        JudgmentEvents {
            rx: self.judgment_rx.clone(),
        }
    }

    /// Drains the judgment events emitted since the last call.
    pub fn pending_judgment_events(&self) -> impl Iterator<Item = JudgmentEvent> + '_ {
        self.judgment_rx.try_iter()
    }

    /// Seeks to the beginning of the chart and clears all per-lane state.
    pub fn restart(&mut self) {
        self.sample_progress = 0;
        self.notes_judged = 0;
        for (progress, lane) in self.lanes.iter_mut().zip(&self.chart.timeline.lanes) {
            *progress = LaneProgress {
                active_slot: lane.notes.first().map(|n| n.wav_slot),
                ..LaneProgress::default()
            };
        }
    }

    /// Progresses by one audio sample. Returns `false` once every
    /// judgeable note has been processed.
    pub fn advance_one_sample(
        &mut self,
        trigger: &mut dyn FnMut(KeysoundTrigger),
        inputs: &[LaneInput],
    ) -> bool {
        self.sample_progress += 1;
        let now = self.progress_ns();

        // Lane inputs: track press edges, handle LN releases immediately.
        let mut fresh_press = [false; LANE_COUNT];
        for input in inputs {
            let idx = input.lane.index();
            if input.pressed {
                if !self.lanes[idx].pressed {
                    fresh_press[idx] = true;
                }
                self.lanes[idx].pressed = true;
            } else {
                self.lanes[idx].pressed = false;
                // Only judged holds release here; in autoplay `ln_timing`
                // marks a sounding LN that ends on its own.
                if self.lanes[idx].ln_timing.is_some()
                    && !self.autoplay
                    && self.chart.timeline.lanes[idx].playable
                {
                    self.release_long_note(idx, now);
                }
            }
        }

        // Per-lane note scan, in lane-index order.
        let chart = Arc::clone(&self.chart);
        for idx in 0..LANE_COUNT {
            let lane = &chart.timeline.lanes[idx];
            let judged = lane.playable && !self.autoplay;
            loop {
                let progress = self.lanes[idx];
                let Some(&note) = lane.notes.get(progress.next_note) else {
                    break;
                };
                let advanced = if judged {
                    self.scan_judged_note(idx, &note, now, &mut fresh_press[idx], trigger)
                } else {
                    self.scan_timed_note(idx, &note, now, lane.playable, trigger)
                };
                if !advanced {
                    break;
                }
            }
        }

        // A press edge that judged nothing still plays the lane's current
        // keysound.
        for idx in 0..LANE_COUNT {
            if fresh_press[idx]
                && let Some(slot) = self.lanes[idx].active_slot
            {
                let note_index = self.lanes[idx].next_note;
                self.emit_trigger(trigger, idx, note_index, slot);
            }
        }

        self.notes_judged < self.chart.metadata.note_count
    }

    /// One step of the judged scan. Returns `true` when the lane advanced
    /// and the next note should be examined within the same sample.
    fn scan_judged_note(
        &mut self,
        idx: usize,
        note: &Note,
        now: Nanos,
        fresh_press: &mut bool,
        trigger: &mut dyn FnMut(KeysoundTrigger),
    ) -> bool {
        let lane = LaneKind::from_index(idx);
        let progress = self.lanes[idx];
        match note.kind {
            NoteKind::Simple => {
                if *fresh_press && (now - note.timestamp).abs() <= BAD_WINDOW {
                    *fresh_press = false;
                    let _ = self.judgment_tx.send(JudgmentEvent {
                        kind: JudgmentEventKind::Note,
                        lane,
                        timestamp: now,
                        timing: Some(now - note.timestamp),
                        release_timing: None,
                    });
                    self.pass_note(idx, note, trigger);
                    true
                } else if now > note.timestamp + BAD_WINDOW {
                    let _ = self.judgment_tx.send(JudgmentEvent {
                        kind: JudgmentEventKind::Note,
                        lane,
                        timestamp: now,
                        timing: None,
                        release_timing: None,
                    });
                    self.pass_note(idx, note, trigger);
                    true
                } else {
                    false
                }
            }
            NoteKind::Long { .. } => {
                if progress.ln_timing.is_some() {
                    // Held; releases are handled in the input step. A hold
                    // that outlives the tail's window counts as a miss.
                    if now > note.end_timestamp() + BAD_WINDOW {
                        let _ = self.judgment_tx.send(JudgmentEvent {
                            kind: JudgmentEventKind::Ln,
                            lane,
                            timestamp: now,
                            timing: None,
                            release_timing: None,
                        });
                        self.lanes[idx].ln_timing = None;
                        self.pass_note_silent(idx, note);
                        true
                    } else {
                        false
                    }
                } else if *fresh_press && (now - note.timestamp).abs() <= BAD_WINDOW {
                    *fresh_press = false;
                    let head_timing = now - note.timestamp;
                    self.lanes[idx].ln_timing = Some(head_timing);
                    self.lanes[idx].active_slot = Some(note.wav_slot);
                    let _ = self.judgment_tx.send(JudgmentEvent {
                        kind: JudgmentEventKind::LnStart,
                        lane,
                        timestamp: now,
                        timing: Some(head_timing),
                        release_timing: None,
                    });
                    self.emit_trigger(trigger, idx, progress.next_note, note.wav_slot);
                    false
                } else if now > note.timestamp + BAD_WINDOW {
                    // Head never hit; the whole note is gone.
                    let _ = self.judgment_tx.send(JudgmentEvent {
                        kind: JudgmentEventKind::Ln,
                        lane,
                        timestamp: now,
                        timing: None,
                        release_timing: None,
                    });
                    self.pass_note(idx, note, trigger);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// One step of the time-driven scan (BGM, measure lines, autoplay).
    fn scan_timed_note(
        &mut self,
        idx: usize,
        note: &Note,
        now: Nanos,
        playable: bool,
        trigger: &mut dyn FnMut(KeysoundTrigger),
    ) -> bool {
        let progress = self.lanes[idx];
        if progress.ln_timing.is_none() {
            if now < note.timestamp {
                return false;
            }
            self.emit_trigger(trigger, idx, progress.next_note, note.wav_slot);
            self.lanes[idx].active_slot = Some(note.wav_slot);
            if note.is_long() {
                // Sounding; advance once the tail passes.
                self.lanes[idx].ln_timing = Some(0);
                false
            } else {
                self.lanes[idx].next_note += 1;
                if playable {
                    self.notes_judged += 1;
                }
                true
            }
        } else if now >= note.end_timestamp() {
            self.lanes[idx].ln_timing = None;
            self.lanes[idx].next_note += 1;
            if playable {
                self.notes_judged += 1;
            }
            true
        } else {
            false
        }
    }

    /// Emits the LN judgment for a release on a held lane.
    fn release_long_note(&mut self, idx: usize, now: Nanos) {
        let lane = &self.chart.timeline.lanes[idx];
        let progress = self.lanes[idx];
        let note = lane.notes[progress.next_note];
        let head_timing = self.lanes[idx].ln_timing.take();
        if lane.playable {
            let _ = self.judgment_tx.send(JudgmentEvent {
                kind: JudgmentEventKind::Ln,
                lane: LaneKind::from_index(idx),
                timestamp: now,
                timing: head_timing,
                release_timing: Some(now - note.end_timestamp()),
            });
        }
        self.pass_note_silent(idx, &note);
    }

    /// Advances past a judged note and plays its keysound.
    fn pass_note(&mut self, idx: usize, note: &Note, trigger: &mut dyn FnMut(KeysoundTrigger)) {
        self.emit_trigger(trigger, idx, self.lanes[idx].next_note, note.wav_slot);
        self.pass_note_silent(idx, note);
    }

    /// Advances past a judged note without triggering audio.
    fn pass_note_silent(&mut self, idx: usize, note: &Note) {
        self.lanes[idx].active_slot = Some(note.wav_slot);
        self.lanes[idx].next_note += 1;
        self.notes_judged += 1;
    }

    /// Requests a keysound voice, skipping inaudible lanes and empty or
    /// out-of-range slots.
    fn emit_trigger(
        &self,
        trigger: &mut dyn FnMut(KeysoundTrigger),
        idx: usize,
        note_index: usize,
        wav_slot: usize,
    ) {
        if !self.chart.timeline.lanes[idx].audible {
            return;
        }
        let Some(pcm) = self.chart.media.wav_slots.get(wav_slot) else {
            return;
        };
        if pcm.is_empty() {
            return;
        }
        let lane = LaneKind::from_index(idx);
        let channel = if lane == LaneKind::Bgm {
            ChannelId::for_bgm(lane, note_index)
        } else {
            ChannelId::for_lane(lane)
        };
        trigger(KeysoundTrigger {
            chart: self.chart.hash,
            channel,
            pcm: pcm.clone(),
        });
    }

    /// Jumps to an absolute sample position, recomputing per-lane indices
    /// by binary search and clearing transient press state.
    pub fn seek(&mut self, sample_position: u64) {
        self.sample_progress = sample_position;
        let now = self.progress_ns();
        let mut judged = 0u32;
        for idx in 0..LANE_COUNT {
            let lane = &self.chart.timeline.lanes[idx];
            let first_unplayed = lane.notes.partition_point(|n| n.end_timestamp() <= now);
            let progress = &mut self.lanes[idx];
            progress.next_note = first_unplayed;
            progress.ln_timing = None;
            progress.pressed = false;
            if lane.playable {
                judged += first_unplayed as u32;
            }
            if first_unplayed == lane.notes.len() {
                progress.active_slot = lane.notes.last().map(|n| n.wav_slot);
                continue;
            }
            let next = lane.notes[first_unplayed];
            progress.active_slot = Some(next.wav_slot);
            if next.is_long() && next.timestamp <= now {
                progress.ln_timing = Some(0);
                progress.pressed = true;
            }
        }
        self.notes_judged = judged;
    }

    /// Moves by a sample offset. Backward offsets and autoplay cursors
    /// jump directly; a judgeable cursor replays forward one sample at a
    /// time so the result is identical to real-time playback without
    /// inputs.
    pub fn seek_relative(&mut self, offset: i64) {
        if offset < 0 || self.autoplay {
            let target = (self.sample_progress as i64 + offset).max(0);
            self.seek(target as u64);
            return;
        }
        for _ in 0..offset {
            self.advance_one_sample(&mut |_| {}, &[]);
        }
    }

    fn bpm_section(&self, timestamp: Nanos) -> &BpmChange {
        let sections = &self.chart.timeline.bpm_sections;
        let idx = sections.partition_point(|s| s.position <= timestamp);
        &sections[idx.saturating_sub(1)]
    }

    /// Notes from visible lanes within `max_units` of the current scroll
    /// position, in per-lane order. `latency` shifts the reference point
    /// back so the playfield shows what the speakers are playing.
    pub fn upcoming_notes(
        &self,
        max_units: f64,
        offset: Nanos,
        latency: Option<Nanos>,
    ) -> impl Iterator<Item = UpcomingNote<'_>> + '_ {
        let progress_timestamp = self.progress_ns() - latency.unwrap_or(0) - offset;
        let section = self.bpm_section(progress_timestamp);
        let section_progress = (progress_timestamp - section.position) as f64 / NANOS_PER_SEC as f64;
        let beat_duration = 60.0 / self.chart.metadata.bpm_range.main as f64;
        let initial_bpm = self.chart.timeline.bpm_sections[0].bpm;
        let bpm_ratio = section.bpm as f64 / initial_bpm as f64;
        let current_y =
            section.y_pos + section_progress / beat_duration * bpm_ratio * section.scroll_speed as f64;

        self.chart
            .timeline
            .lanes
            .iter()
            .enumerate()
            .filter(|(_, lane)| lane.visible)
            .flat_map(move |(idx, lane)| {
                let start = self.lanes[idx].next_note;
                lane.notes[start..]
                    .iter()
                    .enumerate()
                    .map(move |(i, note)| UpcomingNote {
                        note,
                        lane: LaneKind::from_index(idx),
                        note_index: start + i,
                        distance: note.y_pos - current_y,
                    })
                    .take_while(move |upcoming| upcoming.distance <= max_units)
            })
    }
}

impl Clone for Cursor {
    /// The copy gets a detached judgment queue: snapshot cursors are
    /// advanced for rendering and must not emit into the original's
    /// stream.
    fn clone(&self) -> Self {
        let (judgment_tx, judgment_rx) = unbounded();
        Self {
            chart: self.chart.clone(),
            autoplay: self.autoplay,
            sample_progress: self.sample_progress,
            notes_judged: self.notes_judged,
            lanes: self.lanes,
            judgment_tx,
            judgment_rx,
        }
    }
}

/// A note yielded by [`Cursor::upcoming_notes`].
#[derive(Debug, Clone, Copy)]
pub struct UpcomingNote<'a> {
    pub note: &'a Note,
    pub lane: LaneKind,
    pub note_index: usize,
    pub distance: f64,
}
