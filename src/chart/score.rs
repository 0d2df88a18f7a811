//! Accumulator of judgment events: totals, combo, score, and rank.

use crate::chart::Chart;
use crate::chart::cursor::{JudgmentEvent, JudgmentEventKind};
use crate::time::{NANOS_PER_MS, Nanos};

pub const PGREAT_WINDOW: Nanos = 18 * NANOS_PER_MS;
pub const GREAT_WINDOW: Nanos = 36 * NANOS_PER_MS;
pub const GOOD_WINDOW: Nanos = 120 * NANOS_PER_MS;
pub const BAD_WINDOW: Nanos = 240 * NANOS_PER_MS;
/// Releasing an LN earlier than this before its tail voids the note.
pub const LN_EARLY_RELEASE: Nanos = 120 * NANOS_PER_MS;

/// Discrete classification of a player action against a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgmentType {
    PGreat,
    Great,
    Good,
    Bad,
    Poor,
}

pub const JUDGMENT_TYPE_COUNT: usize = 5;

impl JudgmentType {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Which side of the window a judged hit fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Misses.
    None,
    Early,
    OnTime,
    Late,
}

pub const TIMING_COUNT: usize = 4;

impl Timing {
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    AAA,
    AA,
    A,
    B,
    C,
    D,
    E,
    F,
}

/// A fully classified judgment, as shown on a playfield.
#[derive(Debug, Clone, Copy)]
pub struct Judgment {
    pub kind: JudgmentType,
    pub timing: Timing,
    pub timestamp: Nanos,
}

/// Running per-type and per-timing counts.
#[derive(Debug, Clone, Default)]
pub struct JudgeTotals {
    pub types: [i64; JUDGMENT_TYPE_COUNT],
    pub timings: [i64; TIMING_COUNT],
}

impl JudgeTotals {
    pub fn of_type(&self, kind: JudgmentType) -> i64 {
        self.types[kind.index()]
    }

    pub fn of_timing(&self, timing: Timing) -> i64 {
        self.timings[timing.index()]
    }
}

/// Running score for one chart. Consumes the cursor's judgment events.
pub struct Score {
    note_count: u32,
    notes_judged: i64,
    judge_totals: JudgeTotals,
    latest_judgment: [Option<Judgment>; 2],
    combo: i64,
    score: i64,
}

impl Score {
    /// Creates a running score for the given chart. The reference is not
    /// stored.
    pub fn new(chart: &Chart) -> Self {
        Self {
            note_count: chart.metadata.note_count,
            notes_judged: 0,
            judge_totals: JudgeTotals::default(),
            latest_judgment: [None, None],
            combo: 0,
            score: 0,
        }
    }

    /// Submits a judgment event to be added to the score.
    pub fn submit(&mut self, event: &JudgmentEvent) {
        if event.kind == JudgmentEventKind::LnStart {
            return;
        }

        let early_release = event.kind == JudgmentEventKind::Ln
            && event.release_timing.is_some_and(|r| r < -LN_EARLY_RELEASE);
        let (kind, timing) = if event.timing.is_none() || early_release {
            self.combo = 0;
            (JudgmentType::Poor, Timing::None)
        } else {
            let head = event.timing.unwrap_or_default();
            let abs = head.abs();
            let kind = if abs <= PGREAT_WINDOW {
                JudgmentType::PGreat
            } else if abs <= GREAT_WINDOW {
                JudgmentType::Great
            } else if abs <= GOOD_WINDOW {
                JudgmentType::Good
            } else {
                JudgmentType::Bad
            };
            self.score += match kind {
                JudgmentType::PGreat => 2,
                JudgmentType::Great => 1,
                _ => 0,
            };
            if kind == JudgmentType::Bad {
                self.combo = 0;
            } else {
                self.combo += 1;
            }
            let timing = if kind == JudgmentType::PGreat {
                Timing::OnTime
            } else if head < 0 {
                Timing::Early
            } else {
                Timing::Late
            };
            (kind, timing)
        };

        self.notes_judged += 1;
        self.judge_totals.types[kind.index()] += 1;
        self.judge_totals.timings[timing.index()] += 1;

        let side = usize::from(event.lane.is_p2_side());
        self.latest_judgment[side] = Some(Judgment {
            kind,
            timing,
            timestamp: event.timestamp,
        });
    }

    /// The latest judgment on the given playfield (0 = P1, 1 = P2).
    pub fn latest_judgment(&self, side: usize) -> Option<Judgment> {
        self.latest_judgment[side]
    }

    /// Number of playable notes judged so far.
    pub fn judged_notes(&self) -> i64 {
        self.notes_judged
    }

    /// Number of playable notes the chart contains.
    pub fn note_count(&self) -> u32 {
        self.note_count
    }

    pub fn judge_totals(&self) -> &JudgeTotals {
        &self.judge_totals
    }

    pub fn combo(&self) -> i64 {
        self.combo
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    /// Accuracy rank over the notes judged so far.
    pub fn rank(&self) -> Rank {
        if self.notes_judged == 0 {
            return Rank::AAA;
        }
        let acc = self.score as f64 / (self.notes_judged * 2) as f64;
        if acc >= 8.0 / 9.0 {
            Rank::AAA
        } else if acc >= 7.0 / 9.0 {
            Rank::AA
        } else if acc >= 6.0 / 9.0 {
            Rank::A
        } else if acc >= 5.0 / 9.0 {
            Rank::B
        } else if acc >= 4.0 / 9.0 {
            Rank::C
        } else if acc >= 3.0 / 9.0 {
            Rank::D
        } else if acc >= 2.0 / 9.0 {
            Rank::E
        } else {
            Rank::F
        }
    }
}
