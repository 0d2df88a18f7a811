//! Immutable, playback-ready representation of a BMS chart.
//!
//! A chart is built once by the song-loading pipeline and then only read:
//! playback happens by creating a [`cursor::Cursor`] over an `Arc<Chart>`
//! and advancing it one audio sample at a time. Any number of cursors and
//! render snapshots may share the same chart.

pub mod cursor;
pub mod score;

use std::fmt;
use std::sync::Arc;

use crate::audio::Sample;
use crate::time::Nanos;

/// Number of distinct lane kinds a chart can contain.
pub const LANE_COUNT: usize = 18;

/// The different kinds of lanes, covering both players' keys and
/// turntables plus the non-playable BGM and measure-line channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum LaneKind {
    P1Key1,
    P1Key2,
    P1Key3,
    P1Key4,
    P1Key5,
    P1Key6,
    P1Key7,
    P1Scratch,
    P2Key1,
    P2Key2,
    P2Key3,
    P2Key4,
    P2Key5,
    P2Key6,
    P2Key7,
    P2Scratch,
    Bgm,
    MeasureLine,
}

impl LaneKind {
    pub const ALL: [LaneKind; LANE_COUNT] = [
        LaneKind::P1Key1,
        LaneKind::P1Key2,
        LaneKind::P1Key3,
        LaneKind::P1Key4,
        LaneKind::P1Key5,
        LaneKind::P1Key6,
        LaneKind::P1Key7,
        LaneKind::P1Scratch,
        LaneKind::P2Key1,
        LaneKind::P2Key2,
        LaneKind::P2Key3,
        LaneKind::P2Key4,
        LaneKind::P2Key5,
        LaneKind::P2Key6,
        LaneKind::P2Key7,
        LaneKind::P2Scratch,
        LaneKind::Bgm,
        LaneKind::MeasureLine,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }

    /// Whether this lane belongs to the player-2 side of the playfield.
    pub fn is_p2_side(self) -> bool {
        matches!(
            self,
            LaneKind::P2Key1
                | LaneKind::P2Key2
                | LaneKind::P2Key3
                | LaneKind::P2Key4
                | LaneKind::P2Key5
                | LaneKind::P2Key6
                | LaneKind::P2Key7
                | LaneKind::P2Scratch
        )
    }
}

/// Supported playstyles, named by key count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Playstyle {
    K5,
    K7,
    K9,
    K10,
    K14,
}

/// Number of distinct playstyles.
pub const PLAYSTYLE_COUNT: usize = 5;

impl Default for Playstyle {
    fn default() -> Self {
        Playstyle::K7
    }
}

impl Playstyle {
    pub const ALL: [Playstyle; PLAYSTYLE_COUNT] = [
        Playstyle::K5,
        Playstyle::K7,
        Playstyle::K9,
        Playstyle::K10,
        Playstyle::K14,
    ];

    pub fn index(self) -> usize {
        match self {
            Playstyle::K5 => 0,
            Playstyle::K7 => 1,
            Playstyle::K9 => 2,
            Playstyle::K10 => 3,
            Playstyle::K14 => 4,
        }
    }

    /// The turntable lane for the given side (0 = P1, 1 = P2).
    pub fn turntable_lane(side: usize) -> LaneKind {
        if side == 0 {
            LaneKind::P1Scratch
        } else {
            LaneKind::P2Scratch
        }
    }
}

/// Payload distinguishing tap notes from long notes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoteKind {
    Simple,
    Long {
        /// Time from the head to the tail.
        length: Nanos,
        /// Vertical extent in scroll units.
        height: f64,
    },
}

/// A note with a definite timestamp and vertical position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub kind: NoteKind,
    /// Chart-relative time of the head.
    pub timestamp: Nanos,
    /// Position in scroll space.
    pub y_pos: f64,
    /// Index into [`Media::wav_slots`].
    pub wav_slot: usize,
}

impl Note {
    pub fn is_long(&self) -> bool {
        matches!(self.kind, NoteKind::Long { .. })
    }

    /// The instant this note is fully consumed: the head for simple notes,
    /// the tail for long notes.
    pub fn end_timestamp(&self) -> Nanos {
        match self.kind {
            NoteKind::Simple => self.timestamp,
            NoteKind::Long { length, .. } => self.timestamp + length,
        }
    }
}

/// A column of a chart. Notes are sorted by timestamp ascending.
#[derive(Debug, Clone, Default)]
pub struct Lane {
    pub notes: Vec<Note>,
    /// Are the notes for the player to hit?
    pub playable: bool,
    /// Are the notes shown on screen in some way?
    pub visible: bool,
    /// Do the notes trigger keysounds?
    pub audible: bool,
}

/// A point in the chart at which the BPM changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BpmChange {
    pub position: Nanos,
    pub bpm: f32,
    pub y_pos: f64,
    /// Relative to 1.0 as the BPM's natural scroll speed.
    pub scroll_speed: f32,
}

/// Statistics about BPMs used in the chart.
#[derive(Debug, Clone, Copy, Default)]
pub struct BpmRange {
    pub initial: f32,
    pub min: f32,
    pub max: f32,
    /// The most common BPM; the mode.
    pub main: f32,
}

/// Chart features the player might want to know about ahead of time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub has_ln: bool,
    pub has_soflan: bool,
}

/// A chart's metadata and statistics.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub playstyle: Playstyle,
    /// Number of notes for the player to hit.
    pub note_count: u32,
    /// Timestamp when all notes are judged.
    pub chart_duration: Nanos,
    /// Timestamp when the last sample stops.
    pub audio_duration: Nanos,
    /// Integrated loudness in LUFS.
    pub loudness: f64,
    pub bpm_range: BpmRange,
    pub features: Features,
}

/// Timing and objects: everything required to reproduce the chart's
/// timeline.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub lanes: [Lane; LANE_COUNT],
    /// Sorted by position ascending; the first element starts at or
    /// before zero.
    pub bpm_sections: Vec<BpmChange>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            lanes: std::array::from_fn(|_| Lane::default()),
            bpm_sections: Vec::new(),
        }
    }
}

/// One keysound slot: PCM already resampled to the device sampling rate,
/// shared read-only with every voice that plays it.
pub type WavSlot = Arc<[Sample]>;

/// Media contents referenced by the chart.
#[derive(Debug, Clone, Default)]
pub struct Media {
    pub wav_slots: Vec<WavSlot>,
    /// Rate every slot was resampled to.
    pub sampling_rate: u32,
}

/// 16-byte content identity of a chart: the MD5 of the source BMS bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChartHash(pub [u8; 16]);

impl ChartHash {
    pub fn of_source(bytes: &[u8]) -> Self {
        Self(md5::compute(bytes).0)
    }
}

impl fmt::Display for ChartHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A complete chart. Immutable; played by creating and advancing a
/// [`cursor::Cursor`] over it.
#[derive(Debug, Clone, Default)]
pub struct Chart {
    pub hash: ChartHash,
    pub metadata: Metadata,
    pub timeline: Timeline,
    pub media: Media,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_index_round_trip() {
        for (i, kind) in LaneKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(LaneKind::from_index(i), *kind);
        }
    }

    #[test]
    fn p2_side_split() {
        assert!(!LaneKind::P1Key1.is_p2_side());
        assert!(!LaneKind::P1Scratch.is_p2_side());
        assert!(LaneKind::P2Key1.is_p2_side());
        assert!(LaneKind::P2Scratch.is_p2_side());
        assert!(!LaneKind::Bgm.is_p2_side());
        assert!(!LaneKind::MeasureLine.is_p2_side());
    }

    #[test]
    fn long_note_end_timestamp() {
        let note = Note {
            kind: NoteKind::Long {
                length: 500,
                height: 1.0,
            },
            timestamp: 1000,
            y_pos: 0.0,
            wav_slot: 0,
        };
        assert_eq!(note.end_timestamp(), 1500);
        assert!(note.is_long());
    }

    #[test]
    fn chart_hash_display_is_lowercase_hex() {
        let hash = ChartHash::of_source(b"#TITLE test");
        let text = hash.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
        // Identical input hashes identically.
        assert_eq!(hash, ChartHash::of_source(b"#TITLE test"));
        assert_ne!(hash, ChartHash::of_source(b"#TITLE other"));
    }
}
