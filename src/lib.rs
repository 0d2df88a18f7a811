//! Playback core for BMS-family rhythm game charts.
//!
//! The crate turns an immutable, pre-compiled [`chart::Chart`] into
//! sample-accurate audio while judging player inputs against its notes:
//!
//! - [`audio::mixer::Mixer`] owns the audio device and sums registered
//!   generators under a lookahead limiter.
//! - [`audio::player::Player`] is the primary generator: it aligns input
//!   timestamps with the sample clock, drives one or more cursors, and
//!   mixes the keysound voices they trigger.
//! - [`chart::cursor::Cursor`] advances note progress one sample at a
//!   time and emits judgment events.
//! - [`input::Mapper`] translates physical key, button, and turntable
//!   events into lane inputs.
//! - [`chart::score::Score`] reduces judgment events to totals, combo,
//!   and rank.
//!
//! Chart parsing, song libraries, rendering, and window plumbing are out
//! of scope; collaborators hand the core a finished chart and read back
//! sample buffers, judgment events, and cursor snapshots.

pub mod audio;
pub mod chart;
pub mod input;
pub mod models;
pub mod time;

pub use audio::mixer::Mixer;
pub use audio::player::Player;
pub use chart::cursor::Cursor;
pub use chart::score::Score;
pub use chart::{Chart, ChartHash, Playstyle};
pub use input::Mapper;
pub use models::Settings;
