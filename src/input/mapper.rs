//! Translation of physical input events into lane inputs.
//!
//! The mapper is stateful because of turntables: a scratch lane is
//! "pressed" while the platter spins one way and "released" when it
//! reverses or stops, so direction and timing have to be tracked between
//! events. Key and button handling only keep per-lane debounce times.

use winit::keyboard::KeyCode;

use crate::chart::cursor::LaneInput;
use crate::chart::{LANE_COUNT, LaneKind, PLAYSTYLE_COUNT, Playstyle};
use crate::input::events::{AxisInput, ButtonInput, ControllerId, KeyInput};
use crate::input::keycode::parse_keycode;
use crate::models::settings::{ConfigError, Settings};
use crate::time::Nanos;

/// One bound controller input: a button or axis index on a specific
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerBinding {
    pub controller: ControllerId,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Cw,
    Ccw,
}

#[derive(Debug, Clone, Copy)]
struct TurntableState {
    value: f32,
    last_press_value: f32,
    direction: Option<Direction>,
    last_stopped: Nanos,
}

impl Default for TurntableState {
    fn default() -> Self {
        Self {
            value: 0.0,
            last_press_value: 0.0,
            direction: None,
            last_stopped: 0,
        }
    }
}

/// Signed circular difference between two axis positions, wrapped to the
/// shortest arc of the [-1, 1] circle.
fn tt_difference(prev: f32, curr: f32) -> f32 {
    let mut diff = curr - prev;
    if diff < -1.0 {
        diff += 2.0;
    }
    if diff > 1.0 {
        diff -= 2.0;
    }
    diff
}

fn tt_direction(prev: f32, curr: f32) -> Direction {
    if tt_difference(prev, curr) > 0.0 {
        Direction::Cw
    } else {
        Direction::Ccw
    }
}

/// Config entry suffixes for each playstyle's key lanes. 9K ships no
/// bindings.
fn key_lane_names(playstyle: Playstyle) -> &'static [(LaneKind, &'static str)] {
    match playstyle {
        Playstyle::K5 => &[
            (LaneKind::P1Key1, "5k_1"),
            (LaneKind::P1Key2, "5k_2"),
            (LaneKind::P1Key3, "5k_3"),
            (LaneKind::P1Key4, "5k_4"),
            (LaneKind::P1Key5, "5k_5"),
            (LaneKind::P1Scratch, "5k_s"),
        ],
        Playstyle::K7 => &[
            (LaneKind::P1Key1, "7k_1"),
            (LaneKind::P1Key2, "7k_2"),
            (LaneKind::P1Key3, "7k_3"),
            (LaneKind::P1Key4, "7k_4"),
            (LaneKind::P1Key5, "7k_5"),
            (LaneKind::P1Key6, "7k_6"),
            (LaneKind::P1Key7, "7k_7"),
            (LaneKind::P1Scratch, "7k_s"),
        ],
        Playstyle::K9 => &[],
        Playstyle::K10 => &[
            (LaneKind::P1Key1, "10k_p1_1"),
            (LaneKind::P1Key2, "10k_p1_2"),
            (LaneKind::P1Key3, "10k_p1_3"),
            (LaneKind::P1Key4, "10k_p1_4"),
            (LaneKind::P1Key5, "10k_p1_5"),
            (LaneKind::P1Scratch, "10k_p1_s"),
            (LaneKind::P2Key1, "10k_p2_1"),
            (LaneKind::P2Key2, "10k_p2_2"),
            (LaneKind::P2Key3, "10k_p2_3"),
            (LaneKind::P2Key4, "10k_p2_4"),
            (LaneKind::P2Key5, "10k_p2_5"),
            (LaneKind::P2Scratch, "10k_p2_s"),
        ],
        Playstyle::K14 => &[
            (LaneKind::P1Key1, "14k_p1_1"),
            (LaneKind::P1Key2, "14k_p1_2"),
            (LaneKind::P1Key3, "14k_p1_3"),
            (LaneKind::P1Key4, "14k_p1_4"),
            (LaneKind::P1Key5, "14k_p1_5"),
            (LaneKind::P1Key6, "14k_p1_6"),
            (LaneKind::P1Key7, "14k_p1_7"),
            (LaneKind::P1Scratch, "14k_p1_s"),
            (LaneKind::P2Key1, "14k_p2_1"),
            (LaneKind::P2Key2, "14k_p2_2"),
            (LaneKind::P2Key3, "14k_p2_3"),
            (LaneKind::P2Key4, "14k_p2_4"),
            (LaneKind::P2Key5, "14k_p2_5"),
            (LaneKind::P2Key6, "14k_p2_6"),
            (LaneKind::P2Key7, "14k_p2_7"),
            (LaneKind::P2Scratch, "14k_p2_s"),
        ],
    }
}

/// Config entry suffixes for the turntable axes, by side.
fn axis_names(playstyle: Playstyle) -> [Option<&'static str>; 2] {
    match playstyle {
        Playstyle::K5 => [Some("5k_s_analog"), None],
        Playstyle::K7 => [Some("7k_s_analog"), None],
        Playstyle::K9 => [None, None],
        Playstyle::K10 => [Some("10k_p1_s_analog"), Some("10k_p2_s_analog")],
        Playstyle::K14 => [Some("14k_p1_s_analog"), Some("14k_p2_s_analog")],
    }
}

/// Parses a `"<guid-hash-hex>;<duplicate>;<index>"` controller entry.
/// `"None"` unbinds.
fn parse_controller_binding(entry: &str) -> Result<Option<ControllerBinding>, ConfigError> {
    if entry == "None" {
        return Ok(None);
    }
    let malformed = || ConfigError::InvalidControllerBinding(entry.to_string());
    let segments: Vec<&str> = entry.split(';').collect();
    let &[guid, duplicate, index] = segments.as_slice() else {
        return Err(malformed());
    };
    Ok(Some(ControllerBinding {
        controller: ControllerId {
            guid_hash: u32::from_str_radix(guid, 16).map_err(|_| malformed())?,
            duplicate: duplicate.parse().map_err(|_| malformed())?,
        },
        index: index.parse().map_err(|_| malformed())?,
    }))
}

/// Stateful translator from raw input events to lane inputs.
pub struct Mapper {
    key_bindings: [[Option<KeyCode>; LANE_COUNT]; PLAYSTYLE_COUNT],
    button_bindings: [[Option<ControllerBinding>; LANE_COUNT]; PLAYSTYLE_COUNT],
    axis_bindings: [[Option<ControllerBinding>; 2]; PLAYSTYLE_COUNT],
    turntables: [[TurntableState; 2]; PLAYSTYLE_COUNT],
    last_input: [[Nanos; LANE_COUNT]; PLAYSTYLE_COUNT],
    debounce: Nanos,
    turntable_stop_timeout: Nanos,
}

impl Mapper {
    /// Builds every binding table from the settings snapshot. Fails on a
    /// missing or malformed entry.
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let controls = &settings.controls;
        let mut key_bindings = [[None; LANE_COUNT]; PLAYSTYLE_COUNT];
        let mut button_bindings = [[None; LANE_COUNT]; PLAYSTYLE_COUNT];
        let mut axis_bindings = [[None; 2]; PLAYSTYLE_COUNT];

        for style in Playstyle::ALL {
            for &(lane, suffix) in key_lane_names(style) {
                let name = format!("kb_{suffix}");
                let label = controls
                    .keys
                    .get(&name)
                    .ok_or_else(|| ConfigError::MissingBinding(name.clone()))?;
                let code = parse_keycode(label)
                    .ok_or_else(|| ConfigError::UnknownKeyCode(label.clone()))?;
                key_bindings[style.index()][lane.index()] = Some(code);

                if let Some(entry) = controls.buttons.get(&format!("con_{suffix}")) {
                    button_bindings[style.index()][lane.index()] = parse_controller_binding(entry)?;
                }
            }
            for (side, suffix) in axis_names(style).iter().enumerate() {
                let Some(suffix) = suffix else { continue };
                if let Some(entry) = controls.axes.get(&format!("con_{suffix}")) {
                    axis_bindings[style.index()][side] = parse_controller_binding(entry)?;
                }
            }
        }

        Ok(Self {
            key_bindings,
            button_bindings,
            axis_bindings,
            turntables: [[TurntableState::default(); 2]; PLAYSTYLE_COUNT],
            last_input: [[0; LANE_COUNT]; PLAYSTYLE_COUNT],
            debounce: controls.debounce_ns(),
            turntable_stop_timeout: controls.turntable_stop_timeout_ns(),
        })
    }

    /// Translates a keyboard event. Returns `None` for unbound keys and
    /// debounced repeats.
    pub fn from_key(&mut self, key: &KeyInput, playstyle: Playstyle) -> Option<LaneInput> {
        let binds = &self.key_bindings[playstyle.index()];
        let lane_idx = binds.iter().position(|bind| *bind == Some(key.code))?;
        self.debounced_lane_input(playstyle, lane_idx, key.timestamp, key.pressed)
    }

    /// Translates a controller button event.
    pub fn from_button(&mut self, button: &ButtonInput, playstyle: Playstyle) -> Option<LaneInput> {
        let pressed_binding = ControllerBinding {
            controller: button.controller,
            index: button.button,
        };
        let binds = &self.button_bindings[playstyle.index()];
        let lane_idx = binds.iter().position(|bind| *bind == Some(pressed_binding))?;
        self.debounced_lane_input(playstyle, lane_idx, button.timestamp, button.pressed)
    }

    fn debounced_lane_input(
        &mut self,
        playstyle: Playstyle,
        lane_idx: usize,
        timestamp: Nanos,
        pressed: bool,
    ) -> Option<LaneInput> {
        let last = &mut self.last_input[playstyle.index()][lane_idx];
        if timestamp - *last <= self.debounce {
            return None;
        }
        *last = timestamp;
        Some(LaneInput {
            lane: LaneKind::from_index(lane_idx),
            pressed,
        })
    }

    /// Feeds a turntable axis event. A direction change past the debounce
    /// gap releases the previous rotation (if any) and presses the
    /// scratch lane again.
    pub fn submit_axis_input(&mut self, axis: &AxisInput, playstyle: Playstyle) -> Vec<LaneInput> {
        let event_binding = ControllerBinding {
            controller: axis.controller,
            index: axis.axis,
        };
        let binds = &self.axis_bindings[playstyle.index()];
        let Some(tt_idx) = binds.iter().position(|bind| *bind == Some(event_binding)) else {
            return Vec::new();
        };

        let state = &mut self.turntables[playstyle.index()][tt_idx];
        if state.value == axis.value {
            return Vec::new();
        }

        let lane = Playstyle::turntable_lane(tt_idx);
        let current_direction = tt_direction(state.value, axis.value);
        let last = &mut self.last_input[playstyle.index()][lane.index()];

        let mut inputs = Vec::new();
        if Some(current_direction) != state.direction && axis.timestamp - *last > self.debounce {
            // Changing direction of an existing rotation
            if state.direction.is_some() {
                inputs.push(LaneInput {
                    lane,
                    pressed: false,
                });
            }

            // Starting a new rotation
            inputs.push(LaneInput {
                lane,
                pressed: true,
            });
            state.direction = Some(current_direction);
            state.last_press_value = axis.value;
            *last = axis.timestamp;
        }
        state.value = axis.value;
        state.last_stopped = axis.timestamp;

        inputs
    }

    /// Polled once per sample batch: releases any turntable that hasn't
    /// moved for the stop timeout.
    pub fn from_axis_state(&mut self, playstyle: Playstyle, now: Nanos) -> Vec<LaneInput> {
        let mut inputs = Vec::new();
        for (tt_idx, state) in self.turntables[playstyle.index()].iter_mut().enumerate() {
            if state.direction.is_none() {
                continue;
            }
            if now - state.last_stopped <= self.turntable_stop_timeout {
                continue;
            }
            inputs.push(LaneInput {
                lane: Playstyle::turntable_lane(tt_idx),
                pressed: false,
            });
            state.direction = None;
        }
        inputs
    }
}
