//! Raw input event types crossing from the input thread into the player.
//!
//! Events are stamped by the producer with a monotonic wall-clock
//! timestamp; the player later shifts them into the future by the audio
//! latency so they line up with the sample clock.

use winit::keyboard::KeyCode;

use crate::time::Nanos;

/// Unique identifier for a controller. Stable across sessions for the
/// same physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId {
    /// Hash of the device GUID.
    pub guid_hash: u32,
    /// Initially 0, incremented when a duplicate GUID is found.
    pub duplicate: u32,
}

/// A player keyboard input event.
#[derive(Debug, Clone, Copy)]
pub struct KeyInput {
    pub timestamp: Nanos,
    pub code: KeyCode,
    /// true = pressed, false = released.
    pub pressed: bool,
}

/// A controller button event.
#[derive(Debug, Clone, Copy)]
pub struct ButtonInput {
    pub controller: ControllerId,
    pub timestamp: Nanos,
    pub button: u32,
    pub pressed: bool,
}

/// A controller axis event. Values are normalized to [-1, 1].
#[derive(Debug, Clone, Copy)]
pub struct AxisInput {
    pub controller: ControllerId,
    pub timestamp: Nanos,
    pub axis: u32,
    pub value: f32,
}

/// Any user input event.
#[derive(Debug, Clone, Copy)]
pub enum UserInput {
    Key(KeyInput),
    Button(ButtonInput),
    Axis(AxisInput),
}

impl UserInput {
    pub fn timestamp(&self) -> Nanos {
        match self {
            UserInput::Key(input) => input.timestamp,
            UserInput::Button(input) => input.timestamp,
            UserInput::Axis(input) => input.timestamp,
        }
    }

    /// Shifts the event into the future, compensating playback latency.
    pub fn shift_timestamp(&mut self, by: Nanos) {
        match self {
            UserInput::Key(input) => input.timestamp += by,
            UserInput::Button(input) => input.timestamp += by,
            UserInput::Axis(input) => input.timestamp += by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_shift_applies_to_every_variant() {
        let controller = ControllerId {
            guid_hash: 1,
            duplicate: 0,
        };
        let mut inputs = [
            UserInput::Key(KeyInput {
                timestamp: 100,
                code: KeyCode::KeyZ,
                pressed: true,
            }),
            UserInput::Button(ButtonInput {
                controller,
                timestamp: 200,
                button: 3,
                pressed: false,
            }),
            UserInput::Axis(AxisInput {
                controller,
                timestamp: 300,
                axis: 0,
                value: 0.5,
            }),
        ];
        for input in &mut inputs {
            let before = input.timestamp();
            input.shift_timestamp(50);
            assert_eq!(input.timestamp(), before + 50);
        }
    }
}
