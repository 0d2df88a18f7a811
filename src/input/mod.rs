//! Physical input events and their translation into lane inputs.

pub mod events;
pub mod keycode;
pub mod mapper;

pub use events::{AxisInput, ButtonInput, ControllerId, KeyInput, UserInput};
pub use mapper::Mapper;
