//! ADB (Android Debug Bridge) module for device interaction.

mod connection;
mod device;
pub mod display;
mod input;
mod screenshot;

pub use connection::{
    AdbConnection, AdbError, ConnectionType, DeviceInfo, DeviceState, DEFAULT_ADB_PORT,
};
pub use device::{parse_focused_package, AdbDevice};
pub use input::{InputResult, KeyboardBridge, KeyboardConfig, ADB_KEYBOARD_IME};
pub use screenshot::{scaled_dimensions, Capture, CaptureConfig, CaptureEngine};
