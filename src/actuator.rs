//! Primitive device operations the agent drives.
//!
//! Every operation reports back a free-form string. The only contract the
//! rest of the crate has with that string is [`is_error_response`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Case-insensitive substrings that mark an actuator response as a failure.
pub const ERROR_MARKERS: &[&str] = &[
    "error",
    "exception",
    "failure",
    "failed",
    "permission denied",
];

/// Classify a raw actuator response.
pub fn is_error_response(response: &str) -> bool {
    let lower = response.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// An absolute position on the device display, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Hardware / navigation keys the dispatcher sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Back,
    Escape,
    VolumeUp,
    VolumeDown,
    Power,
}

impl KeyCode {
    /// Android `KeyEvent` constant name.
    pub fn android_name(&self) -> &'static str {
        match self {
            KeyCode::Back => "KEYCODE_BACK",
            KeyCode::Escape => "KEYCODE_ESCAPE",
            KeyCode::VolumeUp => "KEYCODE_VOLUME_UP",
            KeyCode::VolumeDown => "KEYCODE_VOLUME_DOWN",
            KeyCode::Power => "KEYCODE_POWER",
        }
    }
}

/// Why the primary capture primitive produced no image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScreencapError {
    /// The foreground surface is flagged secure and the device refused to dump it.
    #[error("secure surface refused capture")]
    SecureSurface,
    #[error("screen capture unavailable: {0}")]
    Unavailable(String),
}

/// Opaque capability for driving one device.
#[async_trait]
pub trait DeviceActuator: Send + Sync {
    /// Whether a device is attached and answering.
    async fn is_available(&self) -> bool;

    async fn tap(&self, x: i32, y: i32) -> String;

    /// Drag along `points`; the call may return before the gesture finishes.
    async fn swipe(&self, points: &[PixelPoint], duration_ms: u64) -> String;

    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> String;

    async fn double_tap(&self, x: i32, y: i32) -> String;

    async fn press_key(&self, key: KeyCode) -> String;

    async fn launch_app(&self, package: &str) -> String;

    /// Bring up the launcher's app grid for the current user.
    async fn show_app_grid(&self) -> String;

    async fn execute_shell_command(&self, command: &str) -> String;

    /// Fast in-process capture of the current display as encoded image bytes.
    async fn screencap(&self) -> Result<Vec<u8>, ScreencapError>;

    /// Read a file from device storage. `None` when it does not exist or is unreadable.
    async fn read_file(&self, path: &str) -> Option<Vec<u8>>;

    /// Logical display input is routed to, if the actuator is pinned to one.
    fn display_id(&self) -> Option<u32> {
        None
    }
}
