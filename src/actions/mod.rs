//! Actions decoded from model output and their execution on the device.

mod action;
mod gesture;
mod handler;
mod overlay;
mod parse;

pub use action::{
    to_absolute, Action, Point, DEFAULT_BATCH_DELAY_MS, DEFAULT_LONG_PRESS_MS,
    RELATIVE_COORDINATE_MAX,
};
pub use gesture::{build_swipe_path, humanized_path, swipe_duration_ms, HUMANIZED_PATH_POINTS};
pub use handler::{
    ActionDispatcher, ActionResult, ConfirmationHandler, ConsoleConfirmation, DispatcherConfig,
};
pub use overlay::{NoOverlay, OverlaySuppressor, StatusOverlay, DEFAULT_OVERLAY_SETTLE};
pub use parse::{action_from_value, parse_action, parse_action_value, ActionError};
