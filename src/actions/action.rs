//! Decoded model actions.

use serde::{Deserialize, Serialize};

use super::ActionError;
use crate::actuator::PixelPoint;

/// Upper bound (exclusive) of the model's integer coordinate space.
pub const RELATIVE_COORDINATE_MAX: f64 = 1000.0;

/// Default long-press duration when the model gives none.
pub const DEFAULT_LONG_PRESS_MS: u64 = 3000;

/// Default pause between the sub-steps of a batch.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 500;

/// A screen position normalized to `0.0..=1.0` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert a point in the model's `0..1000` space.
    pub fn from_model_space(x: f64, y: f64) -> Self {
        Self::new(x / RELATIVE_COORDINATE_MAX, y / RELATIVE_COORDINATE_MAX)
    }

    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Map a normalized point onto a `width` x `height` display.
pub fn to_absolute(point: Point, width: u32, height: u32) -> PixelPoint {
    PixelPoint::new(
        (point.x * width as f64).round() as i32,
        (point.y * height as f64).round() as i32,
    )
}

/// One decoded decision of the model.
///
/// Dispatch is a single exhaustive `match` over this enum, so a new kind of
/// action has to be handled everywhere before the crate compiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap {
        at: Point,
        /// Present for sensitive taps that need user confirmation first.
        confirm: Option<String>,
    },
    Swipe {
        start: Point,
        end: Point,
        humanized: bool,
    },
    LongPress {
        at: Point,
        duration_ms: u64,
    },
    DoubleTap {
        at: Point,
    },
    Type {
        text: String,
    },
    TypeName {
        text: String,
    },
    Launch {
        app: String,
    },
    ListApps,
    Back,
    Home,
    VolumeUp,
    VolumeDown,
    Power,
    Wait {
        seconds: f64,
    },
    TakeOver {
        message: String,
    },
    Interact {
        options: Vec<String>,
    },
    Note {
        message: String,
    },
    CallApi {
        instruction: String,
    },
    Finish {
        message: String,
    },
    Batch {
        steps: Vec<Action>,
        delay_ms: u64,
    },
}

impl Action {
    /// Build a batch, rejecting nested batches and `Finish` sub-steps.
    pub fn batch(steps: Vec<Action>, delay_ms: u64) -> Result<Self, ActionError> {
        if steps.is_empty() {
            return Err(ActionError::InvalidBatch("batch has no steps".to_string()));
        }
        if let Some(bad) = steps
            .iter()
            .find(|s| matches!(s, Action::Batch { .. } | Action::Finish { .. }))
        {
            return Err(ActionError::InvalidBatch(format!(
                "{} is not allowed inside a batch",
                bad.name()
            )));
        }
        Ok(Action::Batch { steps, delay_ms })
    }

    /// Action name as the model spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "Tap",
            Action::Swipe { .. } => "Swipe",
            Action::LongPress { .. } => "Long Press",
            Action::DoubleTap { .. } => "Double Tap",
            Action::Type { .. } => "Type",
            Action::TypeName { .. } => "Type_Name",
            Action::Launch { .. } => "Launch",
            Action::ListApps => "List_Apps",
            Action::Back => "Back",
            Action::Home => "Home",
            Action::VolumeUp => "Volume_Up",
            Action::VolumeDown => "Volume_Down",
            Action::Power => "Power",
            Action::Wait { .. } => "Wait",
            Action::TakeOver { .. } => "Take_over",
            Action::Interact { .. } => "Interact",
            Action::Note { .. } => "Note",
            Action::CallApi { .. } => "Call_API",
            Action::Finish { .. } => "finish",
            Action::Batch { .. } => "Batch",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }

    /// Human readable one-liner for logs and history.
    pub fn describe(&self) -> String {
        fn pct(p: &Point) -> String {
            format!("({:.1}%, {:.1}%)", p.x * 100.0, p.y * 100.0)
        }

        match self {
            Action::Tap { at, confirm } => match confirm {
                Some(msg) => format!("Tap {} after confirming \"{}\"", pct(at), msg),
                None => format!("Tap {}", pct(at)),
            },
            Action::Swipe {
                start,
                end,
                humanized,
            } => format!(
                "Swipe {} -> {}{}",
                pct(start),
                pct(end),
                if *humanized { " (curved)" } else { "" }
            ),
            Action::LongPress { at, duration_ms } => {
                format!("Long press {} for {} ms", pct(at), duration_ms)
            }
            Action::DoubleTap { at } => format!("Double tap {}", pct(at)),
            Action::Type { text } => format!("Type \"{}\"", text),
            Action::TypeName { text } => format!("Type name \"{}\"", text),
            Action::Launch { app } => format!("Launch {}", app),
            Action::ListApps => "List installed apps".to_string(),
            Action::Back => "Back".to_string(),
            Action::Home => "Home".to_string(),
            Action::VolumeUp => "Volume up".to_string(),
            Action::VolumeDown => "Volume down".to_string(),
            Action::Power => "Power button".to_string(),
            Action::Wait { seconds } => format!("Wait {} s", seconds),
            Action::TakeOver { message } => format!("Hand over to user: {}", message),
            Action::Interact { options } => {
                format!("Ask user to choose among {} option(s)", options.len())
            }
            Action::Note { message } => format!("Note: {}", message),
            Action::CallApi { instruction } => format!("Call API: {}", instruction),
            Action::Finish { message } => format!("Finish: {}", message),
            Action::Batch { steps, .. } => format!(
                "Batch of {}: {}",
                steps.len(),
                steps
                    .iter()
                    .map(Action::describe)
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        }
    }
}
