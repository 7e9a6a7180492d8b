//! The decision collaborator: screenshot plus history in, one action out.

use async_trait::async_trait;
use thiserror::Error;

use crate::actions::{parse_action, Action};
use crate::adb::Capture;

/// Why no decision could be obtained at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecisionError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model did not answer within {0} seconds")]
    Timeout(u64),
}

/// One earlier step as the model should remember it.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Screen info sent with that step.
    pub screen_info: String,
    pub thinking: String,
    /// The raw answer, as the model wrote it.
    pub answer: String,
    /// What happened when the answer was executed.
    pub outcome: String,
}

/// Everything the model gets for one decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub goal: &'a str,
    pub capture: &'a Capture,
    pub history: &'a [Turn],
    /// JSON object describing the screen, e.g. the foreground app.
    pub screen_info: &'a str,
}

/// The model's answer for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub thinking: String,
    pub raw_answer: String,
    /// The decoded action, or why the answer could not be decoded.
    pub outcome: Result<Action, String>,
}

impl Decision {
    /// Decode a raw answer.
    pub fn from_answer(thinking: String, raw_answer: &str) -> Self {
        let outcome = parse_action(raw_answer).map_err(|e| e.to_string());
        Self {
            thinking,
            raw_answer: raw_answer.to_string(),
            outcome,
        }
    }
}

/// Remote model that decides on the next action.
#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError>;
}
