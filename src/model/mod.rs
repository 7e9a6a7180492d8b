//! Decision model: the trait the agent loop talks to, and its
//! OpenAI-compatible implementation.

mod client;
mod decision;
mod messages;

pub use client::{
    ModelClient, ModelConfig, ModelError, ModelResponse, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_SECS,
};
pub use decision::{Decision, DecisionError, DecisionModel, DecisionRequest, Turn};
pub use messages::MessageBuilder;
