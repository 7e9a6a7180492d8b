// Copyright 2025 Zhipu AI (Original Python implementation)
// Copyright 2025 ModerRAS (Rust implementation)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Device Agent
//!
//! Touchscreen automation driven by a vision-language model.
//!
//! The agent observes an Android device over ADB, asks an OpenAI-compatible
//! model for the next action, and executes it: tap, swipe, type through the
//! ADB Keyboard, launch apps, and so on, until the model reports the goal as
//! finished.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use device_agent::{AgentConfig, DeviceAgent, DeviceSession, ModelClient, ModelConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = DeviceSession::adb(None);
//!     let model = Arc::new(ModelClient::new(ModelConfig::default()));
//!
//!     let agent = DeviceAgent::new(&session, model, AgentConfig::default());
//!     let result = agent.run("打开微信").await?;
//!
//!     println!("Task result: {}", result.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Queued goals
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use device_agent::{AgentConfig, AgentWorker, DeviceAgent, DeviceSession, ModelClient, ModelConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = DeviceSession::adb(None);
//!     let model = Arc::new(ModelClient::new(ModelConfig::default()));
//!     let agent = Arc::new(DeviceAgent::new(&session, model, AgentConfig::default()));
//!
//!     let handle = AgentWorker::spawn(agent);
//!     let pending = handle.submit("打开设置").await?;
//!     println!("{}", pending.wait().await?.message);
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod actuator;
pub mod adb;
pub mod agent;
pub mod config;
pub mod history;
pub mod model;
pub mod session;
pub mod settings;

#[cfg(test)]
mod testing;

pub use actions::{
    Action, ActionDispatcher, ActionResult, ConfirmationHandler, DispatcherConfig,
    OverlaySuppressor, StatusOverlay, RELATIVE_COORDINATE_MAX,
};
pub use actuator::{DeviceActuator, KeyCode, PixelPoint};
pub use adb::{AdbDevice, Capture, CaptureConfig, CaptureEngine, KeyboardBridge, KeyboardConfig};
pub use agent::{
    AgentConfig, AgentError, AgentEvent, AgentWorker, DeviceAgent, LoopState, Step, Task,
    TaskResult, WorkerError, WorkerHandle,
};
pub use history::{HistorySink, JsonlHistorySink, NullHistorySink};
pub use model::{DecisionModel, ModelClient, ModelConfig};
pub use session::DeviceSession;
pub use settings::AppSettings;
