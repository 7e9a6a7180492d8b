//! Agent module for orchestrating device automation.

mod device_agent;
mod state;
mod task;
mod worker;

pub use device_agent::{AgentConfig, AgentError, DeviceAgent, ProgressCallback};
pub use state::{LoopControl, LoopState};
pub use task::{AgentEvent, Step, Task, TaskResult};
pub use worker::{AgentWorker, PendingTask, WorkerError, WorkerHandle};
