//! Task and step records produced by the agent loop.

use chrono::{DateTime, Local};
use uuid::Uuid;

use super::LoopState;
use crate::actions::Action;
use crate::history::{StepRecord, TaskRecord};

/// One loop iteration. Never changed after it is appended to its task.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// 1-based, contiguous within the task.
    pub number: usize,
    pub thinking: String,
    /// `None` when the model gave no usable action.
    pub action: Option<Action>,
    pub description: String,
    pub success: bool,
    pub message: Option<String>,
}

/// One user goal and the steps taken towards it.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    steps: Vec<Step>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            started_at: Local::now(),
            finished_at: None,
            steps: Vec::new(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Append the next step and return it. The number is assigned here.
    pub(crate) fn push_step(
        &mut self,
        thinking: String,
        action: Option<Action>,
        success: bool,
        message: Option<String>,
    ) -> &Step {
        let description = match &action {
            Some(action) => action.describe(),
            None => "No action".to_string(),
        };
        self.steps.push(Step {
            number: self.steps.len() + 1,
            thinking,
            action,
            description,
            success,
            message,
        });
        &self.steps[self.steps.len() - 1]
    }

    pub(crate) fn finish(mut self, state: LoopState, message: String) -> TaskResult {
        self.finished_at = Some(Local::now());
        TaskResult {
            success: state == LoopState::Completed,
            state,
            message,
            task: self,
        }
    }
}

/// Outcome of [`DeviceAgent::run`](super::DeviceAgent::run).
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: Task,
    /// `Completed`, `Failed` or `Cancelled`.
    pub state: LoopState,
    pub success: bool,
    /// Human-readable summary of how the task ended.
    pub message: String,
}

impl TaskResult {
    pub fn steps(&self) -> &[Step] {
        self.task.steps()
    }

    pub(crate) fn record(&self) -> TaskRecord {
        TaskRecord {
            task_id: self.task.id.clone(),
            goal: self.task.goal.clone(),
            started_at: self.task.started_at,
            finished_at: self.task.finished_at.unwrap_or_else(Local::now),
            steps: self.task.step_count(),
            success: self.success,
            message: self.message.clone(),
        }
    }
}

impl Step {
    pub(crate) fn record(&self, task_id: &str, before_image: Option<String>) -> StepRecord {
        StepRecord {
            task_id: task_id.to_string(),
            number: self.number,
            thinking: self.thinking.clone(),
            action: self.description.clone(),
            success: self.success,
            message: self.message.clone(),
            before_image,
            after_image: None,
            timestamp: Local::now(),
        }
    }
}

/// Progress notifications for observers of a [`DeviceAgent`](super::DeviceAgent).
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TaskStarted { task_id: String, goal: String },
    StepRecorded { task_id: String, step: Step },
    StateChanged(LoopState),
    TaskFinished(TaskResult),
}
