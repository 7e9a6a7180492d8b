//! The observe / decide / act loop.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::state::{LoopControl, LoopState};
use super::task::{AgentEvent, Task, TaskResult};
use crate::actions::{ActionDispatcher, DispatcherConfig};
use crate::actuator::DeviceActuator;
use crate::adb::{parse_focused_package, Capture, CaptureConfig, CaptureEngine};
use crate::config::get_app_name;
use crate::history::{HistorySink, NullHistorySink};
use crate::model::{Decision, DecisionError, DecisionModel, DecisionRequest, MessageBuilder, Turn};
use crate::session::DeviceSession;

/// Agent errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("A task is already running")]
    AlreadyRunning,
}

/// Configuration for the DeviceAgent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of steps before stopping.
    pub max_steps: usize,
    /// Consecutive unparseable model answers tolerated before failing.
    pub max_parse_failures: u32,
    /// Consecutive failed or timed-out model requests tolerated before failing.
    pub max_decision_failures: u32,
    /// Upper bound for one model request.
    pub decision_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_parse_failures: 3,
            max_decision_failures: 3,
            decision_timeout: Duration::from_secs(120),
        }
    }
}

impl AgentConfig {
    /// Create a new AgentConfig with custom max steps.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_parse_failures(mut self, max: u32) -> Self {
        self.max_parse_failures = max;
        self
    }

    pub fn with_max_decision_failures(mut self, max: u32) -> Self {
        self.max_decision_failures = max;
        self
    }

    pub fn with_decision_timeout(mut self, decision_timeout: Duration) -> Self {
        self.decision_timeout = decision_timeout;
        self
    }
}

/// Callback for agent progress events.
pub type ProgressCallback = Box<dyn Fn(&AgentEvent) + Send + Sync>;

/// Releases the loop as cancelled if `run` is dropped before it finishes.
struct RunGuard<'a> {
    control: &'a LoopControl,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.control.finish(LoopState::Cancelled);
        }
    }
}

/// Drives one device towards a goal: capture, ask the model, dispatch,
/// repeat until the model finishes or the task is stopped.
///
/// `run` takes `&self`, so a shared agent can be cancelled or paused from
/// another task while it runs.
pub struct DeviceAgent {
    actuator: Arc<dyn DeviceActuator>,
    model: Arc<dyn DecisionModel>,
    capture: CaptureEngine,
    dispatcher: ActionDispatcher,
    history: Arc<dyn HistorySink>,
    config: AgentConfig,
    control: LoopControl,
    progress_callback: Option<ProgressCallback>,
}

impl DeviceAgent {
    pub fn new(
        session: &DeviceSession,
        model: Arc<dyn DecisionModel>,
        config: AgentConfig,
    ) -> Self {
        Self {
            actuator: session.actuator(),
            model,
            capture: CaptureEngine::new(session, CaptureConfig::default()),
            dispatcher: ActionDispatcher::new(session, DispatcherConfig::default()),
            history: Arc::new(NullHistorySink),
            config,
            control: LoopControl::new(),
            progress_callback: None,
        }
    }

    pub fn with_capture(mut self, capture: CaptureEngine) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = history;
        self
    }

    /// Set a callback for progress events.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    pub fn is_running(&self) -> bool {
        self.control.state().is_active()
    }

    /// Stop the running task at its next checkpoint.
    pub fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.control.cancel();
    }

    pub fn pause(&self) -> bool {
        let paused = self.control.pause();
        if paused {
            tracing::info!("task paused");
            self.emit(AgentEvent::StateChanged(LoopState::Paused));
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.control.resume();
        if resumed {
            tracing::info!("task resumed");
            self.emit(AgentEvent::StateChanged(LoopState::Running));
        }
        resumed
    }

    /// Run the agent until `goal` is finished, fails or is cancelled.
    ///
    /// The only error is [`AgentError::AlreadyRunning`]; every other outcome
    /// is a [`TaskResult`].
    pub async fn run(&self, goal: &str) -> Result<TaskResult, AgentError> {
        let token = self.control.try_start()?;
        let mut guard = RunGuard {
            control: &self.control,
            armed: true,
        };

        let mut task = Task::new(goal);
        tracing::info!(task_id = %task.id, goal, "task started");
        self.emit(AgentEvent::StateChanged(LoopState::Running));
        self.emit(AgentEvent::TaskStarted {
            task_id: task.id.clone(),
            goal: goal.to_string(),
        });

        let (state, message) = self.drive(&mut task, &token).await;
        let result = task.finish(state, message);

        guard.armed = false;
        self.control.finish(state);

        match state {
            LoopState::Failed => {
                tracing::error!(task_id = %result.task.id, "task failed: {}", result.message)
            }
            _ => tracing::info!(
                task_id = %result.task.id,
                ?state,
                "task ended: {}",
                result.message
            ),
        }
        self.history.record_task(&result.record());
        self.emit(AgentEvent::StateChanged(state));
        self.emit(AgentEvent::TaskFinished(result.clone()));
        Ok(result)
    }

    /// The loop body; returns the terminal state and its message.
    async fn drive(&self, task: &mut Task, token: &CancellationToken) -> (LoopState, String) {
        if !self.control.checkpoint(token).await {
            return cancelled();
        }
        if !self.actuator.is_available().await {
            return (
                LoopState::Failed,
                "No device available: check that the device is connected and authorized."
                    .to_string(),
            );
        }

        let mut turns: Vec<Turn> = Vec::new();
        let mut parse_failures = 0;
        let mut decision_failures = 0;
        // Dimensions of the last real capture, used while captures degrade.
        let mut screen: Option<(u32, u32)> = None;

        while task.step_count() < self.config.max_steps {
            if !self.control.checkpoint(token).await {
                return cancelled();
            }

            let capture = self.capture.capture().await;
            if !capture.is_fallback {
                screen = Some((capture.original_width, capture.original_height));
            }
            let (width, height) =
                screen.unwrap_or((capture.original_width, capture.original_height));
            let current_app = self.current_app().await;
            let screen_info = MessageBuilder::build_screen_info(
                current_app.as_deref(),
                capture.is_sensitive,
                capture.is_fallback,
            );

            if !self.control.checkpoint(token).await {
                return cancelled();
            }

            let decision = match self.decide(&task.goal, &capture, &turns, &screen_info).await {
                Ok(decision) => {
                    decision_failures = 0;
                    decision
                }
                Err(e) => {
                    decision_failures += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        failures = decision_failures,
                        "no decision: {}",
                        e
                    );
                    let message = Some(e.to_string());
                    self.record_step(task, String::new(), None, false, message, &capture);
                    if decision_failures >= self.config.max_decision_failures {
                        return (
                            LoopState::Failed,
                            format!("The model could not be reached: {}", e),
                        );
                    }
                    continue;
                }
            };

            let Decision {
                thinking,
                raw_answer,
                outcome,
            } = decision;

            let action = match outcome {
                Ok(action) => {
                    parse_failures = 0;
                    action
                }
                Err(reason) => {
                    parse_failures += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        failures = parse_failures,
                        "unparseable answer: {}",
                        reason
                    );
                    self.record_step(
                        task,
                        thinking.clone(),
                        None,
                        false,
                        Some(raw_answer.clone()),
                        &capture,
                    );
                    turns.push(Turn {
                        screen_info,
                        thinking,
                        answer: raw_answer,
                        outcome: format!(
                            "The answer could not be understood ({}). Reply with exactly one action in the documented format.",
                            reason
                        ),
                    });
                    if parse_failures >= self.config.max_parse_failures {
                        return (
                            LoopState::Failed,
                            format!(
                                "Stopped after {} model answers in a row could not be understood.",
                                parse_failures
                            ),
                        );
                    }
                    continue;
                }
            };

            if !self.control.checkpoint(token).await {
                return cancelled();
            }

            let result = self
                .dispatcher
                .dispatch_with_cancel(&action, width, height, token)
                .await;
            tracing::info!(
                task_id = %task.id,
                step = task.step_count() + 1,
                action = action.name(),
                success = result.success,
                "{}",
                result.message
            );

            self.record_step(
                task,
                thinking.clone(),
                Some(action),
                result.success,
                Some(result.message.clone()),
                &capture,
            );
            turns.push(Turn {
                screen_info,
                thinking,
                answer: raw_answer,
                outcome: result.message.clone(),
            });

            if result.should_finish {
                let state = if result.success {
                    LoopState::Completed
                } else {
                    LoopState::Failed
                };
                return (state, result.message);
            }
        }

        (
            LoopState::Failed,
            format!(
                "Stopped after reaching the limit of {} steps without finishing.",
                self.config.max_steps
            ),
        )
    }

    async fn decide(
        &self,
        goal: &str,
        capture: &Capture,
        history: &[Turn],
        screen_info: &str,
    ) -> Result<Decision, DecisionError> {
        let request = DecisionRequest {
            goal,
            capture,
            history,
            screen_info,
        };
        match timeout(self.config.decision_timeout, self.model.decide(request)).await {
            Ok(decision) => decision,
            Err(_) => Err(DecisionError::Timeout(self.config.decision_timeout.as_secs())),
        }
    }

    /// Foreground app as a display name when known, else its package.
    async fn current_app(&self) -> Option<String> {
        let dumpsys = self.actuator.execute_shell_command("dumpsys window").await;
        let package = parse_focused_package(&dumpsys)?;
        Some(
            get_app_name(&package)
                .map(str::to_string)
                .unwrap_or(package),
        )
    }

    fn record_step(
        &self,
        task: &mut Task,
        thinking: String,
        action: Option<crate::actions::Action>,
        success: bool,
        message: Option<String>,
        capture: &Capture,
    ) {
        let task_id = task.id.clone();
        let step = task.push_step(thinking, action, success, message).clone();
        self.history
            .record_step(&step.record(&task_id, Some(capture.image_base64.clone())));
        self.emit(AgentEvent::StepRecorded { task_id, step });
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(ref callback) = self.progress_callback {
            callback(&event);
        }
    }
}

fn cancelled() -> (LoopState, String) {
    (LoopState::Cancelled, "Task cancelled by user.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::actions::{Action, NoOverlay, Point};
    use crate::actuator::ScreencapError;
    use crate::testing::{
        png_bytes, Call, FakeActuator, FixedConfirmation, RecordingSink, ScriptedModel,
    };

    struct Harness {
        device: Arc<FakeActuator>,
        model: Arc<ScriptedModel>,
        sink: Arc<RecordingSink>,
        agent: DeviceAgent,
    }

    fn harness(device: FakeActuator, model: ScriptedModel, config: AgentConfig) -> Harness {
        let device = Arc::new(device);
        let model = Arc::new(model);
        let sink = Arc::new(RecordingSink::default());
        let session = DeviceSession::new(device.clone(), Arc::new(NoOverlay));
        let dispatcher = ActionDispatcher::new(&session, DispatcherConfig::instant())
            .with_confirmation(Arc::new(FixedConfirmation::new(true)))
            .with_history(sink.clone());
        let agent = DeviceAgent::new(&session, model.clone(), config)
            .with_capture(CaptureEngine::new(&session, CaptureConfig::instant()))
            .with_dispatcher(dispatcher)
            .with_history(sink.clone());
        Harness {
            device,
            model,
            sink,
            agent,
        }
    }

    fn screen_device() -> FakeActuator {
        FakeActuator::new().with_screencap(Ok(png_bytes(108, 192)))
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.max_parse_failures, 3);
        assert_eq!(config.max_decision_failures, 3);
        assert_eq!(config.decision_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_tap_then_finish() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec![
                "do(action=\"Tap\", element=[500, 500])",
                "finish(message=\"Icon opened\")",
            ]),
            AgentConfig::default(),
        );

        let result = h.agent.run("tap the icon in the middle").await.unwrap();

        assert_eq!(result.state, LoopState::Completed);
        assert!(result.success);
        assert_eq!(result.message, "Icon opened");
        assert_eq!(h.device.calls(), vec![Call::Tap(54, 96)]);
        assert_eq!(h.agent.state(), LoopState::Completed);

        let steps = result.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps[0].action,
            Some(Action::Tap {
                at: Point::new(0.5, 0.5),
                confirm: None
            })
        );
        assert!(steps[0].message.as_deref().unwrap().contains("54"));

        // The second decision sees the first step's outcome.
        let seen = h.model.seen();
        assert_eq!(seen[0].history_len, 0);
        assert_eq!(seen[1].history_len, 1);
        assert_eq!(seen[0].goal, "tap the icon in the middle");

        assert_eq!(h.sink.steps().len(), 2);
        let tasks = h.sink.tasks();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].success);
    }

    #[tokio::test]
    async fn test_parse_failures_are_bounded() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["hmm", "let me think", "???", "still no", "nope"]),
            AgentConfig::default().with_max_parse_failures(3),
        );

        let result = h.agent.run("do something").await.unwrap();

        assert_eq!(result.state, LoopState::Failed);
        assert_eq!(h.model.calls(), 3);
        assert_eq!(result.steps().len(), 3);
        assert!(result.steps().iter().all(|s| !s.success));
        assert_eq!(result.steps()[1].message.as_deref(), Some("let me think"));
        assert!(h.device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_counter_resets() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec![
                "hmm",
                "???",
                "do(action=\"Back\")",
                "nope",
                "finish(message=\"ok\")",
            ]),
            AgentConfig::default().with_max_parse_failures(3),
        );

        let result = h.agent.run("go back").await.unwrap();
        assert_eq!(result.state, LoopState::Completed);
        assert_eq!(h.model.calls(), 5);
    }

    #[tokio::test]
    async fn test_decision_failures_are_bounded() {
        let h = harness(
            screen_device(),
            ScriptedModel::with_results(vec![
                Err(DecisionError::Request("connection refused".into())),
                Err(DecisionError::Request("connection refused".into())),
            ]),
            AgentConfig::default().with_max_decision_failures(2),
        );

        let result = h.agent.run("open settings").await.unwrap();
        assert_eq!(result.state, LoopState::Failed);
        assert!(result.message.contains("connection refused"));
        assert_eq!(result.steps().len(), 2);
    }

    #[tokio::test]
    async fn test_no_device_fails_before_first_step() {
        let h = harness(
            screen_device().with_available(false),
            ScriptedModel::new(vec![]),
            AgentConfig::default(),
        );

        let result = h.agent.run("open settings").await.unwrap();
        assert_eq!(result.state, LoopState::Failed);
        assert!(result.message.contains("No device"));
        assert_eq!(h.model.calls(), 0);
        assert!(result.steps().is_empty());
    }

    #[tokio::test]
    async fn test_step_limit() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["do(action=\"Back\")"; 5]),
            AgentConfig::default().with_max_steps(2),
        );

        let result = h.agent.run("go back forever").await.unwrap();
        assert_eq!(result.state, LoopState::Failed);
        assert!(result.message.contains("limit of 2 steps"));
        let numbers: Vec<usize> = result.steps().iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_action_does_not_end_task() {
        let h = harness(
            screen_device().with_tap_response("Error: injection failed"),
            ScriptedModel::new(vec![
                "do(action=\"Tap\", element=[100, 100])",
                "finish(message=\"gave up tapping\")",
            ]),
            AgentConfig::default(),
        );

        let result = h.agent.run("tap").await.unwrap();
        assert_eq!(result.state, LoopState::Completed);
        assert!(!result.steps()[0].success);
    }

    #[tokio::test]
    async fn test_capture_failure_still_decides() {
        let h = harness(
            FakeActuator::new().with_screencap(Err(ScreencapError::SecureSurface)),
            ScriptedModel::new(vec!["finish(message=\"protected\")"]),
            AgentConfig::default(),
        );

        let result = h.agent.run("read the screen").await.unwrap();
        assert_eq!(result.state, LoopState::Completed);

        let seen = h.model.seen();
        assert!(seen[0].capture.is_fallback);
        assert!(seen[0].capture.is_sensitive);
        assert!(seen[0].screen_info.contains("protected_screen"));
    }

    #[tokio::test]
    async fn test_current_app_in_screen_info() {
        let h = harness(
            screen_device().with_shell_response(
                "dumpsys window",
                "  mCurrentFocus=Window{1f2e3d u0 com.android.settings/com.android.settings.Settings}",
            ),
            ScriptedModel::new(vec!["finish(message=\"done\")"]),
            AgentConfig::default(),
        );

        h.agent.run("check").await.unwrap();
        let info = &h.model.seen()[0].screen_info;
        assert!(!info.contains("unknown"), "{}", info);
    }

    #[tokio::test]
    async fn test_already_running() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["do(action=\"Wait\", duration=\"1 seconds\")"]),
            AgentConfig::default(),
        );
        let agent = Arc::new(h.agent);

        let running = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run("wait a bit").await })
        };
        while !agent.is_running() {
            tokio::task::yield_now().await;
        }

        assert_eq!(agent.run("second").await.unwrap_err(), AgentError::AlreadyRunning);

        let first = running.await.unwrap().unwrap();
        assert_eq!(first.state, LoopState::Completed);
    }

    #[tokio::test]
    async fn test_cancel_during_run() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["do(action=\"Wait\", duration=\"1 seconds\")"; 10]),
            AgentConfig::default(),
        );
        let agent = Arc::new(h.agent);

        let running = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run("wait forever").await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        agent.cancel();

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.state, LoopState::Cancelled);
        assert!(!result.success);
        assert_eq!(agent.state(), LoopState::Cancelled);
        assert!(h.model.calls() < 10);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_long_wait() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["do(action=\"Wait\", duration=\"3600 seconds\")"; 3]),
            AgentConfig::default(),
        );
        let agent = Arc::new(h.agent);

        let running = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run("wait an hour").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        agent.cancel();

        let result = tokio::time::timeout(Duration::from_secs(3), running)
            .await
            .expect("run should return soon after cancel")
            .unwrap()
            .unwrap();
        assert_eq!(result.state, LoopState::Cancelled);
        assert_eq!(agent.state(), LoopState::Cancelled);
        assert_eq!(h.model.calls(), 1);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["do(action=\"Home\")", "finish(message=\"home\")"]),
            AgentConfig::default(),
        );
        let agent = {
            let events = events.clone();
            h.agent.with_progress_callback(move |event| {
                let label = match event {
                    AgentEvent::TaskStarted { .. } => "started".to_string(),
                    AgentEvent::StepRecorded { step, .. } => format!("step {}", step.number),
                    AgentEvent::StateChanged(state) => format!("{:?}", state),
                    AgentEvent::TaskFinished(_) => "finished".to_string(),
                };
                events.lock().unwrap().push(label);
            })
        };

        agent.run("go home").await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["Running", "started", "step 1", "step 2", "Completed", "finished"]
        );
    }

    #[tokio::test]
    async fn test_run_again_after_terminal_state() {
        let h = harness(
            screen_device(),
            ScriptedModel::new(vec!["finish(message=\"one\")", "finish(message=\"two\")"]),
            AgentConfig::default(),
        );

        let first = h.agent.run("first").await.unwrap();
        let second = h.agent.run("second").await.unwrap();
        assert_eq!(first.message, "one");
        assert_eq!(second.message, "two");
        assert_ne!(first.task.id, second.task.id);
    }
}
