//! Single-worker task queue in front of a [`DeviceAgent`].
//!
//! Goals are submitted through a cloneable [`WorkerHandle`] and run strictly
//! one after another on a dedicated tokio task.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::device_agent::{AgentError, DeviceAgent};
use super::state::LoopState;
use super::task::TaskResult;

/// Errors from the worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Worker has shut down")]
    ChannelClosed,
    #[error(transparent)]
    Agent(#[from] AgentError),
}

struct Job {
    goal: String,
    reply: oneshot::Sender<Result<TaskResult, AgentError>>,
}

/// A submitted goal; await [`PendingTask::wait`] for its result.
pub struct PendingTask {
    reply: oneshot::Receiver<Result<TaskResult, AgentError>>,
}

impl PendingTask {
    pub async fn wait(self) -> Result<TaskResult, WorkerError> {
        let result = self.reply.await.map_err(|_| WorkerError::ChannelClosed)?;
        Ok(result?)
    }
}

/// Handle for controlling the worker from outside.
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<Job>,
    agent: Arc<DeviceAgent>,
    shutdown: CancellationToken,
    /// Token of the dequeued goal; set before the goal starts running.
    current: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerHandle {
    /// Queue a goal behind any goals already submitted.
    pub async fn submit(&self, goal: impl Into<String>) -> Result<PendingTask, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job {
                goal: goal.into(),
                reply,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        Ok(PendingTask { reply: rx })
    }

    /// Cancel the goal that is currently running. Queued goals still run.
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            if let Some(token) = current.as_ref() {
                token.cancel();
            }
        }
        self.agent.cancel();
    }

    pub fn pause(&self) -> bool {
        self.agent.pause()
    }

    pub fn resume(&self) -> bool {
        self.agent.resume()
    }

    pub fn state(&self) -> LoopState {
        self.agent.state()
    }

    /// Stop the worker: the running goal is cancelled, queued goals are
    /// dropped. Waits for the worker task to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.agent.cancel();
        if let Some(join) = self.join.lock().await.take() {
            if let Err(e) = join.await {
                tracing::error!("agent worker panicked: {}", e);
            }
        }
    }
}

/// Spawns the worker loop.
pub struct AgentWorker;

impl AgentWorker {
    /// Start a worker for `agent` on the current tokio runtime.
    pub fn spawn(agent: Arc<DeviceAgent>) -> WorkerHandle {
        Self::spawn_with_capacity(agent, 16)
    }

    pub fn spawn_with_capacity(agent: Arc<DeviceAgent>, capacity: usize) -> WorkerHandle {
        let (jobs, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let shutdown = CancellationToken::new();
        let current = Arc::new(std::sync::Mutex::new(None));

        let join = {
            let agent = agent.clone();
            let shutdown = shutdown.clone();
            let current = current.clone();
            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        job = rx.recv() => match job {
                            Some(job) => job,
                            None => break,
                        },
                    };

                    let job_cancel = shutdown.child_token();
                    set_current(&current, Some(job_cancel.clone()));
                    // Shutdown landed while the goal was being dequeued.
                    if shutdown.is_cancelled() {
                        break;
                    }

                    tracing::info!(goal = %job.goal, "worker picked up goal");
                    let result = run_goal(&agent, &job.goal, &job_cancel).await;
                    set_current(&current, None);
                    // The submitter may have stopped waiting.
                    let _ = job.reply.send(result);
                }
                tracing::info!("agent worker stopped");
            })
        };

        WorkerHandle {
            jobs,
            agent,
            shutdown,
            current,
            join: Arc::new(Mutex::new(Some(join))),
        }
    }
}

fn set_current(
    current: &std::sync::Mutex<Option<CancellationToken>>,
    token: Option<CancellationToken>,
) {
    if let Ok(mut slot) = current.lock() {
        *slot = token;
    }
}

/// Run one goal, forwarding `cancel` to the agent even when it fired before
/// the run installed its own token.
async fn run_goal(
    agent: &DeviceAgent,
    goal: &str,
    cancel: &CancellationToken,
) -> Result<TaskResult, AgentError> {
    let run = agent.run(goal);
    tokio::pin!(run);
    // `run` is polled first so its token exists before it is cancelled.
    tokio::select! {
        biased;
        result = &mut run => return result,
        _ = cancel.cancelled() => {}
    }
    agent.cancel();
    run.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::actions::{ActionDispatcher, DispatcherConfig, NoOverlay};
    use crate::adb::{CaptureConfig, CaptureEngine};
    use crate::agent::AgentConfig;
    use crate::session::DeviceSession;
    use crate::testing::{png_bytes, FakeActuator, ScriptedModel};

    fn agent(model: ScriptedModel) -> (Arc<DeviceAgent>, Arc<ScriptedModel>) {
        let device = Arc::new(FakeActuator::new().with_screencap(Ok(png_bytes(108, 192))));
        let model = Arc::new(model);
        let session = DeviceSession::new(device, Arc::new(NoOverlay));
        let agent = DeviceAgent::new(&session, model.clone(), AgentConfig::default())
            .with_capture(CaptureEngine::new(&session, CaptureConfig::instant()))
            .with_dispatcher(ActionDispatcher::new(&session, DispatcherConfig::instant()));
        (Arc::new(agent), model)
    }

    #[tokio::test]
    async fn test_goals_run_in_order() {
        let (agent, model) = agent(ScriptedModel::new(vec![
            "finish(message=\"first done\")",
            "finish(message=\"second done\")",
        ]));
        let handle = AgentWorker::spawn(agent);

        let first = handle.submit("first").await.unwrap();
        let second = handle.submit("second").await.unwrap();

        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();
        assert_eq!(first.message, "first done");
        assert_eq!(second.message, "second done");
        assert_eq!(first.task.goal, "first");
        assert_eq!(model.calls(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_through_handle() {
        let (agent, _model) = agent(ScriptedModel::new(vec![
            "do(action=\"Wait\", duration=\"1 seconds\")";
            5
        ]));
        let handle = AgentWorker::spawn(agent);

        let pending = handle.submit("wait").await.unwrap();
        while !handle.state().is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel();

        let result = pending.wait().await.unwrap();
        assert_eq!(result.state, LoopState::Cancelled);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_before_goal_starts_still_stops_it() {
        let (agent, model) = agent(ScriptedModel::new(vec![
            "do(action=\"Wait\", duration=\"3600 seconds\")";
            3
        ]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            run_goal(&agent, "wait", &cancel),
        )
        .await
        .expect("goal should stop promptly")
        .unwrap();

        assert_eq!(result.state, LoopState::Cancelled);
        assert!(model.calls() <= 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_long_goal() {
        let (agent, _model) = agent(ScriptedModel::new(vec![
            "do(action=\"Wait\", duration=\"3600 seconds\")";
            3
        ]));
        let handle = AgentWorker::spawn(agent);
        let pending = handle.submit("wait").await.unwrap();
        while !handle.state().is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(3), handle.shutdown())
            .await
            .expect("shutdown should not wait for the goal");
        let result = pending.wait().await.unwrap();
        assert_eq!(result.state, LoopState::Cancelled);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let (agent, _model) = agent(ScriptedModel::new(vec![]));
        let handle = AgentWorker::spawn(agent);
        handle.shutdown().await;

        assert_eq!(
            handle.submit("late").await.err(),
            Some(WorkerError::ChannelClosed)
        );
    }
}
