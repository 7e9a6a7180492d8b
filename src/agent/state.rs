//! Loop state machine and the cancel/pause signals shared with callers.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::AgentError;

/// Where the agent loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// No task has run yet.
    Idle,
    Running,
    /// Running, but held at the next checkpoint.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::Idle
    }
}

impl LoopState {
    /// Whether a task currently owns the loop.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Shared control block for one agent instance.
///
/// Only one task can hold the loop at a time. Cancellation and pause are
/// cooperative: the loop observes them at [`LoopControl::checkpoint`].
pub struct LoopControl {
    state: Mutex<LoopState>,
    cancel: Mutex<CancellationToken>,
    paused: watch::Sender<bool>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(LoopState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
            paused,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state.lock().map(|s| *s).unwrap_or(LoopState::Failed)
    }

    /// Claim the loop for a new task.
    ///
    /// Returns the token the task must watch, or `AlreadyRunning` if another
    /// task holds the loop.
    pub fn try_start(&self) -> Result<CancellationToken, AgentError> {
        let mut state = self.state.lock().map_err(|_| AgentError::AlreadyRunning)?;
        if state.is_active() {
            return Err(AgentError::AlreadyRunning);
        }
        *state = LoopState::Running;

        let token = CancellationToken::new();
        if let Ok(mut current) = self.cancel.lock() {
            *current = token.clone();
        }
        self.paused.send_replace(false);
        Ok(token)
    }

    /// Release the loop with a terminal state.
    pub fn finish(&self, terminal: LoopState) {
        if let Ok(mut state) = self.state.lock() {
            *state = terminal;
        }
        self.paused.send_replace(false);
    }

    /// Request cancellation of the running task, if any.
    pub fn cancel(&self) {
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
    }

    /// Hold the running task at its next checkpoint. Returns false if no
    /// task was running.
    pub fn pause(&self) -> bool {
        self.transition(LoopState::Running, LoopState::Paused, true)
    }

    /// Let a paused task continue. Returns false if it was not paused.
    pub fn resume(&self) -> bool {
        self.transition(LoopState::Paused, LoopState::Running, false)
    }

    fn transition(&self, from: LoopState, to: LoopState, paused: bool) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if *state != from {
            return false;
        }
        *state = to;
        self.paused.send_replace(paused);
        true
    }

    /// Suspension point: waits while paused, returns false once `token` is
    /// cancelled.
    pub async fn checkpoint(&self, token: &CancellationToken) -> bool {
        let mut paused = self.paused.subscribe();
        loop {
            if token.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_single_claim() {
        let control = LoopControl::new();
        assert_eq!(control.state(), LoopState::Idle);

        let _token = control.try_start().unwrap();
        assert_eq!(control.state(), LoopState::Running);
        assert!(matches!(control.try_start(), Err(AgentError::AlreadyRunning)));

        control.finish(LoopState::Completed);
        assert_eq!(control.state(), LoopState::Completed);
        assert!(control.try_start().is_ok());
    }

    #[test]
    fn test_pause_resume_transitions() {
        let control = LoopControl::new();
        assert!(!control.pause());

        control.try_start().unwrap();
        assert!(control.pause());
        assert_eq!(control.state(), LoopState::Paused);
        assert!(matches!(control.try_start(), Err(AgentError::AlreadyRunning)));
        assert!(!control.pause());

        assert!(control.resume());
        assert_eq!(control.state(), LoopState::Running);
        assert!(!control.resume());
    }

    #[test]
    fn test_cancel_reaches_current_token_only() {
        let control = LoopControl::new();
        let first = control.try_start().unwrap();
        control.cancel();
        assert!(first.is_cancelled());

        control.finish(LoopState::Cancelled);
        let second = control.try_start().unwrap();
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn test_checkpoint_waits_while_paused() {
        let control = Arc::new(LoopControl::new());
        let token = control.try_start().unwrap();
        assert!(control.checkpoint(&token).await);

        control.pause();
        let waiter = {
            let control = control.clone();
            let token = token.clone();
            tokio::spawn(async move { control.checkpoint(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_checkpoint() {
        let control = Arc::new(LoopControl::new());
        let token = control.try_start().unwrap();
        control.pause();

        let waiter = {
            let control = control.clone();
            let token = token.clone();
            tokio::spawn(async move { control.checkpoint(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        assert!(!waiter.await.unwrap());
    }
}
