//! Text entry through ADB Keyboard.
//!
//! `input text` cannot carry arbitrary Unicode, so text goes through a helper
//! input method that listens for broadcasts. The broadcast is fire-and-forget:
//! its reported status says nothing reliable about whether the text landed,
//! and the agent loop verifies the result on the next screenshot instead.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::time::sleep;

use crate::actuator::{is_error_response, DeviceActuator};
use crate::session::DeviceSession;

/// Input method id of ADB Keyboard.
/// See: https://github.com/senzhk/ADBKeyBoard
pub const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";

const READ_IME_COMMAND: &str = "settings get secure default_input_method";

/// Timing and identity of the helper keyboard.
#[derive(Debug, Clone)]
pub struct KeyboardConfig {
    pub helper_ime: String,
    /// Pause after `ime set` before re-reading the default input method.
    pub switch_settle: Duration,
    /// The helper only listens once its input view exists.
    pub ready_delay: Duration,
    /// Time given to the target field to commit the text.
    pub commit_delay: Duration,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            helper_ime: ADB_KEYBOARD_IME.to_string(),
            switch_settle: Duration::from_millis(300),
            ready_delay: Duration::from_secs(1),
            commit_delay: Duration::from_secs(1),
        }
    }
}

impl KeyboardConfig {
    /// No delays at all; for tests and fakes.
    pub fn instant() -> Self {
        Self {
            switch_settle: Duration::ZERO,
            ready_delay: Duration::ZERO,
            commit_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_helper_ime(mut self, ime: impl Into<String>) -> Self {
        self.helper_ime = ime.into();
        self
    }
}

/// Outcome of [`KeyboardBridge::type_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputResult {
    pub success: bool,
    pub message: String,
}

impl InputResult {
    fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Puts the original keyboard back if typing is abandoned half way.
struct RestoreGuard {
    actuator: Arc<dyn DeviceActuator>,
    original: Option<String>,
}

impl RestoreGuard {
    fn take(mut self) -> Option<String> {
        self.original.take()
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        let Some(ime) = self.original.take() else {
            return;
        };
        tracing::warn!(ime = %ime, "text entry interrupted, restoring keyboard");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let actuator = self.actuator.clone();
            handle.spawn(async move {
                actuator
                    .execute_shell_command(&format!("ime set {}", ime))
                    .await;
            });
        }
    }
}

/// Switches to the helper keyboard, sends text, and switches back.
pub struct KeyboardBridge {
    actuator: Arc<dyn DeviceActuator>,
    config: KeyboardConfig,
}

impl KeyboardBridge {
    pub fn new(session: &DeviceSession, config: KeyboardConfig) -> Self {
        Self {
            actuator: session.actuator(),
            config,
        }
    }

    /// Type `text` into the focused field.
    ///
    /// Returns success once the text has been sent and the commit delay has
    /// elapsed; the only failure is a helper keyboard that cannot be activated.
    pub async fn type_text(&self, text: &str) -> InputResult {
        let current = self.current_ime().await;
        let helper = self.config.helper_ime.as_str();

        let original = if current.as_deref() == Some(helper) {
            None
        } else {
            if let Err(message) = self.activate_helper().await {
                self.restore(current.as_deref()).await;
                return InputResult::failure(message);
            }
            current
        };

        let guard = RestoreGuard {
            actuator: self.actuator.clone(),
            original,
        };

        self.send_text(text).await;

        let original = guard.take();
        self.restore(original.as_deref()).await;

        InputResult::success(format!("Text entered: {}", text))
    }

    /// Read the default input method, or `None` when it is not a usable id.
    async fn current_ime(&self) -> Option<String> {
        let raw = self.actuator.execute_shell_command(READ_IME_COMMAND).await;
        let ime = raw.trim();
        if ime.is_empty() || ime == "null" || !ime.contains('/') || is_error_response(ime) {
            tracing::warn!(value = %ime, "unexpected default input method, treating as default");
            return None;
        }
        Some(ime.to_string())
    }

    async fn activate_helper(&self) -> Result<(), String> {
        let helper = self.config.helper_ime.as_str();

        let enabled = self.actuator.execute_shell_command("ime list -s").await;
        if !enabled.lines().any(|line| line.trim() == helper) {
            tracing::info!(ime = %helper, "enabling helper keyboard");
            self.actuator
                .execute_shell_command(&format!("ime enable {}", helper))
                .await;
        }

        self.actuator
            .execute_shell_command(&format!("ime set {}", helper))
            .await;
        sleep(self.config.switch_settle).await;

        if self.current_ime().await.as_deref() != Some(helper) {
            return Err(format!(
                "Could not switch to the helper keyboard ({}). It must be installed and \
                 enabled on the device under Settings > System > Languages & input before \
                 text can be typed.",
                helper
            ));
        }
        Ok(())
    }

    async fn send_text(&self, text: &str) {
        sleep(self.config.ready_delay).await;

        self.actuator
            .execute_shell_command("am broadcast -a ADB_CLEAR_TEXT")
            .await;

        if !text.is_empty() {
            let encoded = STANDARD.encode(text.as_bytes());
            let response = self
                .actuator
                .execute_shell_command(&format!(
                    "am broadcast -a ADB_INPUT_B64 --es msg {}",
                    encoded
                ))
                .await;
            if is_error_response(&response) {
                tracing::warn!(response = %response, "text broadcast reported a problem");
            }
        }

        sleep(self.config.commit_delay).await;
    }

    async fn restore(&self, original: Option<&str>) {
        let Some(ime) = original else {
            return;
        };
        if ime == self.config.helper_ime {
            return;
        }
        let response = self
            .actuator
            .execute_shell_command(&format!("ime set {}", ime))
            .await;
        if is_error_response(&response) {
            tracing::warn!(ime = %ime, response = %response, "failed to restore keyboard");
        }
    }
}
