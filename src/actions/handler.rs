//! Action dispatcher: turns one decoded [`Action`] into device operations.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::action::{to_absolute, Action, Point};
use super::gesture::{build_swipe_path, swipe_duration_ms};
use super::overlay::{OverlaySuppressor, DEFAULT_OVERLAY_SETTLE};
use crate::actuator::{is_error_response, DeviceActuator, KeyCode, PixelPoint};
use crate::adb::{KeyboardBridge, KeyboardConfig};
use crate::config::{get_messages, AppResolver, Messages, PackageCatalog};
use crate::history::{Annotation, AnnotationKind, HistorySink, NullHistorySink};
use crate::session::DeviceSession;

/// Result of dispatching one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    /// Set only by `Finish`.
    pub should_finish: bool,
    pub message: String,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_finish: false,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: message.into(),
        }
    }

    pub fn finish(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_finish: true,
            message: message.into(),
        }
    }
}

/// The human on the other side of sensitive or manual steps.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// Ask before a sensitive tap. `false` vetoes it.
    async fn confirm(&self, message: &str) -> bool;

    /// Hand control to the user and return once they are done.
    async fn request_takeover(&self, message: &str);

    /// Let the user pick one of `options`; `None` if they picked nothing.
    async fn choose_option(&self, options: &[String]) -> Option<usize>;
}

/// Confirmation on the terminal, in the configured language.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleConfirmation {
    messages: &'static Messages,
}

impl ConsoleConfirmation {
    pub fn new(lang: &str) -> Self {
        Self {
            messages: get_messages(lang),
        }
    }
}

impl Default for ConsoleConfirmation {
    fn default() -> Self {
        Self::new("cn")
    }
}

fn prompt_line(prompt: String) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn ask(prompt: String) -> Option<String> {
    match tokio::task::spawn_blocking(move || prompt_line(prompt)).await {
        Ok(Ok(line)) => Some(line),
        Ok(Err(e)) => {
            tracing::warn!("failed to read from stdin: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!("stdin reader task failed: {}", e);
            None
        }
    }
}

#[async_trait]
impl ConfirmationHandler for ConsoleConfirmation {
    async fn confirm(&self, message: &str) -> bool {
        ask(format!(
            "⚠️ {}: {}\n(Y/N): ",
            self.messages.confirmation_required, message
        ))
        .await
        .map(|answer| answer.eq_ignore_ascii_case("y"))
        .unwrap_or(false)
    }

    async fn request_takeover(&self, message: &str) {
        ask(format!(
            "✋ {}: {}\n{}...",
            self.messages.manual_operation_required, message, self.messages.press_enter_when_done
        ))
        .await;
    }

    async fn choose_option(&self, options: &[String]) -> Option<usize> {
        let mut prompt = format!("{}:\n", self.messages.choose_option);
        for (i, option) in options.iter().enumerate() {
            prompt.push_str(&format!("  {}. {}\n", i + 1, option));
        }
        prompt.push_str("> ");

        let answer = ask(prompt).await?;
        let index = answer.parse::<usize>().ok()?;
        (1..=options.len()).contains(&index).then(|| index - 1)
    }
}

/// Timing for the dispatcher and the components it drives.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Extra wait after a swipe's own duration before the overlay comes back.
    pub swipe_margin: Duration,
    pub overlay_settle: Duration,
    pub keyboard: KeyboardConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            swipe_margin: Duration::from_millis(200),
            overlay_settle: DEFAULT_OVERLAY_SETTLE,
            keyboard: KeyboardConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// No delays; swipe waits and batch delays still apply as given.
    pub fn instant() -> Self {
        Self {
            swipe_margin: Duration::ZERO,
            overlay_settle: Duration::ZERO,
            keyboard: KeyboardConfig::instant(),
        }
    }
}

/// Maps decoded actions onto the actuator, the keyboard bridge and the
/// overlay suppressor.
pub struct ActionDispatcher {
    actuator: Arc<dyn DeviceActuator>,
    suppressor: OverlaySuppressor,
    keyboard: KeyboardBridge,
    resolver: Arc<dyn AppResolver>,
    confirmation: Arc<dyn ConfirmationHandler>,
    history: Arc<dyn HistorySink>,
    config: DispatcherConfig,
}

impl ActionDispatcher {
    pub fn new(session: &DeviceSession, config: DispatcherConfig) -> Self {
        Self {
            actuator: session.actuator(),
            suppressor: OverlaySuppressor::new(session).with_settle(config.overlay_settle),
            keyboard: KeyboardBridge::new(session, config.keyboard.clone()),
            resolver: Arc::new(PackageCatalog::with_device(session)),
            confirmation: Arc::new(ConsoleConfirmation::default()),
            history: Arc::new(NullHistorySink),
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AppResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = history;
        self
    }

    /// Execute `action` on a `screen_width` x `screen_height` display.
    pub async fn dispatch(
        &self,
        action: &Action,
        screen_width: u32,
        screen_height: u32,
    ) -> ActionResult {
        self.dispatch_with_cancel(action, screen_width, screen_height, &CancellationToken::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but a batch stops between sub-steps
    /// and a `Wait` ends early once `cancel` fires. Gestures always run to
    /// completion.
    #[async_recursion]
    pub async fn dispatch_with_cancel(
        &self,
        action: &Action,
        screen_width: u32,
        screen_height: u32,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let abs = |p: &Point| to_absolute(*p, screen_width, screen_height);
        tracing::debug!(action = action.name(), "dispatching");

        match action {
            Action::Tap { at, confirm } => self.tap(abs(at), confirm.as_deref()).await,
            Action::Swipe {
                start,
                end,
                humanized,
            } => self.swipe(abs(start), abs(end), *humanized).await,
            Action::LongPress { at, duration_ms } => {
                let p = abs(at);
                let response = self
                    .suppressor
                    .scoped_hide(self.actuator.long_press(p.x, p.y, *duration_ms))
                    .await;
                classify(response, format!("Long pressed at ({}, {})", p.x, p.y))
            }
            Action::DoubleTap { at } => {
                let p = abs(at);
                let response = self
                    .suppressor
                    .scoped_hide(self.actuator.double_tap(p.x, p.y))
                    .await;
                classify(response, format!("Double tapped at ({}, {})", p.x, p.y))
            }
            Action::Type { text } | Action::TypeName { text } => {
                let input = self
                    .suppressor
                    .scoped_hide(self.keyboard.type_text(text))
                    .await;
                if input.success {
                    ActionResult::success(input.message)
                } else {
                    ActionResult::failure(input.message)
                }
            }
            Action::Launch { app } => self.launch(app).await,
            Action::ListApps => self.list_apps().await,
            Action::Back => {
                // A visible soft keyboard swallows the first back press.
                self.actuator.press_key(KeyCode::Escape).await;
                let response = self.actuator.press_key(KeyCode::Back).await;
                classify(response, "Pressed back")
            }
            Action::Home => {
                let response = self.actuator.show_app_grid().await;
                classify(response, "Opened the home screen app grid")
            }
            Action::VolumeUp => classify(
                self.actuator.press_key(KeyCode::VolumeUp).await,
                "Volume up",
            ),
            Action::VolumeDown => classify(
                self.actuator.press_key(KeyCode::VolumeDown).await,
                "Volume down",
            ),
            Action::Power => classify(
                self.actuator.press_key(KeyCode::Power).await,
                "Pressed power",
            ),
            Action::Wait { seconds } => {
                let duration =
                    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::ZERO);
                // Nothing is touching the screen, so a wait ends as soon as cancel fires.
                tokio::select! {
                    _ = cancel.cancelled() => {
                        ActionResult::failure(format!("Wait of {} seconds cancelled", seconds))
                    }
                    _ = sleep(duration) => {
                        ActionResult::success(format!("Waited {} seconds", seconds))
                    }
                }
            }
            Action::TakeOver { message } => {
                self.confirmation.request_takeover(message).await;
                ActionResult::success("User completed the manual operation")
            }
            Action::Interact { options } => match self.confirmation.choose_option(options).await {
                Some(index) => match options.get(index) {
                    Some(choice) => ActionResult::success(format!(
                        "User chose option {}: {}",
                        index + 1,
                        choice
                    )),
                    None => ActionResult::success("User made no valid choice"),
                },
                None => ActionResult::success("User made no choice"),
            },
            Action::Note { message } => {
                self.history
                    .record_annotation(&Annotation::new(AnnotationKind::Note, message.as_str()));
                ActionResult::success("Note recorded")
            }
            Action::CallApi { instruction } => {
                self.history.record_annotation(&Annotation::new(
                    AnnotationKind::CallApi,
                    instruction.as_str(),
                ));
                ActionResult::success("API instruction recorded")
            }
            Action::Finish { message } => ActionResult::finish(message.as_str()),
            Action::Batch { steps, delay_ms } => {
                self.batch(steps, *delay_ms, screen_width, screen_height, cancel)
                    .await
            }
        }
    }

    async fn tap(&self, p: PixelPoint, confirm: Option<&str>) -> ActionResult {
        if let Some(message) = confirm {
            if !self.confirmation.confirm(message).await {
                tracing::info!("sensitive tap declined by user");
                return ActionResult::success("Cancelled by user");
            }
        }
        let response = self.suppressor.scoped_hide(self.actuator.tap(p.x, p.y)).await;
        classify(response, format!("Tapped at ({}, {})", p.x, p.y))
    }

    async fn swipe(&self, start: PixelPoint, end: PixelPoint, humanized: bool) -> ActionResult {
        let path = build_swipe_path(start, end, humanized);
        let duration_ms = swipe_duration_ms(start, end);
        let margin = self.config.swipe_margin;

        let response = self
            .suppressor
            .scoped_hide(async {
                let response = self.actuator.swipe(&path, duration_ms).await;
                // The call returns before the finger lifts.
                if !is_error_response(&response) {
                    sleep(Duration::from_millis(duration_ms) + margin).await;
                }
                response
            })
            .await;

        classify(
            response,
            format!(
                "Swiped from ({}, {}) to ({}, {})",
                start.x, start.y, end.x, end.y
            ),
        )
    }

    async fn launch(&self, app: &str) -> ActionResult {
        let package = if app.contains('.') {
            Some(app.to_string())
        } else {
            self.resolver.resolve(app).await
        };

        if let Some(package) = package {
            let response = self.actuator.launch_app(&package).await;
            if !is_error_response(&response) {
                return ActionResult::success(format!("Launched {}", package));
            }
            tracing::warn!(app = %app, package = %package, response = %response, "launch failed");
        } else {
            tracing::warn!(app = %app, "app name not resolved");
        }

        self.actuator.show_app_grid().await;
        ActionResult::success(format!(
            "Could not launch \"{}\" directly. The app grid is now open: find the app's icon \
             on screen and tap it, swiping to other pages if needed.",
            app
        ))
    }

    async fn list_apps(&self) -> ActionResult {
        let apps = self.resolver.list_all().await;
        if apps.is_empty() {
            return ActionResult::success(
                "No launchable apps could be listed. Open the app grid and look for the app visually.",
            );
        }

        let mut message = format!("Installed apps ({}):", apps.len());
        for app in &apps {
            message.push_str(&format!("\n- {} ({})", app.name, app.package));
        }
        ActionResult::success(message)
    }

    async fn batch(
        &self,
        steps: &[Action],
        delay_ms: u64,
        screen_width: u32,
        screen_height: u32,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let total = steps.len();
        let mut all_succeeded = true;
        let mut lines = Vec::with_capacity(total);

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(Duration::from_millis(delay_ms)) => {}
                }
                if cancel.is_cancelled() {
                    all_succeeded = false;
                    lines.push(format!("cancelled before step {}", i + 1));
                    break;
                }
            }

            let result = if matches!(step, Action::Batch { .. } | Action::Finish { .. }) {
                ActionResult::failure(format!("{} is not allowed inside a batch", step.name()))
            } else {
                self.dispatch_with_cancel(step, screen_width, screen_height, cancel)
                    .await
            };

            all_succeeded &= result.success;
            lines.push(format!(
                "{}. {} {}: {}",
                i + 1,
                step.name(),
                if result.success { "ok" } else { "failed" },
                result.message
            ));
        }

        let summary = format!("Batch of {} step(s):\n{}", total, lines.join("\n"));
        if all_succeeded {
            ActionResult::success(summary)
        } else {
            ActionResult::failure(summary)
        }
    }
}

fn classify(response: String, success_message: impl Into<String>) -> ActionResult {
    if is_error_response(&response) {
        ActionResult::failure(response.trim().to_string())
    } else {
        ActionResult::success(success_message)
    }
}
