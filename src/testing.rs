//! Recording fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use crate::actions::{ConfirmationHandler, StatusOverlay};
use crate::actuator::{DeviceActuator, KeyCode, PixelPoint, ScreencapError};
use crate::adb::{Capture, ADB_KEYBOARD_IME};
use crate::history::{Annotation, HistorySink, StepRecord, TaskRecord};
use crate::model::{Decision, DecisionError, DecisionModel, DecisionRequest};

pub const GBOARD_IME: &str = "com.google.android.inputmethod.latin/com.android.inputmethod.latin.LatinIME";

/// A PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Non-shell actuator calls, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Tap(i32, i32),
    Swipe(Vec<PixelPoint>, u64),
    LongPress(i32, i32, u64),
    DoubleTap(i32, i32),
    Key(KeyCode),
    Launch(String),
    AppGrid,
}

struct FakeState {
    calls: Vec<Call>,
    shell: Vec<String>,
    overlay_seen: Vec<bool>,
    ime: String,
    helper_enabled: bool,
    files: HashMap<String, Vec<u8>>,
}

/// In-memory device that records everything and emulates the few shell
/// commands the crate relies on.
pub struct FakeActuator {
    state: Mutex<FakeState>,
    available: bool,
    helper_enable_allowed: bool,
    shell_responses: Vec<(String, String)>,
    tap_response: String,
    tap_responses_at: HashMap<(i32, i32), String>,
    tap_panics: bool,
    launch_response: String,
    screencap: Result<Vec<u8>, ScreencapError>,
    shell_capture: Option<Vec<u8>>,
    shell_delay: Option<Duration>,
    display_id: Option<u32>,
    overlay: Option<Arc<dyn StatusOverlay>>,
}

impl FakeActuator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                shell: Vec::new(),
                overlay_seen: Vec::new(),
                ime: GBOARD_IME.to_string(),
                helper_enabled: false,
                files: HashMap::new(),
            }),
            available: true,
            helper_enable_allowed: false,
            shell_responses: Vec::new(),
            tap_response: String::new(),
            tap_responses_at: HashMap::new(),
            tap_panics: false,
            launch_response: "Events injected: 1".to_string(),
            screencap: Err(ScreencapError::Unavailable("not scripted".to_string())),
            shell_capture: None,
            shell_delay: None,
            display_id: None,
            overlay: None,
        }
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_ime(self, ime: &str) -> Self {
        self.state.lock().unwrap().ime = ime.to_string();
        self
    }

    pub fn with_helper_enabled(self, enabled: bool) -> Self {
        self.state.lock().unwrap().helper_enabled = enabled;
        self
    }

    /// Whether `ime enable` of the helper succeeds.
    pub fn with_helper_enable_allowed(mut self, allowed: bool) -> Self {
        self.helper_enable_allowed = allowed;
        self
    }

    /// Answer shell commands starting with `prefix`; checked before the
    /// built-in emulation.
    pub fn with_shell_response(mut self, prefix: &str, response: &str) -> Self {
        self.shell_responses
            .push((prefix.to_string(), response.to_string()));
        self
    }

    pub fn with_tap_response(mut self, response: &str) -> Self {
        self.tap_response = response.to_string();
        self
    }

    pub fn with_tap_response_at(mut self, x: i32, y: i32, response: &str) -> Self {
        self.tap_responses_at.insert((x, y), response.to_string());
        self
    }

    pub fn with_tap_panic(mut self) -> Self {
        self.tap_panics = true;
        self
    }

    pub fn with_launch_response(mut self, response: &str) -> Self {
        self.launch_response = response.to_string();
        self
    }

    pub fn with_screencap(mut self, result: Result<Vec<u8>, ScreencapError>) -> Self {
        self.screencap = result;
        self
    }

    /// Bytes `screencap -p <path>` writes to the device.
    pub fn with_shell_capture(mut self, bytes: Vec<u8>) -> Self {
        self.shell_capture = Some(bytes);
        self
    }

    /// Every shell command takes `delay` before answering.
    pub fn with_shell_delay(mut self, delay: Duration) -> Self {
        self.shell_delay = Some(delay);
        self
    }

    /// Pin the fake to a logical display, as `AdbDevice::with_display` does.
    pub fn with_display_id(mut self, display_id: u32) -> Self {
        self.display_id = Some(display_id);
        self
    }

    /// Record the overlay's visibility at every touch call.
    pub fn with_overlay_watch(mut self, overlay: Arc<dyn StatusOverlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn shell_commands(&self) -> Vec<String> {
        self.state.lock().unwrap().shell.clone()
    }

    pub fn overlay_seen(&self) -> Vec<bool> {
        self.state.lock().unwrap().overlay_seen.clone()
    }

    pub fn current_ime(&self) -> String {
        self.state.lock().unwrap().ime.clone()
    }

    fn record(&self, call: Call) {
        let seen = self.overlay.as_ref().map(|o| o.is_visible());
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(seen) = seen {
            state.overlay_seen.push(seen);
        }
    }

    fn emulate_shell(&self, command: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let args: Vec<&str> = command.split_whitespace().collect();
        match args.as_slice() {
            ["settings", "get", "secure", "default_input_method"] => state.ime.clone(),
            ["ime", "list", "-s"] => {
                let mut list = GBOARD_IME.to_string();
                if state.helper_enabled {
                    list.push('\n');
                    list.push_str(ADB_KEYBOARD_IME);
                }
                list
            }
            ["ime", "enable", id] => {
                if *id == ADB_KEYBOARD_IME && !self.helper_enable_allowed {
                    format!("Unknown input method {} cannot be enabled for user #0", id)
                } else {
                    if *id == ADB_KEYBOARD_IME {
                        state.helper_enabled = true;
                    }
                    format!("Input method {}: now enabled for user #0", id)
                }
            }
            ["ime", "set", id] => {
                if *id == ADB_KEYBOARD_IME && !state.helper_enabled {
                    format!("Unknown input method {} cannot be selected for user #0", id)
                } else {
                    state.ime = id.to_string();
                    format!("Input method {} selected for user #0", id)
                }
            }
            ["am", "broadcast", ..] => "Broadcast completed: result=0".to_string(),
            ["screencap", .., path] if path.starts_with('/') => {
                if let Some(bytes) = &self.shell_capture {
                    state.files.insert(path.to_string(), bytes.clone());
                }
                String::new()
            }
            ["stat", "-c", "%s", path] => match state.files.get(*path) {
                Some(bytes) => bytes.len().to_string(),
                None => format!("stat: '{}': No such file or directory", path),
            },
            ["rm", "-f", path] => {
                state.files.remove(*path);
                String::new()
            }
            _ => String::new(),
        }
    }
}

#[async_trait]
impl DeviceActuator for FakeActuator {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn tap(&self, x: i32, y: i32) -> String {
        if self.tap_panics {
            panic!("tap blew up");
        }
        self.record(Call::Tap(x, y));
        self.tap_responses_at
            .get(&(x, y))
            .cloned()
            .unwrap_or_else(|| self.tap_response.clone())
    }

    async fn swipe(&self, points: &[PixelPoint], duration_ms: u64) -> String {
        self.record(Call::Swipe(points.to_vec(), duration_ms));
        String::new()
    }

    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> String {
        self.record(Call::LongPress(x, y, duration_ms));
        String::new()
    }

    async fn double_tap(&self, x: i32, y: i32) -> String {
        self.record(Call::DoubleTap(x, y));
        String::new()
    }

    async fn press_key(&self, key: KeyCode) -> String {
        self.record(Call::Key(key));
        String::new()
    }

    async fn launch_app(&self, package: &str) -> String {
        self.record(Call::Launch(package.to_string()));
        self.launch_response.clone()
    }

    async fn show_app_grid(&self) -> String {
        self.record(Call::AppGrid);
        "Starting: Intent { act=android.intent.action.MAIN cat=[android.intent.category.HOME] }"
            .to_string()
    }

    async fn execute_shell_command(&self, command: &str) -> String {
        self.state.lock().unwrap().shell.push(command.to_string());
        if let Some(delay) = self.shell_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((_, response)) = self
            .shell_responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return response.clone();
        }
        self.emulate_shell(command)
    }

    async fn screencap(&self) -> Result<Vec<u8>, ScreencapError> {
        self.screencap.clone()
    }

    async fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn display_id(&self) -> Option<u32> {
        self.display_id
    }
}

/// Overlay that remembers every visibility change.
pub struct RecordingOverlay {
    visible: Mutex<bool>,
    events: Mutex<Vec<&'static str>>,
}

impl RecordingOverlay {
    pub fn visible() -> Self {
        Self {
            visible: Mutex::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn hidden() -> Self {
        Self {
            visible: Mutex::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

impl StatusOverlay for RecordingOverlay {
    fn is_visible(&self) -> bool {
        *self.visible.lock().unwrap()
    }

    fn hide(&self) {
        *self.visible.lock().unwrap() = false;
        self.events.lock().unwrap().push("hide");
    }

    fn show(&self) {
        *self.visible.lock().unwrap() = true;
        self.events.lock().unwrap().push("show");
    }
}

/// Confirmation collaborator with canned answers.
pub struct FixedConfirmation {
    answer: Mutex<bool>,
    choice: Mutex<Option<usize>>,
    confirmations: Mutex<Vec<String>>,
    takeovers: Mutex<Vec<String>>,
}

impl FixedConfirmation {
    pub fn new(answer: bool) -> Self {
        Self {
            answer: Mutex::new(answer),
            choice: Mutex::new(Some(0)),
            confirmations: Mutex::new(Vec::new()),
            takeovers: Mutex::new(Vec::new()),
        }
    }

    pub fn set_answer(&self, answer: bool) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn set_choice(&self, choice: Option<usize>) {
        *self.choice.lock().unwrap() = choice;
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.lock().unwrap().clone()
    }

    pub fn takeovers(&self) -> Vec<String> {
        self.takeovers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationHandler for FixedConfirmation {
    async fn confirm(&self, message: &str) -> bool {
        self.confirmations.lock().unwrap().push(message.to_string());
        *self.answer.lock().unwrap()
    }

    async fn request_takeover(&self, message: &str) {
        self.takeovers.lock().unwrap().push(message.to_string());
    }

    async fn choose_option(&self, _options: &[String]) -> Option<usize> {
        *self.choice.lock().unwrap()
    }
}

/// History sink that keeps everything in memory.
#[derive(Default)]
pub struct RecordingSink {
    steps: Mutex<Vec<StepRecord>>,
    tasks: Mutex<Vec<TaskRecord>>,
    annotations: Mutex<Vec<Annotation>>,
}

impl RecordingSink {
    pub fn steps(&self) -> Vec<StepRecord> {
        self.steps.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.annotations.lock().unwrap().clone()
    }
}

impl HistorySink for RecordingSink {
    fn record_step(&self, step: &StepRecord) {
        self.steps.lock().unwrap().push(step.clone());
    }

    fn record_task(&self, task: &TaskRecord) {
        self.tasks.lock().unwrap().push(task.clone());
    }

    fn record_annotation(&self, annotation: &Annotation) {
        self.annotations.lock().unwrap().push(annotation.clone());
    }
}

/// What the scripted model saw on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub goal: String,
    pub history_len: usize,
    pub screen_info: String,
    pub capture: Capture,
}

/// Decision model that replays a fixed script of raw answers.
///
/// Each entry is decoded like a real model answer; `Err` entries simulate a
/// failed request. When the script runs out it keeps returning `finish`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, DecisionError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedModel {
    pub fn new(answers: Vec<&str>) -> Self {
        Self::with_results(answers.into_iter().map(|a| Ok(a.to_string())).collect())
    }

    pub fn with_results(results: Vec<Result<String, DecisionError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionModel for ScriptedModel {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
        self.seen.lock().unwrap().push(SeenRequest {
            goal: request.goal.to_string(),
            history_len: request.history.len(),
            screen_info: request.screen_info.to_string(),
            capture: request.capture.clone(),
        });
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(raw)) => Ok(Decision::from_answer(String::new(), &raw)),
            Some(Err(e)) => Err(e),
            None => Ok(Decision::from_answer(
                String::new(),
                "finish(message=\"script exhausted\")",
            )),
        }
    }
}
