//! ADB-backed implementation of [`DeviceActuator`].

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::connection::adb_command;
use super::display::capture_display_for;
use crate::actuator::{DeviceActuator, KeyCode, PixelPoint, ScreencapError};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Gap between the two taps of a double tap.
const DOUBLE_TAP_GAP_SECS: &str = "0.1";

static FOCUS_PACKAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][\w]*(?:\.[\w]+)+)/").expect("static regex"));

/// Drives one Android device through the `adb` executable.
///
/// # Example
/// ```rust,no_run
/// use device_agent::actuator::DeviceActuator;
/// use device_agent::adb::AdbDevice;
///
/// # async fn demo() {
/// let device = AdbDevice::new(Some("emulator-5554".to_string()));
/// let response = device.tap(540, 960).await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: String,
    device_id: Option<String>,
    /// Logical display for `input -d`; `None` targets the default display.
    display_id: Option<u32>,
    /// Physical id of `display_id` for `screencap -d`, looked up once.
    capture_display: Arc<OnceCell<Option<String>>>,
}

impl AdbDevice {
    /// Create a device handle using `adb` from `PATH`.
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            adb_path: "adb".to_string(),
            device_id,
            display_id: None,
            capture_display: Arc::new(OnceCell::new()),
        }
    }

    /// Use a custom `adb` executable.
    pub fn with_adb_path(mut self, adb_path: impl Into<String>) -> Self {
        self.adb_path = adb_path.into();
        self
    }

    /// Route input events to a specific logical display.
    pub fn with_display(mut self, display_id: u32) -> Self {
        self.display_id = Some(display_id);
        self.capture_display = Arc::new(OnceCell::new());
        self
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn command(&self) -> Command {
        adb_command(&self.adb_path, self.device_id.as_deref())
    }

    /// Run an adb subcommand and return combined stdout + stderr.
    async fn run(&self, args: &[&str]) -> String {
        tracing::debug!(args = ?args, "adb");
        match self.command().args(args).output().await {
            Ok(output) => format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
            .trim()
            .to_string(),
            Err(e) => format!("Error: failed to run adb: {}", e),
        }
    }

    /// `input` with the display selector applied.
    async fn input(&self, args: &[String]) -> String {
        let mut full: Vec<String> = vec!["shell".into(), "input".into()];
        if let Some(display) = self.display_id {
            full.push("-d".into());
            full.push(display.to_string());
        }
        full.extend(args.iter().cloned());
        let refs: Vec<&str> = full.iter().map(String::as_str).collect();
        self.run(&refs).await
    }

    fn input_prefix(&self) -> String {
        match self.display_id {
            Some(display) => format!("input -d {}", display),
            None => "input".to_string(),
        }
    }
}

/// Build a single shell line that replays `points` as one continuous touch.
fn motion_event_script(input: &str, points: &[PixelPoint], duration_ms: u64) -> String {
    let segments = points.len().saturating_sub(1).max(1) as u64;
    let pause = duration_ms as f64 / segments as f64 / 1000.0;

    let mut parts = Vec::with_capacity(points.len() * 2);
    for (i, p) in points.iter().enumerate() {
        let phase = if i == 0 {
            "DOWN"
        } else if i == points.len() - 1 {
            "UP"
        } else {
            "MOVE"
        };
        if i > 0 {
            parts.push(format!("sleep {:.3}", pause));
        }
        parts.push(format!("{} motionevent {} {} {}", input, phase, p.x, p.y));
    }
    parts.join("; ")
}

#[async_trait]
impl DeviceActuator for AdbDevice {
    async fn is_available(&self) -> bool {
        self.run(&["get-state"]).await == "device"
    }

    async fn tap(&self, x: i32, y: i32) -> String {
        self.input(&["tap".into(), x.to_string(), y.to_string()])
            .await
    }

    async fn swipe(&self, points: &[PixelPoint], duration_ms: u64) -> String {
        match points {
            [] | [_] => "Error: swipe needs at least two points".to_string(),
            [start, end] => {
                self.input(&[
                    "swipe".into(),
                    start.x.to_string(),
                    start.y.to_string(),
                    end.x.to_string(),
                    end.y.to_string(),
                    duration_ms.to_string(),
                ])
                .await
            }
            _ => {
                let script = motion_event_script(&self.input_prefix(), points, duration_ms);
                self.run(&["shell", &script]).await
            }
        }
    }

    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> String {
        self.input(&[
            "swipe".into(),
            x.to_string(),
            y.to_string(),
            x.to_string(),
            y.to_string(),
            duration_ms.to_string(),
        ])
        .await
    }

    async fn double_tap(&self, x: i32, y: i32) -> String {
        let input = self.input_prefix();
        let script = format!(
            "{input} tap {x} {y}; sleep {DOUBLE_TAP_GAP_SECS}; {input} tap {x} {y}"
        );
        self.run(&["shell", &script]).await
    }

    async fn press_key(&self, key: KeyCode) -> String {
        self.input(&["keyevent".into(), key.android_name().into()])
            .await
    }

    async fn launch_app(&self, package: &str) -> String {
        let output = self
            .run(&[
                "shell",
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await;

        if output.contains("No activities found") || output.contains("monkey aborted") {
            format!("Error: no launchable activity for {}", package)
        } else {
            output
        }
    }

    async fn show_app_grid(&self) -> String {
        self.run(&[
            "shell",
            "am",
            "start",
            "--user",
            "current",
            "-a",
            "android.intent.action.MAIN",
            "-c",
            "android.intent.category.HOME",
        ])
        .await
    }

    async fn execute_shell_command(&self, command: &str) -> String {
        self.run(&["shell", command]).await
    }

    async fn screencap(&self) -> Result<Vec<u8>, ScreencapError> {
        let mut args = vec!["exec-out".to_string(), "screencap".to_string()];
        if let Some(logical) = self.display_id {
            let physical = self
                .capture_display
                .get_or_init(|| capture_display_for(self, logical))
                .await;
            if let Some(physical) = physical {
                args.push("-d".into());
                args.push(physical.clone());
            }
        }
        args.push("-p".into());

        let output = self
            .command()
            .args(&args)
            .output()
            .await
            .map_err(|e| ScreencapError::Unavailable(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Status: -1") || stderr.contains("secure") {
            return Err(ScreencapError::SecureSurface);
        }

        let png = output.stdout;
        if png.len() < PNG_MAGIC.len() || &png[..PNG_MAGIC.len()] != PNG_MAGIC {
            return Err(ScreencapError::Unavailable(format!(
                "invalid screencap output ({} bytes): {}",
                png.len(),
                stderr.trim()
            )));
        }

        Ok(png)
    }

    async fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let output = self
            .command()
            .args(["exec-out", "cat", path])
            .output()
            .await
            .ok()?;

        if output.stdout.is_empty() || !output.status.success() {
            return None;
        }
        Some(output.stdout)
    }

    fn display_id(&self) -> Option<u32> {
        self.display_id
    }
}

/// Extract the focused package from `dumpsys window` output.
pub fn parse_focused_package(dumpsys: &str) -> Option<String> {
    dumpsys
        .lines()
        .filter(|line| line.contains("mCurrentFocus") || line.contains("mFocusedApp"))
        .find_map(|line| {
            FOCUS_PACKAGE_RE
                .captures(line)
                .map(|caps| caps[1].to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_event_script() {
        let points = [
            PixelPoint::new(100, 1000),
            PixelPoint::new(120, 700),
            PixelPoint::new(150, 400),
        ];
        let script = motion_event_script("input", &points, 1000);

        assert_eq!(
            script,
            "input motionevent DOWN 100 1000; sleep 0.500; input motionevent MOVE 120 700; \
             sleep 0.500; input motionevent UP 150 400"
        );
    }

    #[test]
    fn test_input_prefix_with_display() {
        let device = AdbDevice::new(None).with_display(2);
        assert_eq!(device.input_prefix(), "input -d 2");
        assert_eq!(device.display_id(), Some(2));
        assert_eq!(AdbDevice::new(None).input_prefix(), "input");
        assert_eq!(AdbDevice::new(None).display_id(), None);
    }

    #[test]
    fn test_parse_focused_package() {
        let dumpsys = "  mCurrentFocus=Window{5d3c1a2 u0 com.tencent.mm/com.tencent.mm.ui.LauncherUI}\n\
                       mFocusedApp=ActivityRecord{9a1 u0 com.tencent.mm/.ui.LauncherUI t12}";
        assert_eq!(
            parse_focused_package(dumpsys).as_deref(),
            Some("com.tencent.mm")
        );
        assert_eq!(parse_focused_package("mCurrentFocus=null"), None);
    }
}
