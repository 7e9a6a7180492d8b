//! Display discovery for devices that expose more than one display.
//!
//! `screencap -d` takes a physical display id as reported by SurfaceFlinger,
//! while focus is tracked per logical display by the window manager. The
//! helpers here parse the three system dumps needed to go from one to the
//! other.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::actuator::DeviceActuator;

static SF_DISPLAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Display (\d+)").expect("static regex"));
static LOGICAL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"displayId (\d+)").expect("static regex"));
static UNIQUE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"uniqueId "local:(\d+)""#).expect("static regex"));
static FOCUSED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"m(?:Top)?FocusedDisplayId=(\d+)").expect("static regex"));

/// Physical display ids from `dumpsys SurfaceFlinger --display-id`.
pub fn parse_physical_displays(dump: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in SF_DISPLAY_RE.captures_iter(dump) {
        let id = caps[1].to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Logical display id -> physical id, from `dumpsys display`.
pub fn parse_logical_displays(dump: &str) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    for line in dump.lines().filter(|l| l.contains("DisplayInfo{")) {
        let logical = LOGICAL_ID_RE
            .captures(line)
            .and_then(|c| c[1].parse::<u32>().ok());
        let physical = UNIQUE_ID_RE.captures(line).map(|c| c[1].to_string());
        if let (Some(logical), Some(physical)) = (logical, physical) {
            map.entry(logical).or_insert(physical);
        }
    }
    map
}

/// Logical display holding input focus, from `dumpsys window`.
pub fn parse_focused_display(dump: &str) -> Option<u32> {
    FOCUSED_RE
        .captures(dump)
        .and_then(|c| c[1].parse::<u32>().ok())
}

/// Order physical displays so the one serving the foreground UI comes first.
pub fn order_capture_candidates(
    physical: &[String],
    logical: &HashMap<u32, String>,
    focused: Option<u32>,
) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(physical.len());

    if let Some(preferred) = focused.and_then(|id| logical.get(&id)) {
        if physical.is_empty() || physical.contains(preferred) {
            ordered.push(preferred.clone());
        }
    }

    for id in physical {
        if !ordered.contains(id) {
            ordered.push(id.clone());
        }
    }
    ordered
}

/// Query the device and return physical display ids, foreground display first.
///
/// An empty list means the device reports a single (default) display.
pub async fn discover_capture_displays(actuator: &dyn DeviceActuator) -> Vec<String> {
    let physical = parse_physical_displays(
        &actuator
            .execute_shell_command("dumpsys SurfaceFlinger --display-id")
            .await,
    );
    if physical.len() <= 1 {
        return physical;
    }

    let logical = parse_logical_displays(&actuator.execute_shell_command("dumpsys display").await);
    let focused = parse_focused_display(
        &actuator
            .execute_shell_command("dumpsys window displays")
            .await,
    );

    let ordered = order_capture_candidates(&physical, &logical, focused);
    tracing::debug!(displays = ?ordered, focused = ?focused, "display candidates");
    ordered
}

/// Physical id to hand `screencap -d` for a pinned logical display.
///
/// Falls back to the logical id when `dumpsys display` has no mapping, except
/// for display 0, where `None` lets `screencap` pick the default display.
pub async fn capture_display_for(actuator: &dyn DeviceActuator, logical: u32) -> Option<String> {
    let mapped = parse_logical_displays(&actuator.execute_shell_command("dumpsys display").await)
        .remove(&logical);
    match mapped {
        Some(physical) => Some(physical),
        None if logical == 0 => None,
        None => {
            tracing::debug!(logical, "no physical id for display, passing it through");
            Some(logical.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeActuator;

    const SF_DUMP: &str = "Display 4619827259835644672 (HWC display 0): port=0 pnpId=GGL displayName=\"EMU_display_0\"\n\
Display 4619827551948147201 (HWC display 1): port=1 pnpId=GGL displayName=\"EMU_display_1\"\n";

    const DISPLAY_DUMP: &str = "Logical Displays: size=2\n\
  Display 0:\n\
    mBaseDisplayInfo=DisplayInfo{\"Built-in Screen\", displayId 0, displayGroupId 0, real 1080 x 2400, uniqueId \"local:4619827259835644672\", app 1080 x 2400}\n\
  Display 2:\n\
    mBaseDisplayInfo=DisplayInfo{\"HDMI Screen\", displayId 2, displayGroupId 1, real 1920 x 1080, uniqueId \"local:4619827551948147201\", app 1920 x 1080}\n";

    #[test]
    fn test_parse_physical_displays() {
        assert_eq!(
            parse_physical_displays(SF_DUMP),
            vec!["4619827259835644672", "4619827551948147201"]
        );
        assert!(parse_physical_displays("").is_empty());
    }

    #[test]
    fn test_parse_logical_displays() {
        let map = parse_logical_displays(DISPLAY_DUMP);
        assert_eq!(map.get(&0).map(String::as_str), Some("4619827259835644672"));
        assert_eq!(map.get(&2).map(String::as_str), Some("4619827551948147201"));
    }

    #[test]
    fn test_parse_focused_display() {
        assert_eq!(parse_focused_display("  mTopFocusedDisplayId=2\n"), Some(2));
        assert_eq!(parse_focused_display("mFocusedDisplayId=0"), Some(0));
        assert_eq!(parse_focused_display("nothing here"), None);
    }

    #[tokio::test]
    async fn test_capture_display_maps_logical_to_physical() {
        let fake = FakeActuator::new().with_shell_response("dumpsys display", DISPLAY_DUMP);
        assert_eq!(
            capture_display_for(&fake, 2).await.as_deref(),
            Some("4619827551948147201")
        );
        assert_eq!(
            capture_display_for(&fake, 0).await.as_deref(),
            Some("4619827259835644672")
        );

        let bare = FakeActuator::new().with_shell_response("dumpsys display", "");
        assert_eq!(capture_display_for(&bare, 3).await.as_deref(), Some("3"));
        assert_eq!(capture_display_for(&bare, 0).await, None);
    }

    #[test]
    fn test_foreground_display_comes_first() {
        let physical = parse_physical_displays(SF_DUMP);
        let logical = parse_logical_displays(DISPLAY_DUMP);

        let ordered = order_capture_candidates(&physical, &logical, Some(2));
        assert_eq!(ordered, vec!["4619827551948147201", "4619827259835644672"]);

        let unknown_focus = order_capture_candidates(&physical, &logical, Some(7));
        assert_eq!(unknown_focus, physical);
    }
}
