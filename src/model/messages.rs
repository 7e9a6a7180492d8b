//! Chat messages for the decision model.

use serde_json::{json, Value};

use super::decision::{DecisionRequest, Turn};

/// Builds OpenAI-style chat messages.
pub struct MessageBuilder;

impl MessageBuilder {
    pub fn system(content: &str) -> Value {
        json!({ "role": "system", "content": content })
    }

    /// User message; the screenshot, if any, goes before the text.
    pub fn user(text: &str, image_base64: Option<&str>) -> Value {
        let mut content = Vec::with_capacity(2);
        if let Some(image) = image_base64 {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{}", image) }
            }));
        }
        content.push(json!({ "type": "text", "text": text }));
        json!({ "role": "user", "content": content })
    }

    /// Assistant message in the `<think>`/`<answer>` format the model writes.
    pub fn answer(thinking: &str, answer: &str) -> Value {
        json!({
            "role": "assistant",
            "content": format!("<think>{}</think><answer>{}</answer>", thinking, answer)
        })
    }

    /// JSON object describing the screen for the model.
    pub fn build_screen_info(
        current_app: Option<&str>,
        is_sensitive: bool,
        is_fallback: bool,
    ) -> String {
        let mut info = json!({ "current_app": current_app.unwrap_or("unknown") });
        if is_fallback {
            info["screenshot"] = json!("unavailable, the image is a placeholder");
        }
        if is_sensitive {
            info["protected_screen"] = json!(true);
        }
        info.to_string()
    }

    /// Full conversation for one decision.
    ///
    /// Earlier steps are replayed as text only; the screenshot is attached
    /// to the final user message.
    pub fn build_conversation(system_prompt: &str, request: &DecisionRequest<'_>) -> Vec<Value> {
        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
        messages.push(Self::system(system_prompt));

        let mut previous: Option<&Turn> = None;
        for turn in request.history {
            let text = Self::turn_text(request.goal, previous, &turn.screen_info);
            messages.push(Self::user(&text, None));
            messages.push(Self::answer(&turn.thinking, &turn.answer));
            previous = Some(turn);
        }

        let text = Self::turn_text(request.goal, previous, request.screen_info);
        messages.push(Self::user(&text, Some(&request.capture.image_base64)));
        messages
    }

    // The goal opens the conversation; later turns report what the previous
    // answer did.
    fn turn_text(goal: &str, previous: Option<&Turn>, screen_info: &str) -> String {
        match previous {
            None => format!("{}\n\n{}", goal, screen_info),
            Some(turn) => format!(
                "** Previous Action Result **\n\n{}\n\n** Screen Info **\n\n{}",
                turn.outcome, screen_info
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::{Capture, CaptureConfig};

    #[test]
    fn test_user_message_with_image() {
        let message = MessageBuilder::user("Look at this", Some("base64data"));
        assert_eq!(message["role"], "user");
        assert_eq!(message["content"][0]["type"], "image_url");
        assert_eq!(
            message["content"][0]["image_url"]["url"],
            "data:image/jpeg;base64,base64data"
        );
        assert_eq!(message["content"][1]["text"], "Look at this");
    }

    #[test]
    fn test_screen_info() {
        let info = MessageBuilder::build_screen_info(Some("微信"), false, false);
        let info: Value = serde_json::from_str(&info).unwrap();
        assert_eq!(info["current_app"], "微信");
        assert!(info.get("protected_screen").is_none());

        let info = MessageBuilder::build_screen_info(None, true, true);
        let info: Value = serde_json::from_str(&info).unwrap();
        assert_eq!(info["current_app"], "unknown");
        assert_eq!(info["protected_screen"], true);
        assert!(info["screenshot"].as_str().unwrap().contains("placeholder"));
    }

    #[test]
    fn test_first_turn_carries_goal_and_image() {
        let capture = Capture::fallback(&CaptureConfig::instant(), false);
        let request = DecisionRequest {
            goal: "open settings",
            capture: &capture,
            history: &[],
            screen_info: "{}",
        };
        let messages = MessageBuilder::build_conversation("sys", &request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"][0]["type"], "image_url");
        assert!(messages[1]["content"][1]["text"]
            .as_str()
            .unwrap()
            .starts_with("open settings"));
    }

    #[test]
    fn test_history_replayed_without_images() {
        let capture = Capture::fallback(&CaptureConfig::instant(), false);
        let history = vec![
            Turn {
                screen_info: "{\"current_app\":\"launcher\"}".into(),
                thinking: "open it".into(),
                answer: "do(action=\"Launch\", app=\"Settings\")".into(),
                outcome: "Launched com.android.settings".into(),
            },
            Turn {
                screen_info: "{}".into(),
                thinking: "tap".into(),
                answer: "do(action=\"Tap\", element=[500, 500])".into(),
                outcome: "Tapped at (540, 960)".into(),
            },
        ];
        let request = DecisionRequest {
            goal: "open settings",
            capture: &capture,
            history: &history,
            screen_info: "{}",
        };
        let messages = MessageBuilder::build_conversation("sys", &request);
        assert_eq!(messages.len(), 6);

        // Only the last user message carries a screenshot.
        assert_eq!(messages[1]["content"].as_array().unwrap().len(), 1);
        assert_eq!(messages[3]["content"].as_array().unwrap().len(), 1);
        assert_eq!(messages[5]["content"].as_array().unwrap().len(), 2);

        assert_eq!(
            messages[2]["content"],
            "<think>open it</think><answer>do(action=\"Launch\", app=\"Settings\")</answer>"
        );
        let second = messages[3]["content"][0]["text"].as_str().unwrap();
        assert!(second.contains("Launched com.android.settings"));
        let last = messages[5]["content"][1]["text"].as_str().unwrap();
        assert!(last.contains("Tapped at (540, 960)"));
    }
}
