//! Console messages in Chinese and English.

/// UI messages structure
#[derive(Debug, Clone)]
pub struct Messages {
    pub thinking: &'static str,
    pub action: &'static str,
    pub result: &'static str,
    pub step: &'static str,
    pub starting_task: &'static str,
    pub task_completed: &'static str,
    pub task_failed: &'static str,
    pub task_cancelled: &'static str,
    pub final_result: &'static str,
    pub confirmation_required: &'static str,
    pub manual_operation_required: &'static str,
    pub press_enter_when_done: &'static str,
    pub choose_option: &'static str,
    pub connection_failed: &'static str,
    pub connection_successful: &'static str,
    pub no_devices: &'static str,
}

/// Chinese messages
pub static MESSAGES_ZH: Messages = Messages {
    thinking: "思考过程",
    action: "执行动作",
    result: "结果",
    step: "步骤",
    starting_task: "开始执行任务",
    task_completed: "任务完成",
    task_failed: "任务失败",
    task_cancelled: "任务已取消",
    final_result: "最终结果",
    confirmation_required: "需要确认",
    manual_operation_required: "需要人工操作",
    press_enter_when_done: "完成后按回车继续",
    choose_option: "请选择一个选项",
    connection_failed: "连接失败",
    connection_successful: "连接成功",
    no_devices: "未发现已连接的设备",
};

/// English messages
pub static MESSAGES_EN: Messages = Messages {
    thinking: "Thinking",
    action: "Action",
    result: "Result",
    step: "Step",
    starting_task: "Starting task",
    task_completed: "Task Completed",
    task_failed: "Task Failed",
    task_cancelled: "Task Cancelled",
    final_result: "Final Result",
    confirmation_required: "Confirmation Required",
    manual_operation_required: "Manual Operation Required",
    press_enter_when_done: "Press Enter when done",
    choose_option: "Please choose an option",
    connection_failed: "Connection Failed",
    connection_successful: "Connection Successful",
    no_devices: "No connected devices found",
};

/// Get UI messages by language code, `"en"` or anything else for Chinese.
pub fn get_messages(lang: &str) -> &'static Messages {
    match lang {
        "en" => &MESSAGES_EN,
        _ => &MESSAGES_ZH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_messages() {
        let zh = get_messages("cn");
        assert_eq!(zh.thinking, "思考过程");

        let en = get_messages("en");
        assert_eq!(en.thinking, "Thinking");
        assert_eq!(en.task_cancelled, "Task Cancelled");
    }
}
