use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use zentara_tools::ToolUseParams;

/// The user's answer to a pending ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AskResponse {
    YesButtonClicked,
    NoButtonClicked,
    MessageResponse,
    ObjectResponse,
}

/// Inbound UI message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WebviewMessage {
    #[serde(rename_all = "camelCase")]
    AskResponse {
        #[serde(default)]
        task_id: Option<String>,
        ask_response: AskResponse,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        images: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    CancelTask {
        #[serde(default)]
        task_id: Option<String>,
    },
    NewTask {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        images: Option<Vec<String>>,
    },
    ClearTask,
    #[serde(rename_all = "camelCase")]
    ToolUse {
        #[serde(default)]
        task_id: Option<String>,
        name: String,
        #[serde(default)]
        params: ToolUseParams,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Ask,
    Say,
}

/// One entry of a task's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub ts: u64,
    pub kind: MessageKind,
    /// `tool`, `followup`, `text`, `error`, `completion_result`, ...
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl TaskMessage {
    pub fn new(kind: MessageKind, category: &str, text: Option<String>) -> Self {
        Self {
            ts: now_millis(),
            kind,
            category: category.to_string(),
            text,
            images: None,
        }
    }
}

/// Outbound message to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtensionMessage {
    #[serde(rename_all = "camelCase")]
    TaskCreated {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_task_id: Option<String>,
        rehydrated: bool,
    },
    #[serde(rename_all = "camelCase")]
    TaskMessage {
        task_id: String,
        #[serde(flatten)]
        message: TaskMessage,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        task_id: String,
        tool: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    TaskAborted { task_id: String, abandoned: bool },
    #[serde(rename_all = "camelCase")]
    TaskFinished {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
