use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call as emitted by the model: `{ name: "lsp", params: { lsp_operation, _text } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub name: String,
    #[serde(default)]
    pub params: ToolUseParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUseParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsp_operation: Option<String>,
    /// JSON text of the operation's parameters.
    #[serde(default, rename = "_text", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ToolUse {
    pub fn lsp(operation: &str, params: &Value) -> Self {
        Self {
            name: "lsp".to_string(),
            params: ToolUseParams {
                lsp_operation: Some(operation.to_string()),
                text: Some(params.to_string()),
            },
        }
    }
}

/// What the user is asked to approve before a mutating operation runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub tool: String,
    pub lsp_operation: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied { feedback: Option<String> },
}

/// The task side of a tool call: approval prompts, error reporting and
/// the output channel results are pushed to.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn ask_approval(&self, request: &ApprovalRequest) -> Result<ApprovalDecision>;

    async fn handle_error(&self, context: &str, error: &anyhow::Error);

    async fn push_result(&self, content: String);
}

/// Terminal state of one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Succeeded,
    MissingParameter { field: String },
    InvalidInput,
    NoTarget,
    Denied,
    EnvironmentUnavailable,
    Unsupported,
    Unexpected,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Succeeded)
    }
}
