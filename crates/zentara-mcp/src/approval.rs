use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use zentara_core::config::ToolPolicy;
use zentara_tools::{ApprovalDecision, ApprovalRequest, ToolHost};

/// Tool host for MCP calls: there is no user to ask, so approval follows
/// the configured policy. Collects the single pushed result.
pub(crate) struct PolicyHost {
    read_only: bool,
    auto_approve_writes: bool,
    result: Mutex<Option<String>>,
}

impl PolicyHost {
    pub(crate) fn new(policy: &ToolPolicy) -> Self {
        Self {
            read_only: policy.read_only,
            auto_approve_writes: policy.auto_approve_writes,
            result: Mutex::new(None),
        }
    }

    pub(crate) async fn take_result(&self) -> Option<String> {
        self.result.lock().await.take()
    }
}

#[async_trait]
impl ToolHost for PolicyHost {
    async fn ask_approval(&self, request: &ApprovalRequest) -> Result<ApprovalDecision> {
        let decision = if self.read_only {
            ApprovalDecision::Denied {
                feedback: Some("zentara is running in read-only mode".to_string()),
            }
        } else if self.auto_approve_writes {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Denied {
                feedback: Some(
                    "write operations need tools.auto_approve_writes = true".to_string(),
                ),
            }
        };
        info!(
            operation = %request.lsp_operation,
            approved = matches!(decision, ApprovalDecision::Approved),
            "approval decided by policy"
        );
        Ok(decision)
    }

    async fn handle_error(&self, context: &str, error: &anyhow::Error) {
        warn!("error {context}: {error:#}");
    }

    async fn push_result(&self, content: String) {
        *self.result.lock().await = Some(content);
    }
}
