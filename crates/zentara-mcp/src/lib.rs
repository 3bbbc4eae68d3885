use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use rmcp::handler::server::ServerHandler;
use rmcp::model::CallToolRequestParam;
use rmcp::model::CallToolResult;
use rmcp::model::Content;
use rmcp::model::JsonObject;
use rmcp::model::ListToolsResult;
use rmcp::model::PaginatedRequestParam;
use rmcp::model::ServerCapabilities;
use rmcp::model::ServerInfo;
use rmcp::model::Tool;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use zentara_core::config::{ResolvedServerConfig, ToolPolicy};
use zentara_lsp::{EditOptions, LanguageServerProvider};
use zentara_tools::{LspToolDispatcher, ResultEnvelope, ToolOutcome, ToolUse, ToolUseParams};

mod approval;
mod structured;
mod tool_schemas;

use approval::PolicyHost;
use structured::{structured_error, structured_ok};

fn mcp_error_kind_name(code: i32) -> &'static str {
    match code {
        -32600 => "invalid_request",
        -32601 => "method_not_found",
        -32602 => "invalid_params",
        -32603 => "internal_error",
        -32700 => "parse_error",
        _ => "mcp_error",
    }
}

fn outcome_kind(outcome: &ToolOutcome) -> &'static str {
    match outcome {
        ToolOutcome::Succeeded => "ok",
        ToolOutcome::MissingParameter { .. } => "missing_parameter",
        ToolOutcome::InvalidInput => "invalid_input",
        ToolOutcome::NoTarget => "no_target",
        ToolOutcome::Denied => "denied",
        ToolOutcome::EnvironmentUnavailable => "environment_unavailable",
        ToolOutcome::Unsupported => "unsupported",
        ToolOutcome::Unexpected => "unexpected",
    }
}

fn next_steps(outcome: &ToolOutcome, policy: &ToolPolicy) -> Vec<Value> {
    let mut steps = Vec::new();
    match outcome {
        ToolOutcome::Denied if policy.read_only => steps.push(json!({
            "kind": "config",
            "message": "Mutating operations are disabled because zentara runs in read-only mode. Start `zentara mcp --read-write` or set `tools.read_only = false`."
        })),
        ToolOutcome::Denied => steps.push(json!({
            "kind": "config",
            "message": "Set `tools.auto_approve_writes = true` to let MCP clients run rename and symbol edits."
        })),
        ToolOutcome::EnvironmentUnavailable => {
            steps.push(json!({
                "kind": "command",
                "command": "zentara doctor --workspace-root .",
                "message": "Check that a language server is configured for this file type and can be started."
            }));
            steps.push(json!({
                "kind": "config",
                "message": "Raise `tools.request_timeout_ms` if the server is slow to answer while indexing."
            }));
        }
        ToolOutcome::Unsupported => steps.push(json!({
            "kind": "config",
            "message": "The language server does not provide this capability. Try a related operation or a different server."
        })),
        ToolOutcome::MissingParameter { .. } | ToolOutcome::InvalidInput => steps.push(json!({
            "kind": "tool",
            "tool": "lsp",
            "message": "Check the operation name and its parameters. Positions are 0-based { line, character }."
        })),
        ToolOutcome::Succeeded | ToolOutcome::NoTarget | ToolOutcome::Unexpected => {}
    }
    steps
}

fn mcp_error_to_call_tool_result(
    tool: &str,
    input: Option<Value>,
    err: McpError,
) -> CallToolResult {
    let code = err.code.0;
    let message = err.message.to_string();

    let mut structured = structured_error(tool, input, mcp_error_kind_name(code), &message);
    if let Some(error_obj) = structured.get_mut("error").and_then(|v| v.as_object_mut()) {
        error_obj.insert("code".to_string(), json!(code));
        if let Some(data) = err.data {
            error_obj.insert("data".to_string(), data);
        }
    }

    CallToolResult {
        // Keep a short text fallback for clients that ignore structuredContent.
        content: vec![Content::text(message)],
        structured_content: Some(structured),
        is_error: Some(true),
        meta: None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct McpOptions {
    pub config_path: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    pub read_only: bool,
    pub read_write: bool,
}

pub async fn run_stdio_with_options(options: McpOptions) -> Result<()> {
    let loaded = zentara_core::config::load_config(
        options.config_path.as_deref(),
        options.workspace_root.as_deref(),
    )?;
    let workspace_root = loaded.workspace_root;
    let mut policy = loaded.config.tool_policy();
    if options.read_write {
        policy.read_only = false;
    } else if options.read_only {
        policy.read_only = true;
    }

    let servers = zentara_core::config::resolved_servers(&loaded.config, &workspace_root);
    let provider = Arc::new(LanguageServerProvider::new(
        workspace_root.clone(),
        servers.clone(),
        EditOptions {
            create_backups: policy.create_backups,
            backup_suffix: policy.backup_suffix.clone(),
        },
    ));
    let dispatcher = LspToolDispatcher::new(provider.clone(), policy.request_timeout);
    info!(
        workspace_root = %workspace_root.display(),
        servers = servers.len(),
        read_only = policy.read_only,
        "starting MCP server"
    );

    let service = ZentaraMcpServer::new(workspace_root, servers, policy, dispatcher);
    let running = service
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    running.waiting().await?;
    provider.shutdown().await;
    Ok(())
}

#[derive(Clone)]
struct ZentaraMcpServer {
    tools: Arc<Vec<Tool>>,
    state: Arc<McpState>,
}

struct McpState {
    workspace_root: PathBuf,
    servers: Vec<ResolvedServerConfig>,
    policy: ToolPolicy,
    dispatcher: LspToolDispatcher,
}

#[derive(Debug, Deserialize)]
struct LspArgs {
    lsp_operation: String,
    #[serde(default)]
    params: Option<Value>,
}

impl ZentaraMcpServer {
    fn new(
        workspace_root: PathBuf,
        servers: Vec<ResolvedServerConfig>,
        policy: ToolPolicy,
        dispatcher: LspToolDispatcher,
    ) -> Self {
        Self {
            tools: Arc::new(tool_schemas::all_tools()),
            state: Arc::new(McpState {
                workspace_root,
                servers,
                policy,
                dispatcher,
            }),
        }
    }

    async fn call_lsp(&self, arguments: Option<JsonObject>) -> Result<CallToolResult, McpError> {
        let input = arguments.clone().map(Value::Object);
        let args: LspArgs = parse_arguments(arguments)?;

        let block = ToolUse {
            name: "lsp".to_string(),
            params: ToolUseParams {
                lsp_operation: Some(args.lsp_operation),
                text: args.params.map(|p| p.to_string()),
            },
        };
        let host = PolicyHost::new(&self.state.policy);
        let outcome = self.state.dispatcher.dispatch(&host, &block).await;
        let text = host
            .take_result()
            .await
            .unwrap_or_else(|| ResultEnvelope::failure("no result was produced").to_text());
        let envelope = ResultEnvelope::from_text(&text).ok();

        let structured = if outcome.is_success() {
            let mut structured = structured_ok("lsp", input);
            if let Some(obj) = structured.as_object_mut() {
                obj.insert("result".to_string(), json!(envelope));
            }
            structured
        } else {
            let message = envelope
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_default();
            let mut structured = structured_error("lsp", input, outcome_kind(&outcome), &message);
            let steps = next_steps(&outcome, &self.state.policy);
            if let Some(obj) = structured.as_object_mut()
                && !steps.is_empty()
            {
                obj.insert("next_steps".to_string(), Value::Array(steps));
            }
            structured
        };

        Ok(CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(!outcome.is_success()),
            meta: None,
        })
    }

    fn get_current_config(&self) -> CallToolResult {
        let policy = &self.state.policy;
        let servers: Vec<Value> = self
            .state
            .servers
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "command": s.command,
                    "args": s.args,
                    "extensions": s.extensions,
                    "language_id": s.language_id,
                    "root_dir": s.root_dir.to_string_lossy(),
                    "initialize_timeout_ms": s.initialize_timeout.as_millis() as u64,
                    "request_timeout_ms": s.request_timeout.as_millis() as u64,
                })
            })
            .collect();

        let mut structured = structured_ok("get_current_config", None);
        if let Some(obj) = structured.as_object_mut() {
            obj.insert(
                "workspace_root".to_string(),
                Value::String(self.state.workspace_root.to_string_lossy().to_string()),
            );
            obj.insert("servers".to_string(), Value::Array(servers));
            obj.insert(
                "tools".to_string(),
                json!({
                    "read_only": policy.read_only,
                    "auto_approve_writes": policy.auto_approve_writes,
                    "request_timeout_ms": policy.request_timeout.as_millis() as u64,
                    "create_backups": policy.create_backups,
                    "backup_suffix": policy.backup_suffix,
                }),
            );
        }

        CallToolResult {
            content: vec![Content::text(structured.to_string())],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        }
    }
}

impl ServerHandler for ZentaraMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Use the `lsp` tool for code navigation and symbol edits. Positions are 0-based."
                    .to_string(),
            ),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.tools.clone();
        async move {
            Ok(ListToolsResult {
                tools: (*tools).clone(),
                next_cursor: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = request.name.clone();
        let input = request.arguments.clone().map(Value::Object);

        let result = match request.name.as_ref() {
            "lsp" => self.call_lsp(request.arguments).await,
            "get_current_config" => Ok(self.get_current_config()),
            other => Err(McpError::invalid_params(
                format!("unknown tool '{other}'"),
                None,
            )),
        };

        match result {
            Ok(r) => Ok(r),
            Err(err) => Ok(mcp_error_to_call_tool_result(&tool, input, err)),
        }
    }
}

fn parse_arguments<T: for<'de> Deserialize<'de>>(
    arguments: Option<JsonObject>,
) -> Result<T, McpError> {
    let arguments = arguments.unwrap_or_default();
    serde_json::from_value::<T>(Value::Object(arguments))
        .map_err(|e| McpError::invalid_params(e.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use zentara_lsp::CapabilityProvider;
    use zentara_lsp::protocol::TextDocumentPositionParams;

    struct HoverOnly;

    #[async_trait]
    impl CapabilityProvider for HoverOnly {
        async fn hover(&self, _params: &TextDocumentPositionParams) -> anyhow::Result<Value> {
            Ok(json!({ "contents": "fn main()" }))
        }
    }

    fn server(policy: ToolPolicy) -> ZentaraMcpServer {
        let dispatcher = LspToolDispatcher::new(Arc::new(HoverOnly), Duration::from_secs(1));
        ZentaraMcpServer::new(PathBuf::from("/w"), Vec::new(), policy, dispatcher)
    }

    fn args(value: Value) -> Option<JsonObject> {
        value.as_object().cloned()
    }

    fn position() -> Value {
        json!({
            "textDocument": { "uri": "file:///w/src/main.rs" },
            "position": { "line": 0, "character": 3 }
        })
    }

    #[tokio::test]
    async fn lsp_tool_returns_the_envelope_text() {
        let result = server(ToolPolicy::default())
            .call_lsp(args(json!({ "lsp_operation": "get_hover_info", "params": position() })))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["ok"], json!(true));
        assert_eq!(
            structured["result"]["data"]["contents"],
            json!("fn main()")
        );
    }

    #[tokio::test]
    async fn writes_are_denied_by_default_policy() {
        let mut params = position();
        params["newName"] = json!("start");
        let result = server(ToolPolicy::default())
            .call_lsp(args(json!({ "lsp_operation": "rename", "params": params })))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["error"]["kind"], json!("denied"));
        assert!(
            structured["next_steps"][0]["message"]
                .as_str()
                .unwrap()
                .contains("auto_approve_writes")
        );
    }

    #[tokio::test]
    async fn read_only_denial_points_at_read_write() {
        let mut params = position();
        params["content"] = json!("// x");
        let policy = ToolPolicy {
            read_only: true,
            ..ToolPolicy::default()
        };
        let result = server(policy)
            .call_lsp(args(json!({ "lsp_operation": "insert_before_symbol", "params": params })))
            .await
            .unwrap();
        let structured = result.structured_content.unwrap();
        assert!(
            structured["next_steps"][0]["message"]
                .as_str()
                .unwrap()
                .contains("--read-write")
        );
    }

    #[tokio::test]
    async fn bad_arguments_are_invalid_params() {
        let err = server(ToolPolicy::default())
            .call_lsp(args(json!({ "params": {} })))
            .await
            .unwrap_err();
        let result = mcp_error_to_call_tool_result("lsp", None, err);
        assert_eq!(result.is_error, Some(true));
        assert_eq!(
            result.structured_content.unwrap()["error"]["kind"],
            json!("invalid_params")
        );
    }

    #[tokio::test]
    async fn unsupported_operations_are_flagged() {
        let result = server(ToolPolicy::default())
            .call_lsp(args(json!({
                "lsp_operation": "get_code_lens",
                "params": { "textDocument": { "uri": "file:///w/a.rs" } }
            })))
            .await
            .unwrap();
        assert_eq!(
            result.structured_content.unwrap()["error"]["kind"],
            json!("unsupported")
        );
    }

    #[test]
    fn current_config_reports_policy() {
        let result = server(ToolPolicy::default()).get_current_config();
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["workspace_root"], json!("/w"));
        assert_eq!(structured["tools"]["auto_approve_writes"], json!(false));
    }
}
