use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zentara_tools::{
    ApprovalDecision, ApprovalRequest, LspToolDispatcher, ToolHost, ToolOutcome, ToolUse,
};

use crate::message::{AskResponse, ExtensionMessage, MessageKind, TaskMessage};
use crate::provider::WeakTaskProvider;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {task_id} was aborted")]
    Aborted { task_id: String },
    #[error("task {task_id} has already finished")]
    Finished { task_id: String },
    #[error("ask for task {task_id} was superseded by a newer ask")]
    AskSuperseded { task_id: String },
    #[error("no task with id {task_id}")]
    UnknownTask { task_id: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The user's reply to an ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskReply {
    pub response: AskResponse,
    pub text: Option<String>,
    pub images: Option<Vec<String>>,
}

/// Everything needed to construct a task. A rehydrated task reuses the
/// id, lineage and history of the one it replaces.
#[derive(Debug, Clone, Default)]
pub struct TaskInit {
    pub task_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub root_task_id: Option<String>,
    pub history: Vec<TaskMessage>,
}

impl TaskInit {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child_of(parent: &Task) -> Self {
        Self {
            parent_task_id: Some(parent.task_id().to_string()),
            root_task_id: Some(
                parent
                    .root_task_id()
                    .unwrap_or(parent.task_id())
                    .to_string(),
            ),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct TaskState {
    messages: Vec<TaskMessage>,
    last_ask_response: Option<AskReply>,
    tool_results: Vec<String>,
    tool_errors: HashMap<String, u32>,
    consecutive_mistake_count: u32,
    aborted: bool,
    abandoned: bool,
    paused: bool,
    finished: bool,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

pub struct Task {
    task_id: String,
    parent_task_id: Option<String>,
    root_task_id: Option<String>,
    instance: u64,
    provider: WeakTaskProvider,
    dispatcher: Arc<LspToolDispatcher>,
    outbound: mpsc::UnboundedSender<ExtensionMessage>,
    cancel: CancellationToken,
    state: Mutex<TaskState>,
    pending_ask: Mutex<Option<oneshot::Sender<AskReply>>>,
    in_flight: watch::Sender<usize>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id)
            .field("parent_task_id", &self.parent_task_id)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(
        init: TaskInit,
        provider: WeakTaskProvider,
        dispatcher: Arc<LspToolDispatcher>,
        outbound: mpsc::UnboundedSender<ExtensionMessage>,
    ) -> Arc<Self> {
        let (in_flight, _) = watch::channel(0);
        Arc::new(Self {
            task_id: init
                .task_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            parent_task_id: init.parent_task_id,
            root_task_id: init.root_task_id,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            provider,
            dispatcher,
            outbound,
            cancel: CancellationToken::new(),
            state: Mutex::new(TaskState {
                messages: init.history,
                ..TaskState::default()
            }),
            pending_ask: Mutex::new(None),
            in_flight,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn parent_task_id(&self) -> Option<&str> {
        self.parent_task_id.as_deref()
    }

    pub fn root_task_id(&self) -> Option<&str> {
        self.root_task_id.as_deref()
    }

    /// Distinguishes a rehydrated task from the one it replaced.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub async fn messages(&self) -> Vec<TaskMessage> {
        self.state.lock().await.messages.clone()
    }

    pub async fn tool_results(&self) -> Vec<String> {
        self.state.lock().await.tool_results.clone()
    }

    pub async fn last_ask_response(&self) -> Option<AskReply> {
        self.state.lock().await.last_ask_response.clone()
    }

    pub async fn consecutive_mistake_count(&self) -> u32 {
        self.state.lock().await.consecutive_mistake_count
    }

    pub async fn tool_error_count(&self, tool: &str) -> u32 {
        self.state
            .lock()
            .await
            .tool_errors
            .get(tool)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_aborted(&self) -> bool {
        self.state.lock().await.aborted
    }

    pub async fn is_abandoned(&self) -> bool {
        self.state.lock().await.abandoned
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.finished
    }

    /// Init for a fresh task that takes this one's place after a cancel.
    pub async fn rehydrate(&self) -> TaskInit {
        TaskInit {
            task_id: Some(self.task_id.clone()),
            parent_task_id: self.parent_task_id.clone(),
            root_task_id: self.root_task_id.clone(),
            history: self.messages().await,
        }
    }

    fn emit(&self, message: ExtensionMessage) {
        if self.outbound.send(message).is_err() {
            debug!(task_id = %self.task_id, "outbound channel closed");
        }
    }

    fn ensure_active(&self, state: &TaskState) -> Result<(), TaskError> {
        if state.aborted {
            return Err(TaskError::Aborted {
                task_id: self.task_id.clone(),
            });
        }
        if state.finished {
            return Err(TaskError::Finished {
                task_id: self.task_id.clone(),
            });
        }
        Ok(())
    }

    async fn record(&self, message: TaskMessage) -> Result<(), TaskError> {
        {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            state.messages.push(message.clone());
        }
        self.emit(ExtensionMessage::TaskMessage {
            task_id: self.task_id.clone(),
            message,
        });
        Ok(())
    }

    pub async fn say(&self, category: &str, text: Option<String>) -> Result<(), TaskError> {
        self.record(TaskMessage::new(MessageKind::Say, category, text))
            .await
    }

    pub async fn say_with_images(
        &self,
        category: &str,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<(), TaskError> {
        let mut message = TaskMessage::new(MessageKind::Say, category, text);
        message.images = images;
        self.record(message).await
    }

    /// Posts an ask and waits for the matching webview response.
    /// A newer ask supersedes this one; aborting the task wakes it.
    pub async fn ask(&self, category: &str, text: Option<String>) -> Result<AskReply, TaskError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_ask.lock().await;
            *pending = Some(tx);
        }
        self.record(TaskMessage::new(MessageKind::Ask, category, text))
            .await?;

        // Abort drops the sender too, so both arms can be ready at once.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TaskError::Aborted {
                task_id: self.task_id.clone(),
            }),
            reply = rx => reply.map_err(|_| {
                if self.cancel.is_cancelled() {
                    TaskError::Aborted {
                        task_id: self.task_id.clone(),
                    }
                } else {
                    TaskError::AskSuperseded {
                        task_id: self.task_id.clone(),
                    }
                }
            }),
        }
    }

    pub async fn handle_webview_ask_response(
        &self,
        response: AskResponse,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<(), TaskError> {
        let reply = AskReply {
            response,
            text,
            images,
        };
        {
            let mut state = self.state.lock().await;
            self.ensure_active(&state)?;
            state.last_ask_response = Some(reply.clone());
        }

        match self.pending_ask.lock().await.take() {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    debug!(task_id = %self.task_id, "ask was no longer awaited");
                }
            }
            None => debug!(task_id = %self.task_id, "ask response without a pending ask"),
        }
        Ok(())
    }

    /// Marks the task aborted and wakes pending asks. Does not touch the registry.
    pub(crate) async fn abort_in_place(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if state.aborted {
                return false;
            }
            state.aborted = true;
        }
        self.cancel.cancel();
        self.pending_ask.lock().await.take();
        info!(task_id = %self.task_id, "task aborted");
        self.emit(ExtensionMessage::TaskAborted {
            task_id: self.task_id.clone(),
            abandoned: false,
        });
        true
    }

    /// Aborts this task and removes it from the registry, if it is still there.
    /// Its sub-tasks go with it.
    pub async fn abort_task(&self) -> Result<(), TaskError> {
        if !self.abort_in_place().await {
            return Ok(());
        }
        match self.provider.upgrade() {
            Some(provider) => provider.remove_task_tree(self).await?,
            None => debug!(task_id = %self.task_id, "provider gone, skipping removal"),
        }
        Ok(())
    }

    pub(crate) async fn mark_abandoned(&self) {
        self.state.lock().await.abandoned = true;
        warn!(task_id = %self.task_id, "task did not settle after abort, abandoning it");
        self.emit(ExtensionMessage::TaskAborted {
            task_id: self.task_id.clone(),
            abandoned: true,
        });
    }

    /// Resolves once no tool call is running on this task.
    pub async fn wait_until_settled(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub(crate) async fn set_paused(&self, paused: bool) {
        self.state.lock().await.paused = paused;
    }

    /// Parent side of `finish_sub_task`.
    pub(crate) async fn resume_after_sub_task(&self, result: &str) -> Result<(), TaskError> {
        self.set_paused(false).await;
        self.state
            .lock()
            .await
            .tool_results
            .push(format!("[subtask completed] Result: {result}"));
        self.say("subtask_result", Some(result.to_string())).await
    }

    /// Parent side of aborting a sub-task.
    pub(crate) async fn resume_after_aborted_sub_task(
        &self,
        child_id: &str,
    ) -> Result<(), TaskError> {
        self.set_paused(false).await;
        self.state
            .lock()
            .await
            .tool_results
            .push(format!("[subtask {child_id} aborted]"));
        self.say("subtask_aborted", Some(child_id.to_string())).await
    }

    /// Marks the task finished and cancels any pending ask. Idempotent.
    pub(crate) async fn finish(&self, result: Option<String>) {
        {
            let mut state = self.state.lock().await;
            if state.finished {
                return;
            }
            state.finished = true;
        }
        self.cancel.cancel();
        self.emit(ExtensionMessage::TaskFinished {
            task_id: self.task_id.clone(),
            result,
        });
    }

    /// Reports the final result and hands the task back to the provider:
    /// sub-tasks resume their parent, root tasks are removed.
    pub async fn complete(&self, result: Option<String>) -> Result<(), TaskError> {
        self.say("completion_result", result.clone()).await?;
        self.finish(result.clone()).await;

        let Some(provider) = self.provider.upgrade() else {
            debug!(task_id = %self.task_id, "provider gone, skipping finish callback");
            return Ok(());
        };
        if self.parent_task_id.is_some() {
            provider
                .finish_sub_task(result.unwrap_or_default(), &self.task_id)
                .await
        } else {
            provider
                .remove_task_instance(&self.task_id, self.instance)
                .await?;
            Ok(())
        }
    }

    /// Runs one tool call through the dispatcher and applies the
    /// task-side bookkeeping for its outcome.
    pub async fn execute_tool(&self, block: &ToolUse) -> Result<ToolOutcome, TaskError> {
        {
            let state = self.state.lock().await;
            self.ensure_active(&state)?;
        }

        let outcome = {
            let _busy = InFlight::enter(&self.in_flight);
            let host = ToolCall {
                task: self,
                tool: &block.name,
            };
            self.dispatcher.dispatch(&host, block).await
        };

        match &outcome {
            ToolOutcome::MissingParameter { field } => {
                self.state.lock().await.consecutive_mistake_count += 1;
                self.record_tool_error(&block.name, Some(&format!("missing {field}")))
                    .await;
                let message = self
                    .say_and_create_missing_param_error(&block.name, field, None)
                    .await?;
                debug!(task_id = %self.task_id, "{message}");
            }
            ToolOutcome::Succeeded => {
                self.state.lock().await.consecutive_mistake_count = 0;
            }
            _ => {}
        }
        Ok(outcome)
    }

    pub async fn record_tool_error(&self, tool: &str, error: Option<&str>) {
        *self
            .state
            .lock()
            .await
            .tool_errors
            .entry(tool.to_string())
            .or_default() += 1;
        warn!(
            task_id = %self.task_id,
            tool,
            error = error.unwrap_or_default(),
            "tool error recorded"
        );
    }

    /// Tells the user a required parameter was missing and returns the
    /// error text for the next model turn.
    pub async fn say_and_create_missing_param_error(
        &self,
        tool: &str,
        param: &str,
        rel_path: Option<&str>,
    ) -> Result<String, TaskError> {
        let target = rel_path
            .map(|p| format!(" for '{p}'"))
            .unwrap_or_default();
        self.say(
            "error",
            Some(format!(
                "Zentara tried to use {tool}{target} without value for required parameter '{param}'. Retrying..."
            )),
        )
        .await?;
        Ok(format!(
            "Missing value for required parameter '{param}'. Please retry with complete response."
        ))
    }
}

struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// A task acting as the host of one tool call.
struct ToolCall<'a> {
    task: &'a Task,
    tool: &'a str,
}

#[async_trait]
impl ToolHost for ToolCall<'_> {
    async fn ask_approval(&self, request: &ApprovalRequest) -> Result<ApprovalDecision> {
        let text = serde_json::to_string(request)?;
        let reply = self.task.ask("tool", Some(text)).await?;
        Ok(match reply.response {
            AskResponse::YesButtonClicked => ApprovalDecision::Approved,
            _ => ApprovalDecision::Denied {
                feedback: reply.text,
            },
        })
    }

    async fn handle_error(&self, context: &str, error: &anyhow::Error) {
        let text = format!("Error {context}:\n{error:#}");
        if let Err(err) = self.task.say("error", Some(text)).await {
            debug!(task_id = %self.task.task_id, "could not report tool error: {err}");
        }
    }

    async fn push_result(&self, content: String) {
        {
            let mut state = self.task.state.lock().await;
            if state.aborted {
                debug!(task_id = %self.task.task_id, "dropping tool result of aborted task");
                return;
            }
            state.tool_results.push(content.clone());
        }
        self.task.emit(ExtensionMessage::ToolResult {
            task_id: self.task.task_id.clone(),
            tool: self.tool.to_string(),
            content,
        });
    }
}
