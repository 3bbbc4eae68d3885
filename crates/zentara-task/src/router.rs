use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use zentara_tools::{ToolOutcome, ToolUse};

use crate::message::{AskResponse, WebviewMessage};
use crate::provider::TaskProvider;
use crate::task::{Task, TaskError};

/// The task methods a routed message can end up calling.
#[async_trait]
pub trait RouteTarget: Send + Sync + 'static {
    async fn handle_webview_ask_response(
        &self,
        response: AskResponse,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<(), TaskError>;

    async fn abort_task(&self) -> Result<(), TaskError>;

    async fn execute_tool(&self, block: &ToolUse) -> Result<ToolOutcome, TaskError>;
}

/// Registry operations the router needs.
#[async_trait]
pub trait TaskRegistry: Clone + Send + Sync + 'static {
    type Task: RouteTarget;

    async fn find_task_by_id(&self, task_id: &str) -> Option<Arc<Self::Task>>;

    async fn get_current_task(&self) -> Option<Arc<Self::Task>>;

    async fn cancel_task(&self) -> Result<(), TaskError>;

    async fn init_task(
        &self,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<(), TaskError>;

    async fn clear_task(&self) -> Result<(), TaskError>;
}

#[async_trait]
impl RouteTarget for Task {
    async fn handle_webview_ask_response(
        &self,
        response: AskResponse,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<(), TaskError> {
        Task::handle_webview_ask_response(self, response, text, images).await
    }

    async fn abort_task(&self) -> Result<(), TaskError> {
        Task::abort_task(self).await
    }

    async fn execute_tool(&self, block: &ToolUse) -> Result<ToolOutcome, TaskError> {
        Task::execute_tool(self, block).await
    }
}

#[async_trait]
impl TaskRegistry for TaskProvider {
    type Task = Task;

    async fn find_task_by_id(&self, task_id: &str) -> Option<Arc<Task>> {
        TaskProvider::find_task_by_id(self, task_id).await
    }

    async fn get_current_task(&self) -> Option<Arc<Task>> {
        TaskProvider::get_current_task(self).await
    }

    async fn cancel_task(&self) -> Result<(), TaskError> {
        TaskProvider::cancel_task(self).await
    }

    async fn init_task(
        &self,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<(), TaskError> {
        TaskProvider::init_task(self, text, images).await.map(|_| ())
    }

    async fn clear_task(&self) -> Result<(), TaskError> {
        TaskProvider::clear_task(self).await
    }
}

/// A resolved message, ready to run. Resolving happens in arrival order;
/// running may happen concurrently with later messages.
pub enum RoutedCall<R: TaskRegistry> {
    AskResponse {
        task: Arc<R::Task>,
        response: AskResponse,
        text: Option<String>,
        images: Option<Vec<String>>,
    },
    AbortTask(Arc<R::Task>),
    CancelCurrent(R),
    ToolUse {
        task: Arc<R::Task>,
        block: ToolUse,
    },
    /// Nothing left to do: a routing miss, an ignored message, or a
    /// registry action that already ran during resolution.
    Done,
}

impl<R: TaskRegistry> RoutedCall<R> {
    pub async fn run(self) -> Result<(), TaskError> {
        match self {
            RoutedCall::AskResponse {
                task,
                response,
                text,
                images,
            } => task.handle_webview_ask_response(response, text, images).await,
            RoutedCall::AbortTask(task) => task.abort_task().await,
            RoutedCall::CancelCurrent(registry) => registry.cancel_task().await,
            RoutedCall::ToolUse { task, block } => {
                let outcome = task.execute_tool(&block).await?;
                debug!(tool = %block.name, "tool call finished: {outcome:?}");
                Ok(())
            }
            RoutedCall::Done => Ok(()),
        }
    }
}

pub struct WebviewRouter<R> {
    registry: R,
}

impl<R: TaskRegistry> WebviewRouter<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Resolves and runs `message`. Handler errors are returned unmodified.
    pub async fn route(&self, message: WebviewMessage) -> Result<(), TaskError> {
        self.resolve(message).await?.run().await
    }

    pub async fn resolve(&self, message: WebviewMessage) -> Result<RoutedCall<R>, TaskError> {
        let call = match message {
            WebviewMessage::AskResponse {
                task_id,
                ask_response,
                text,
                images,
            } => match self.target(task_id.as_deref(), "askResponse").await {
                Some(task) => RoutedCall::AskResponse {
                    task,
                    response: ask_response,
                    text,
                    images,
                },
                None => RoutedCall::Done,
            },
            WebviewMessage::CancelTask { task_id } => match non_empty(task_id.as_deref()) {
                Some(task_id) => match self.registry.find_task_by_id(task_id).await {
                    Some(task) => RoutedCall::AbortTask(task),
                    None => {
                        warn!("Warning: cancelTask received for unknown task ID: {task_id}");
                        RoutedCall::Done
                    }
                },
                None => RoutedCall::CancelCurrent(self.registry.clone()),
            },
            WebviewMessage::ToolUse {
                task_id,
                name,
                params,
            } => match self.target(task_id.as_deref(), "toolUse").await {
                Some(task) => RoutedCall::ToolUse {
                    task,
                    block: ToolUse { name, params },
                },
                None => RoutedCall::Done,
            },
            WebviewMessage::NewTask { text, images } => {
                self.registry.init_task(text, images).await?;
                RoutedCall::Done
            }
            WebviewMessage::ClearTask => {
                self.registry.clear_task().await?;
                RoutedCall::Done
            }
            WebviewMessage::Unknown => {
                debug!("ignoring webview message of unknown type");
                RoutedCall::Done
            }
        };
        Ok(call)
    }

    /// The task named by `task_id`, or the current task when no id is given.
    /// An unknown id never falls back to the current task.
    async fn target(&self, task_id: Option<&str>, kind: &str) -> Option<Arc<R::Task>> {
        match non_empty(task_id) {
            Some(task_id) => {
                let task = self.registry.find_task_by_id(task_id).await;
                if task.is_none() {
                    warn!("Warning: {kind} received for unknown task ID: {task_id}");
                }
                task
            }
            None => {
                let task = self.registry.get_current_task().await;
                if task.is_none() {
                    error!("Error: No task found to handle {kind}");
                }
                task
            }
        }
    }
}

fn non_empty(task_id: Option<&str>) -> Option<&str> {
    task_id.filter(|id| !id.is_empty())
}
