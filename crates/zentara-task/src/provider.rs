use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zentara_core::config::TaskPolicy;
use zentara_tools::LspToolDispatcher;

use crate::message::ExtensionMessage;
use crate::registry::{RegistryError, TaskStack};
use crate::task::{Task, TaskError, TaskInit};

enum Command {
    Push {
        task: Arc<Task>,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Find {
        task_id: String,
        reply: oneshot::Sender<Option<Arc<Task>>>,
    },
    Current {
        reply: oneshot::Sender<Option<Arc<Task>>>,
    },
    Remove {
        task_id: String,
        instance: Option<u64>,
        reply: oneshot::Sender<Option<Arc<Task>>>,
    },
    RemoveTree {
        task_id: String,
        instance: u64,
        reply: oneshot::Sender<Vec<Arc<Task>>>,
    },
    Replace {
        task: Arc<Task>,
        reply: oneshot::Sender<Option<Arc<Task>>>,
    },
    Clear {
        reply: oneshot::Sender<Vec<Arc<Task>>>,
    },
    Ids {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Owns the task stack. Runs until every `TaskProvider` handle is dropped.
async fn run_registry(mut commands: mpsc::Receiver<Command>) {
    let mut stack: TaskStack<Arc<Task>> = TaskStack::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Push { task, reply } => {
                let result = stack.push(task.task_id().to_string(), task);
                let _ = reply.send(result);
            }
            Command::Find { task_id, reply } => {
                let _ = reply.send(stack.find(&task_id).cloned());
            }
            Command::Current { reply } => {
                let _ = reply.send(stack.current().cloned());
            }
            Command::Remove {
                task_id,
                instance,
                reply,
            } => {
                let matches = match (stack.find(&task_id), instance) {
                    (Some(task), Some(instance)) => task.instance() == instance,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                let removed = if matches {
                    stack.remove(&task_id)
                } else {
                    None
                };
                let _ = reply.send(removed);
            }
            Command::RemoveTree {
                task_id,
                instance,
                reply,
            } => {
                let _ = reply.send(remove_tree(&mut stack, &task_id, instance));
            }
            Command::Replace { task, reply } => {
                let task_id = task.task_id().to_string();
                let _ = reply.send(stack.replace(&task_id, task));
            }
            Command::Clear { reply } => {
                let _ = reply.send(stack.clear());
            }
            Command::Ids { reply } => {
                let _ = reply.send(stack.ids());
            }
        }
    }
    debug!("task registry stopped");
}

/// Removes `task_id` and every task descending from it, target first.
/// Nothing is removed unless the registered task is still `instance`.
fn remove_tree(stack: &mut TaskStack<Arc<Task>>, task_id: &str, instance: u64) -> Vec<Arc<Task>> {
    if stack.find(task_id).map(|task| task.instance()) != Some(instance) {
        return Vec::new();
    }
    // Children always sit above their parent, so one pass finds every level.
    let mut doomed = vec![task_id.to_string()];
    for (id, task) in stack.above(task_id) {
        if task
            .parent_task_id()
            .is_some_and(|parent| doomed.iter().any(|d| d == parent))
        {
            doomed.push(id.to_string());
        }
    }
    doomed.iter().filter_map(|id| stack.remove(id)).collect()
}

struct Shared {
    policy: TaskPolicy,
    dispatcher: Arc<LspToolDispatcher>,
    outbound: mpsc::UnboundedSender<ExtensionMessage>,
}

/// Cloneable handle to the task registry.
#[derive(Clone)]
pub struct TaskProvider {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

/// Non-owning handle held by tasks. Upgrading fails once the provider is gone.
#[derive(Clone, Default)]
pub struct WeakTaskProvider {
    commands: Option<mpsc::WeakSender<Command>>,
    shared: Weak<Shared>,
}

impl WeakTaskProvider {
    /// A handle that never upgrades, for tasks living outside a registry.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<TaskProvider> {
        Some(TaskProvider {
            commands: self.commands.as_ref()?.upgrade()?,
            shared: self.shared.upgrade()?,
        })
    }
}

impl TaskProvider {
    /// Spawns the registry actor on the current tokio runtime.
    pub fn new(
        dispatcher: Arc<LspToolDispatcher>,
        policy: TaskPolicy,
        outbound: mpsc::UnboundedSender<ExtensionMessage>,
    ) -> Self {
        let (commands, rx) = mpsc::channel(64);
        tokio::spawn(run_registry(rx));
        Self {
            commands,
            shared: Arc::new(Shared {
                policy,
                dispatcher,
                outbound,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakTaskProvider {
        WeakTaskProvider {
            commands: Some(self.commands.downgrade()),
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &TaskPolicy {
        &self.shared.policy
    }

    pub fn dispatcher(&self) -> Arc<LspToolDispatcher> {
        self.shared.dispatcher.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    fn new_task(&self, init: TaskInit) -> Arc<Task> {
        Task::new(
            init,
            self.downgrade(),
            self.shared.dispatcher.clone(),
            self.shared.outbound.clone(),
        )
    }

    fn emit(&self, message: ExtensionMessage) {
        if self.shared.outbound.send(message).is_err() {
            debug!("outbound channel closed");
        }
    }

    async fn push(&self, task: Arc<Task>) -> Result<(), RegistryError> {
        self.request(|reply| Command::Push { task, reply }).await?
    }

    /// Exact, case-sensitive lookup across the whole stack.
    pub async fn find_task_by_id(&self, task_id: &str) -> Option<Arc<Task>> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Find { task_id, reply })
            .await
            .ok()
            .flatten()
    }

    /// The top of the stack.
    pub async fn get_current_task(&self) -> Option<Arc<Task>> {
        self.request(|reply| Command::Current { reply })
            .await
            .ok()
            .flatten()
    }

    pub async fn task_ids(&self) -> Vec<String> {
        self.request(|reply| Command::Ids { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn remove_task(&self, task_id: &str) -> Result<Option<Arc<Task>>, RegistryError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Remove {
            task_id,
            instance: None,
            reply,
        })
        .await
    }

    /// Removes `task_id` only while the registered task is still `instance`,
    /// so an old task cannot evict its rehydrated replacement.
    pub(crate) async fn remove_task_instance(
        &self,
        task_id: &str,
        instance: u64,
    ) -> Result<Option<Arc<Task>>, RegistryError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Remove {
            task_id,
            instance: Some(instance),
            reply,
        })
        .await
    }

    /// Unregisters an aborted task together with its sub-tasks. The sub-tasks
    /// are aborted as well and a waiting parent is resumed.
    pub(crate) async fn remove_task_tree(&self, task: &Task) -> Result<(), TaskError> {
        let task_id = task.task_id().to_string();
        let removed = self
            .request(|reply| Command::RemoveTree {
                task_id,
                instance: task.instance(),
                reply,
            })
            .await?;
        if removed.is_empty() {
            debug!(task_id = %task.task_id(), "aborted task already left the stack");
            return Ok(());
        }
        for descendant in removed.iter().skip(1) {
            debug!(
                task_id = %descendant.task_id(),
                ancestor = %task.task_id(),
                "aborting sub-task of aborted task"
            );
            descendant.abort_in_place().await;
        }

        let Some(parent_id) = task.parent_task_id() else {
            return Ok(());
        };
        match self.find_task_by_id(parent_id).await {
            Some(parent) => parent.resume_after_aborted_sub_task(task.task_id()).await,
            None => {
                warn!("parent task {parent_id} of {} is gone", task.task_id());
                Ok(())
            }
        }
    }

    /// Starts a new root conversation. Whatever was on the stack is aborted.
    pub async fn init_task(
        &self,
        text: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<Arc<Task>, TaskError> {
        let previous = self.request(|reply| Command::Clear { reply }).await?;
        for task in previous {
            task.abort_in_place().await;
        }

        let task = self.new_task(TaskInit::root());
        self.push(task.clone()).await?;
        info!(task_id = %task.task_id(), "task started");
        self.emit(ExtensionMessage::TaskCreated {
            task_id: task.task_id().to_string(),
            parent_task_id: None,
            rehydrated: false,
        });
        if text.is_some() || images.is_some() {
            task.say_with_images("text", text, images).await?;
        }
        Ok(task)
    }

    /// Pushes a child above `parent_id` and pauses the parent.
    pub async fn spawn_sub_task(
        &self,
        parent_id: &str,
        text: Option<String>,
    ) -> Result<Arc<Task>, TaskError> {
        let parent = self
            .find_task_by_id(parent_id)
            .await
            .ok_or_else(|| TaskError::UnknownTask {
                task_id: parent_id.to_string(),
            })?;

        let child = self.new_task(TaskInit::child_of(&parent));
        self.push(child.clone()).await?;
        parent.set_paused(true).await;
        info!(
            task_id = %child.task_id(),
            parent_task_id = %parent.task_id(),
            "sub-task started"
        );
        self.emit(ExtensionMessage::TaskCreated {
            task_id: child.task_id().to_string(),
            parent_task_id: Some(parent.task_id().to_string()),
            rehydrated: false,
        });
        if text.is_some() {
            child.say("text", text).await?;
        }
        Ok(child)
    }

    /// Removes the child and resumes its parent with `result`.
    pub async fn finish_sub_task(&self, result: String, child_id: &str) -> Result<(), TaskError> {
        let Some(child) = self.remove_task(child_id).await? else {
            warn!("finish_sub_task for unknown task ID: {child_id}");
            return Ok(());
        };
        child.finish(Some(result.clone())).await;

        let Some(parent_id) = child.parent_task_id() else {
            return Ok(());
        };
        match self.find_task_by_id(parent_id).await {
            Some(parent) => parent.resume_after_sub_task(&result).await,
            None => {
                warn!("parent task {parent_id} of {child_id} is gone");
                Ok(())
            }
        }
    }

    /// Finishes the current task. A sub-task finishes with an empty result.
    pub async fn clear_task(&self) -> Result<(), TaskError> {
        let Some(task) = self.get_current_task().await else {
            return Ok(());
        };
        if task.parent_task_id().is_some() {
            return self.finish_sub_task(String::new(), task.task_id()).await;
        }
        self.remove_task_instance(task.task_id(), task.instance())
            .await?;
        task.finish(None).await;
        Ok(())
    }

    /// Aborts the current task, waits for it to settle, then puts a fresh
    /// task with the same id and history in its place.
    pub async fn cancel_task(&self) -> Result<(), TaskError> {
        let Some(task) = self.get_current_task().await else {
            debug!("cancel_task with no current task");
            return Ok(());
        };
        info!(task_id = %task.task_id(), "cancelling current task");
        task.abort_in_place().await;

        if timeout(self.shared.policy.abort_wait, task.wait_until_settled())
            .await
            .is_err()
        {
            task.mark_abandoned().await;
        }

        let fresh = self.new_task(task.rehydrate().await);
        let task_id = fresh.task_id().to_string();
        let parent_task_id = fresh.parent_task_id().map(str::to_string);
        match self
            .request(|reply| Command::Replace { task: fresh, reply })
            .await?
        {
            Some(_) => self.emit(ExtensionMessage::TaskCreated {
                task_id,
                parent_task_id,
                rehydrated: true,
            }),
            None => debug!("task {task_id} left the stack while cancelling"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use zentara_lsp::CapabilityProvider;

    struct NoCapabilities;

    #[async_trait]
    impl CapabilityProvider for NoCapabilities {}

    fn provider() -> (TaskProvider, mpsc::UnboundedReceiver<ExtensionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(LspToolDispatcher::new(
            Arc::new(NoCapabilities),
            Duration::from_secs(1),
        ));
        let policy = TaskPolicy {
            abort_wait: Duration::from_millis(50),
        };
        (TaskProvider::new(dispatcher, policy, tx), rx)
    }

    #[tokio::test]
    async fn init_task_replaces_the_stack() {
        let (provider, _rx) = provider();
        let first = provider.init_task(Some("one".into()), None).await.unwrap();
        let second = provider.init_task(Some("two".into()), None).await.unwrap();

        assert!(first.is_aborted().await);
        assert_eq!(provider.task_ids().await, vec![second.task_id().to_string()]);
        let current = provider.get_current_task().await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(provider.find_task_by_id(first.task_id()).await.is_none());
    }

    #[tokio::test]
    async fn lookups_are_exact_and_repeatable() {
        let (provider, _rx) = provider();
        let task = provider.init_task(None, None).await.unwrap();
        let id = task.task_id().to_string();

        for _ in 0..3 {
            let found = provider.find_task_by_id(&id).await.unwrap();
            assert!(Arc::ptr_eq(&found, &task));
        }
        assert!(provider.find_task_by_id(&id[..8]).await.is_none());
        assert!(provider.find_task_by_id(&id.to_uppercase()).await.is_none());
        assert!(provider.find_task_by_id(&format!("{id}-backup")).await.is_none());
    }

    #[tokio::test]
    async fn sub_tasks_pause_and_resume_their_parent() {
        let (provider, _rx) = provider();
        let parent = provider.init_task(Some("root".into()), None).await.unwrap();
        let child = provider
            .spawn_sub_task(parent.task_id(), Some("child".into()))
            .await
            .unwrap();

        assert!(parent.is_paused().await);
        assert_eq!(child.parent_task_id(), Some(parent.task_id()));
        assert_eq!(child.root_task_id(), Some(parent.task_id()));
        assert!(Arc::ptr_eq(&provider.get_current_task().await.unwrap(), &child));

        child.complete(Some("42".into())).await.unwrap();

        assert!(!parent.is_paused().await);
        assert!(provider.find_task_by_id(child.task_id()).await.is_none());
        assert!(Arc::ptr_eq(&provider.get_current_task().await.unwrap(), &parent));
        let results = parent.tool_results().await;
        assert_eq!(results, vec!["[subtask completed] Result: 42".to_string()]);
    }

    #[tokio::test]
    async fn spawning_under_an_unknown_parent_fails() {
        let (provider, _rx) = provider();
        assert!(matches!(
            provider.spawn_sub_task("nope", None).await,
            Err(TaskError::UnknownTask { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_rehydrates_with_same_id_and_history() {
        let (provider, mut rx) = provider();
        let task = provider.init_task(Some("hello".into()), None).await.unwrap();
        provider.cancel_task().await.unwrap();

        assert!(task.is_aborted().await);
        assert!(!task.is_abandoned().await);
        let fresh = provider.find_task_by_id(task.task_id()).await.unwrap();
        assert!(!Arc::ptr_eq(&fresh, &task));
        assert!(!fresh.is_aborted().await);
        assert_eq!(fresh.messages().await, task.messages().await);

        // the old instance cannot evict its replacement
        let evicted = provider
            .remove_task_instance(task.task_id(), task.instance())
            .await
            .unwrap();
        assert!(evicted.is_none());
        assert!(provider.find_task_by_id(task.task_id()).await.is_some());

        let mut rehydrated = false;
        while let Ok(msg) = rx.try_recv() {
            if let ExtensionMessage::TaskCreated { rehydrated: true, .. } = msg {
                rehydrated = true;
            }
        }
        assert!(rehydrated);
    }

    #[tokio::test]
    async fn abort_task_removes_the_task() {
        let (provider, _rx) = provider();
        let task = provider.init_task(None, None).await.unwrap();
        task.abort_task().await.unwrap();
        assert!(provider.find_task_by_id(task.task_id()).await.is_none());
        assert!(provider.get_current_task().await.is_none());
    }

    #[tokio::test]
    async fn aborting_a_parent_aborts_its_sub_tasks() {
        let (provider, _rx) = provider();
        let parent = provider.init_task(None, None).await.unwrap();
        let child = provider.spawn_sub_task(parent.task_id(), None).await.unwrap();
        let grandchild = provider.spawn_sub_task(child.task_id(), None).await.unwrap();

        parent.abort_task().await.unwrap();

        assert!(provider.task_ids().await.is_empty());
        assert!(provider.get_current_task().await.is_none());
        assert!(child.is_aborted().await);
        assert!(grandchild.is_aborted().await);
    }

    #[tokio::test]
    async fn aborting_a_sub_task_resumes_its_parent() {
        let (provider, mut rx) = provider();
        let parent = provider.init_task(None, None).await.unwrap();
        let child = provider.spawn_sub_task(parent.task_id(), None).await.unwrap();
        let nested = provider.spawn_sub_task(child.task_id(), None).await.unwrap();

        child.abort_task().await.unwrap();

        assert!(nested.is_aborted().await);
        assert!(!parent.is_aborted().await);
        assert!(!parent.is_paused().await);
        assert_eq!(provider.task_ids().await, vec![parent.task_id().to_string()]);
        assert!(Arc::ptr_eq(&provider.get_current_task().await.unwrap(), &parent));
        assert_eq!(
            parent.tool_results().await,
            vec![format!("[subtask {} aborted]", child.task_id())]
        );

        let mut aborted = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ExtensionMessage::TaskAborted { task_id, .. } = msg {
                aborted.push(task_id);
            }
        }
        assert_eq!(
            aborted,
            vec![child.task_id().to_string(), nested.task_id().to_string()]
        );
    }

    #[tokio::test]
    async fn clear_task_finishes_sub_task_with_empty_result() {
        let (provider, _rx) = provider();
        let parent = provider.init_task(None, None).await.unwrap();
        let child = provider.spawn_sub_task(parent.task_id(), None).await.unwrap();

        provider.clear_task().await.unwrap();
        assert!(child.is_finished().await);
        assert!(!parent.is_paused().await);

        provider.clear_task().await.unwrap();
        assert!(parent.is_finished().await);
        assert!(provider.task_ids().await.is_empty());
        provider.clear_task().await.unwrap();
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_the_provider_alive() {
        let (provider, _rx) = provider();
        let weak = provider.downgrade();
        assert!(weak.upgrade().is_some());
        drop(provider);
        assert!(weak.upgrade().is_none());
        assert!(WeakTaskProvider::detached().upgrade().is_none());
    }
}
