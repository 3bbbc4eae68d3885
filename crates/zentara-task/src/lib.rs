//! Tasks, the registry that owns them and the router that delivers
//! webview messages to them.

pub mod message;
pub mod provider;
pub mod registry;
pub mod router;
pub mod task;

pub use message::{AskResponse, ExtensionMessage, MessageKind, TaskMessage, WebviewMessage};
pub use provider::{TaskProvider, WeakTaskProvider};
pub use registry::{RegistryError, TaskStack};
pub use router::{RouteTarget, RoutedCall, TaskRegistry, WebviewRouter};
pub use task::{AskReply, Task, TaskError, TaskInit};
