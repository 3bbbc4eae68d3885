mod lsp;
pub mod protocol;
mod provider;
mod server;
pub mod symbol;
mod workspace_edit;

pub use lsp::{LspClient, LspClientOptions, is_method_not_found, path_to_uri, uri_to_path};
pub use provider::{CapabilityProvider, unsupported};
pub use server::LanguageServerProvider;
pub use workspace_edit::{AppliedEdit, EditOptions, apply_workspace_edit};
