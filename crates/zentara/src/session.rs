use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zentara_lsp::{EditOptions, LanguageServerProvider};
use zentara_task::{ExtensionMessage, TaskProvider, WebviewMessage, WebviewRouter};
use zentara_tools::LspToolDispatcher;

/// How long queued outbound messages may take to drain once stdin closes.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub config_path: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
}

pub async fn run_stdio(options: SessionOptions) -> Result<()> {
    let loaded = zentara_core::config::load_config(
        options.config_path.as_deref(),
        options.workspace_root.as_deref(),
    )?;
    let tool_policy = loaded.config.tool_policy();
    let servers = zentara_core::config::resolved_servers(&loaded.config, &loaded.workspace_root);
    info!(
        workspace_root = %loaded.workspace_root.display(),
        servers = servers.len(),
        "starting session"
    );

    let provider = Arc::new(LanguageServerProvider::new(
        loaded.workspace_root.clone(),
        servers,
        EditOptions {
            create_backups: tool_policy.create_backups,
            backup_suffix: tool_policy.backup_suffix.clone(),
        },
    ));
    let dispatcher = Arc::new(LspToolDispatcher::new(
        provider.clone(),
        tool_policy.request_timeout,
    ));

    let (outbound, rx) = mpsc::unbounded_channel();
    let tasks = TaskProvider::new(dispatcher, loaded.config.task_policy(), outbound);
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let result = serve(WebviewRouter::new(tasks), rx, input, tokio::io::stdout()).await;

    provider.shutdown().await;
    result
}

/// Reads one webview message per line from `input` and writes every
/// extension message as one JSON line to `output`.
///
/// Messages are resolved in arrival order; the resulting calls run on
/// their own tasks so a pending ask never blocks the next line.
pub async fn serve<R, W>(
    router: WebviewRouter<TaskProvider>,
    outbound: mpsc::UnboundedReceiver<ExtensionMessage>,
    input: R,
    output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut writer = tokio::spawn(write_messages(outbound, output));

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: WebviewMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                warn!("skipping malformed webview message: {err}");
                continue;
            }
        };

        match router.resolve(message).await {
            Ok(call) => {
                tokio::spawn(async move {
                    if let Err(err) = call.run().await {
                        error!("webview message handler failed: {err}");
                    }
                });
            }
            Err(err) => error!("failed to route webview message: {err}"),
        }
    }

    debug!("input closed");
    drop(router);
    match tokio::time::timeout(DRAIN_GRACE, &mut writer).await {
        Ok(joined) => joined.context("outbound writer panicked")?,
        Err(_) => {
            debug!("outbound writer still busy after input closed");
            writer.abort();
            Ok(())
        }
    }
}

async fn write_messages<W>(
    mut outbound: mpsc::UnboundedReceiver<ExtensionMessage>,
    mut output: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(err) => {
                warn!("failed to serialize extension message: {err}");
                continue;
            }
        };
        line.push('\n');
        output
            .write_all(line.as_bytes())
            .await
            .context("failed to write to stdout")?;
        output.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}
