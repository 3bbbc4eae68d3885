use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use zentara_tools::LspOperation;

mod session;

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "zentara")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a task session over stdio (one JSON message per line)
    Session {
        /// Optional path to a zentara config file (.toml or .json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override workspace root (defaults to config or current directory)
        #[arg(long)]
        workspace_root: Option<PathBuf>,
    },
    /// Run MCP server over stdio exposing the `lsp` tool
    Mcp {
        /// Optional path to a zentara config file (.toml or .json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override workspace root (defaults to config or current directory)
        #[arg(long)]
        workspace_root: Option<PathBuf>,
        /// Deny every mutating operation
        #[arg(long)]
        read_only: bool,
        /// Allow mutating operations even if the config says read-only
        #[arg(long, conflicts_with = "read_only")]
        read_write: bool,
    },
    /// List the supported LSP operations
    Operations {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print environment/config diagnostics
    Doctor {
        /// Optional path to a zentara config file (.toml or .json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override workspace root (defaults to config or current directory)
        #[arg(long)]
        workspace_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol traffic for `session` and `mcp`.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Session {
            config,
            workspace_root,
        } => {
            session::run_stdio(session::SessionOptions {
                config_path: config,
                workspace_root,
            })
            .await
        }
        Command::Mcp {
            config,
            workspace_root,
            read_only,
            read_write,
        } => {
            zentara_mcp::run_stdio_with_options(zentara_mcp::McpOptions {
                config_path: config,
                workspace_root,
                read_only,
                read_write,
            })
            .await
        }
        Command::Operations { json } => {
            print_operations(json)?;
            Ok(())
        }
        Command::Doctor {
            config,
            workspace_root,
        } => doctor(config, workspace_root).await,
    }
}

fn print_operations(json: bool) -> Result<()> {
    if json {
        let rows: Vec<serde_json::Value> = LspOperation::ALL
            .iter()
            .map(|op| {
                serde_json::json!({
                    "name": op.name(),
                    "mutating": op.is_mutating(),
                    "summary": op.summary(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let width = LspOperation::ALL
        .iter()
        .map(|op| op.name().len())
        .max()
        .unwrap_or_default();
    for op in LspOperation::ALL {
        let flag = if op.is_mutating() { "write" } else { "read" };
        println!("{:<width$}  {flag:<5}  {}", op.name(), op.summary());
    }
    Ok(())
}

async fn doctor(config: Option<PathBuf>, workspace_root: Option<PathBuf>) -> Result<()> {
    let loaded = zentara_core::config::load_config(config.as_deref(), workspace_root.as_deref())?;

    println!("config_source: {:?}", loaded.source);
    println!("workspace_root: {}", loaded.workspace_root.display());

    let policy = loaded.config.tool_policy();
    println!(
        "tools: read_only={} auto_approve_writes={} request_timeout_ms={} create_backups={}",
        policy.read_only,
        policy.auto_approve_writes,
        policy.request_timeout.as_millis(),
        policy.create_backups
    );
    println!(
        "tasks: abort_wait_ms={}",
        loaded.config.task_policy().abort_wait.as_millis()
    );

    let servers = zentara_core::config::resolved_servers(&loaded.config, &loaded.workspace_root);
    println!("servers.count: {}", servers.len());
    for (idx, s) in servers.iter().enumerate() {
        println!("server[{idx}].id: {}", s.id);
        println!("server[{idx}].root_dir: {}", s.root_dir.display());
        println!("server[{idx}].extensions: {:?}", s.extensions);
        println!("server[{idx}].language_id: {}", s.language_id);
        println!("server[{idx}].command: {}", s.command);
        println!("server[{idx}].args: {:?}", s.args);
        println!(
            "server[{idx}].timeouts_ms: initialize={} request={}",
            s.initialize_timeout.as_millis(),
            s.request_timeout.as_millis()
        );
    }

    let mut failures = 0usize;
    for s in &servers {
        println!("server_preflight: id={} command={}", s.id, s.command);
        let output = tokio::time::timeout(
            PREFLIGHT_TIMEOUT,
            TokioCommand::new(&s.command)
                .arg("--version")
                .envs(&s.env)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if !stdout.is_empty() {
                    println!("server_version: id={} {stdout}", s.id);
                } else if !stderr.is_empty() {
                    println!("server_version: id={} {stderr}", s.id);
                } else {
                    println!("server_version: id={} <unknown>", s.id);
                }
            }
            Ok(Err(err)) => {
                eprintln!("doctor_error: id={} error={err}", s.id);
                eprintln!(
                    "doctor_hint: Install `{}` and ensure it is on PATH, or set servers[].command explicitly.",
                    s.command
                );
                failures += 1;
            }
            Err(_) => {
                eprintln!(
                    "doctor_error: id={} error=`{} --version` did not finish within {}s",
                    s.id,
                    s.command,
                    PREFLIGHT_TIMEOUT.as_secs()
                );
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("doctor failed for {failures} server(s). See stderr for details.");
    }
    Ok(())
}
