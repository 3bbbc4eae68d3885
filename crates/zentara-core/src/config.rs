use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_INITIALIZE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_ABORT_WAIT_MS: u64 = 3_000;
pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ZentaraConfig {
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub servers: Option<Vec<LspServerConfig>>,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub tasks: Option<TasksConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LspServerConfig {
    /// Optional stable identifier used in logs.
    #[serde(default)]
    pub id: Option<String>,
    /// Command to start the server (stdio transport).
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// File extensions (without a leading dot) routed to this server, e.g. `["ts", "tsx"]`.
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    /// languageId sent with `textDocument/didOpen`.
    /// If omitted, a best-effort mapping from the first extension is used.
    #[serde(default)]
    #[serde(alias = "languageId")]
    pub language_id: Option<String>,
    /// Root directory for this server (absolute or relative to `workspace_root`).
    #[serde(default)]
    #[serde(alias = "rootDir")]
    pub root_dir: Option<PathBuf>,
    #[serde(default)]
    pub initialize_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    /// `initializationOptions` passed to the `initialize` request.
    #[serde(default)]
    #[serde(alias = "initializeOptions")]
    pub initialize_options: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Deny every mutating LSP operation (rename, symbol inserts/replacements).
    #[serde(default)]
    pub read_only: Option<bool>,
    /// Approve mutating operations without asking the user.
    #[serde(default)]
    pub auto_approve_writes: Option<bool>,
    /// Upper bound for a single capability call.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub create_backups: Option<bool>,
    #[serde(default)]
    pub backup_suffix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct TasksConfig {
    /// How long `cancel_task` waits for an aborted task to settle.
    #[serde(default)]
    pub abort_wait_ms: Option<u64>,
}

/// Effective tool settings after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPolicy {
    pub read_only: bool,
    pub auto_approve_writes: bool,
    pub request_timeout: Duration,
    pub create_backups: bool,
    pub backup_suffix: String,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            read_only: false,
            auto_approve_writes: false,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            create_backups: false,
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPolicy {
    pub abort_wait: Duration,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            abort_wait: Duration::from_millis(DEFAULT_ABORT_WAIT_MS),
        }
    }
}

impl ZentaraConfig {
    pub fn tool_policy(&self) -> ToolPolicy {
        let defaults = ToolPolicy::default();
        let Some(tools) = self.tools.as_ref() else {
            return defaults;
        };
        ToolPolicy {
            read_only: tools.read_only.unwrap_or(defaults.read_only),
            auto_approve_writes: tools
                .auto_approve_writes
                .unwrap_or(defaults.auto_approve_writes),
            request_timeout: tools
                .request_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            create_backups: tools.create_backups.unwrap_or(defaults.create_backups),
            backup_suffix: tools
                .backup_suffix
                .clone()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.backup_suffix),
        }
    }

    pub fn task_policy(&self) -> TaskPolicy {
        let abort_wait = self
            .tasks
            .as_ref()
            .and_then(|t| t.abort_wait_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| TaskPolicy::default().abort_wait);
        TaskPolicy { abort_wait }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ZentaraConfig,
    pub workspace_root: PathBuf,
    pub source: ConfigSource,
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    None,
    Path(PathBuf),
    Env(PathBuf),
    Workspace(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ResolvedServerConfig {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub extensions: Vec<String>,
    pub language_id: String,
    pub root_dir: PathBuf,
    pub initialize_timeout: Duration,
    pub request_timeout: Duration,
    pub env: HashMap<String, String>,
    pub initialize_options: Option<JsonValue>,
}

pub fn load_config(
    cli_config_path: Option<&Path>,
    cli_workspace_root: Option<&Path>,
) -> Result<LoadedConfig> {
    if let Some(path) = cli_config_path {
        let config = read_config_file(path)?;
        let workspace_root =
            resolve_workspace_root(cli_workspace_root, config.workspace_root.as_deref())?;
        return Ok(LoadedConfig {
            config,
            workspace_root,
            source: ConfigSource::Path(path.to_path_buf()),
        });
    }

    if let Ok(path) = std::env::var("ZENTARA_CONFIG_PATH")
        && !path.trim().is_empty()
    {
        let path = PathBuf::from(path);
        let config = read_config_file(&path)?;
        let workspace_root =
            resolve_workspace_root(cli_workspace_root, config.workspace_root.as_deref())?;
        return Ok(LoadedConfig {
            config,
            workspace_root,
            source: ConfigSource::Env(path),
        });
    }

    let fallback_root = cli_workspace_root
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let workspace_root = fallback_root
        .canonicalize()
        .unwrap_or(fallback_root.clone());

    for candidate in workspace_config_candidates(&workspace_root) {
        if candidate.exists() {
            let config = read_config_file(&candidate)?;
            let effective_root =
                resolve_workspace_root(Some(&workspace_root), config.workspace_root.as_deref())?;
            return Ok(LoadedConfig {
                config,
                workspace_root: effective_root,
                source: ConfigSource::Workspace(candidate),
            });
        }
    }

    Ok(LoadedConfig {
        config: ZentaraConfig::default(),
        workspace_root,
        source: ConfigSource::None,
    })
}

fn resolve_workspace_root(cli: Option<&Path>, from_config: Option<&Path>) -> Result<PathBuf> {
    if let Some(cli) = cli {
        return cli
            .canonicalize()
            .with_context(|| format!("failed to canonicalize workspace_root: {cli:?}"));
    }
    if let Some(cfg) = from_config {
        return cfg
            .canonicalize()
            .with_context(|| format!("failed to canonicalize workspace_root: {cfg:?}"));
    }
    let cwd = std::env::current_dir().context("failed to get current_dir")?;
    Ok(cwd.canonicalize().unwrap_or(cwd))
}

fn workspace_config_candidates(workspace_root: &Path) -> Vec<PathBuf> {
    vec![
        workspace_root.join(".zentara").join("config.toml"),
        workspace_root.join(".zentara").join("config.json"),
        workspace_root.join("zentara.toml"),
        workspace_root.join("zentara.json"),
    ]
}

fn read_config_file(path: &Path) -> Result<ZentaraConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read config file: {path:?}"))?;
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or("");

    if ext.eq_ignore_ascii_case("toml") {
        let s = String::from_utf8(bytes).context("config file is not valid UTF-8")?;
        let cfg: ZentaraConfig = toml::from_str(&s).context("failed to parse TOML config")?;
        return Ok(cfg);
    }
    if ext.eq_ignore_ascii_case("json") {
        let cfg: ZentaraConfig =
            serde_json::from_slice(&bytes).context("failed to parse JSON config")?;
        return Ok(cfg);
    }

    Err(anyhow!(
        "unsupported config extension (expected .toml or .json): {path:?}"
    ))
}

pub fn resolved_servers(
    config: &ZentaraConfig,
    workspace_root: &Path,
) -> Vec<ResolvedServerConfig> {
    let workspace_root = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());

    if let Some(servers) = config.servers.as_ref().filter(|s| !s.is_empty()) {
        return servers
            .iter()
            .enumerate()
            .map(|(idx, s)| resolve_server_config(s, idx, &workspace_root))
            .collect();
    }

    vec![default_rust_analyzer_server(&workspace_root)]
}

pub fn route_server_by_path<'a>(
    file_path: &Path,
    servers: &'a [ResolvedServerConfig],
) -> Option<&'a ResolvedServerConfig> {
    let ext = file_path
        .extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_ascii_lowercase())?;

    let mut matches: Vec<&ResolvedServerConfig> = servers
        .iter()
        .filter(|s| s.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
        .collect();

    if matches.is_empty() {
        return None;
    }

    let mut contained: Vec<&ResolvedServerConfig> = matches
        .iter()
        .copied()
        .filter(|s| file_path.starts_with(&s.root_dir))
        .collect();

    if contained.is_empty() {
        return Some(matches.remove(0));
    }

    contained.sort_by_key(|s| std::cmp::Reverse(s.root_dir.components().count()));
    Some(contained[0])
}

fn resolve_server_config(
    server: &LspServerConfig,
    index: usize,
    workspace_root: &Path,
) -> ResolvedServerConfig {
    let extensions = server
        .extensions
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter_map(normalize_extension)
        .collect::<Vec<_>>();

    let command = server
        .command
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("rust-analyzer")
        .to_string();

    let id = server
        .id
        .as_deref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_server_id(&command, index));

    let language_id = server
        .language_id
        .as_deref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| extensions.first().map(|e| language_id_for_extension(e)))
        .unwrap_or_else(|| "plaintext".to_string());

    ResolvedServerConfig {
        id,
        command,
        args: server.args.clone().unwrap_or_default(),
        extensions,
        language_id,
        root_dir: resolve_root_dir(workspace_root, server.root_dir.as_deref()),
        initialize_timeout: Duration::from_millis(
            server
                .initialize_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_INITIALIZE_TIMEOUT_MS),
        ),
        request_timeout: Duration::from_millis(
            server
                .request_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        ),
        env: server.env.clone().unwrap_or_default(),
        initialize_options: server.initialize_options.clone(),
    }
}

fn default_rust_analyzer_server(workspace_root: &Path) -> ResolvedServerConfig {
    ResolvedServerConfig {
        id: "rust-analyzer".to_string(),
        command: "rust-analyzer".to_string(),
        args: Vec::new(),
        extensions: vec!["rs".to_string()],
        language_id: "rust".to_string(),
        root_dir: workspace_root.to_path_buf(),
        initialize_timeout: Duration::from_millis(DEFAULT_INITIALIZE_TIMEOUT_MS),
        request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        env: HashMap::new(),
        initialize_options: None,
    }
}

fn default_server_id(command: &str, index: usize) -> String {
    let stem = Path::new(command)
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("server")
        .to_string();
    if index == 0 {
        stem
    } else {
        format!("{stem}-{}", index + 1)
    }
}

pub fn language_id_for_extension(ext: &str) -> String {
    match ext {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "go" => "go",
        "cs" => "csharp",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "rb" => "ruby",
        "vue" => "vue",
        other => other,
    }
    .to_string()
}

fn normalize_extension(ext: String) -> Option<String> {
    let ext = ext.trim();
    let ext = ext.strip_prefix('.').unwrap_or(ext).trim();
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn resolve_root_dir(workspace_root: &Path, root_dir: Option<&Path>) -> PathBuf {
    let resolved = match root_dir {
        None => workspace_root.to_path_buf(),
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => workspace_root.join(p),
    };
    resolved.canonicalize().unwrap_or(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolved_servers_defaults_to_rust_analyzer() {
        let root = tempdir().unwrap();
        let root_canon = root.path().canonicalize().unwrap();
        let servers = resolved_servers(&ZentaraConfig::default(), root.path());
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "rust-analyzer");
        assert_eq!(servers[0].extensions, vec!["rs".to_string()]);
        assert_eq!(servers[0].language_id, "rust");
        assert_eq!(servers[0].root_dir, root_canon);
    }

    #[test]
    fn resolved_servers_normalizes_extensions_and_infers_language_id() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("web")).unwrap();

        let toml = r#"
[[servers]]
command = "typescript-language-server"
args = ["--stdio"]
extensions = [".TS", "tsx", ""]
root_dir = "web"
"#;
        let config: ZentaraConfig = toml::from_str(toml).unwrap();
        let servers = resolved_servers(&config, root.path());
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "typescript-language-server");
        assert_eq!(servers[0].extensions, vec!["ts".to_string(), "tsx".to_string()]);
        assert_eq!(servers[0].language_id, "typescript");
        assert!(servers[0].root_dir.ends_with("web"));
    }

    #[test]
    fn json_accepts_camel_case_aliases() {
        let json = r#"
{
  "servers": [
    { "id": "py", "command": "pyright-langserver", "extensions": ["py"], "languageId": "python", "rootDir": "." }
  ]
}
"#;
        let config: ZentaraConfig = serde_json::from_str(json).unwrap();
        let server = config.servers.unwrap().into_iter().next().unwrap();
        assert_eq!(server.language_id.as_deref(), Some("python"));
        assert_eq!(server.root_dir.as_deref(), Some(Path::new(".")));
    }

    #[test]
    fn tool_policy_applies_defaults_and_overrides() {
        assert_eq!(ZentaraConfig::default().tool_policy(), ToolPolicy::default());

        let toml = r#"
[tools]
read_only = true
request_timeout_ms = 1500
backup_suffix = "  "

[tasks]
abort_wait_ms = 250
"#;
        let config: ZentaraConfig = toml::from_str(toml).unwrap();
        let policy = config.tool_policy();
        assert!(policy.read_only);
        assert!(!policy.auto_approve_writes);
        assert_eq!(policy.request_timeout, Duration::from_millis(1500));
        assert_eq!(policy.backup_suffix, DEFAULT_BACKUP_SUFFIX);
        assert_eq!(config.task_policy().abort_wait, Duration::from_millis(250));
    }

    #[test]
    fn load_config_reads_workspace_candidate() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join(".zentara")).unwrap();
        std::fs::write(
            root.path().join(".zentara").join("config.toml"),
            "[tools]\nauto_approve_writes = true\n",
        )
        .unwrap();

        let loaded = load_config(None, Some(root.path())).unwrap();
        assert!(matches!(loaded.source, ConfigSource::Workspace(_)));
        assert!(loaded.config.tool_policy().auto_approve_writes);
    }

    #[test]
    fn load_config_rejects_unknown_extension() {
        let root = tempdir().unwrap();
        let path = root.path().join("config.yaml");
        std::fs::write(&path, "tools: {}\n").unwrap();
        let err = load_config(Some(&path), Some(root.path())).unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn route_server_by_path_prefers_longest_root_dir_match() {
        let servers = vec![
            ResolvedServerConfig {
                root_dir: PathBuf::from("/repo"),
                ..default_rust_analyzer_server(Path::new("/repo"))
            },
            ResolvedServerConfig {
                id: "nested".to_string(),
                root_dir: PathBuf::from("/repo/crates/inner"),
                ..default_rust_analyzer_server(Path::new("/repo"))
            },
        ];
        let routed =
            route_server_by_path(Path::new("/repo/crates/inner/src/lib.rs"), &servers).unwrap();
        assert_eq!(routed.id, "nested");
        assert!(route_server_by_path(Path::new("/repo/readme.md"), &servers).is_none());
    }
}
