//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.shellboard/config.json`) and environment.
//! Everything is read once at startup; the allow-list and script settings are immutable afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Command gate settings (allow-list, execution mode, limits).
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Script gate settings (scripts directory, limits).
    #[serde(default)]
    pub scripts: ScriptsConfig,
}

/// Server bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP (default 3000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: ServerAuthConfig,
}

/// Server auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require a bearer token on /api/*.
    #[serde(default)]
    pub mode: AuthMode,

    /// Shared secret for API requests. Overridden by SHELLBOARD_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>` to match configured token.
    Token,
}

fn default_server_port() -> u16 {
    3000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
            auth: ServerAuthConfig::default(),
        }
    }
}

/// How an allow-listed command line reaches the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// The whole line is handed to `sh -c`. Only the leading token is checked, so
    /// metacharacters after it (`;`, `|`, `&&`, backticks, redirection) are interpreted.
    #[default]
    Shell,

    /// The line is split on whitespace and executed as argv with no shell in between.
    Direct,
}

impl CommandMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandMode::Shell => "shell",
            CommandMode::Direct => "direct",
        }
    }
}

/// Leading tokens accepted by the command gate when `commands.allowed` is not set.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "ls", "pwd", "whoami", "date", "echo", "cat", "grep", "find", "df", "du", "ps", "top",
    "uptime", "free", "uname", "wc", "head", "tail", "sort", "uniq", "tree", "git", "npm",
    "node", "which", "env", "printenv", "hostname", "ifconfig", "netstat", "ping", "curl",
    "history", "clear", "man", "help",
];

/// 1 MiB per captured stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Command gate config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    /// Permitted leading tokens. Defaults to [`DEFAULT_ALLOWED_COMMANDS`].
    #[serde(default = "default_allowed_commands")]
    pub allowed: Vec<String>,

    /// "shell" (default) or "direct".
    #[serde(default)]
    pub mode: CommandMode,

    /// Wall-clock limit per command in milliseconds (default 10000).
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum captured bytes per output stream (default 1 MiB).
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_allowed_commands() -> Vec<String> {
    DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_commands(),
            mode: CommandMode::default(),
            timeout_ms: default_command_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Script gate config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptsConfig {
    /// Override the scripts directory. Relative paths are resolved against the config file's parent.
    /// Omit to use the `scripts` subdirectory next to the config file.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Wall-clock limit per script in milliseconds (default 15000).
    #[serde(default = "default_script_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum captured bytes per output stream (default 1 MiB).
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_script_timeout_ms() -> u64 {
    15_000
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            timeout_ms: default_script_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Resolve the API token: env SHELLBOARD_TOKEN overrides config.
pub fn resolve_token(config: &Config) -> Option<String> {
    std::env::var("SHELLBOARD_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .server
                .auth
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SHELLBOARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".shellboard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or SHELLBOARD_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the scripts directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Parent directory of the config file, or "." when the path has none.
fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Default scripts directory when no override is set: `scripts` subdirectory of the config file's parent.
pub fn scripts_dir(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("scripts")
}

/// Resolve the scripts directory: `config.scripts.directory` if set (relative paths resolved against the config file's parent), otherwise the default.
pub fn resolve_scripts_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.scripts.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_dir(config_path).join(d)
            }
        }
        _ => scripts_dir(config_path),
    }
}
