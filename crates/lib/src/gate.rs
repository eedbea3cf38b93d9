//! Command and script gates: validate a request, check it against the static allowlist or
//! script registry, then hand it to the process runner.
//!
//! The command gate only looks at the leading token. In shell mode the rest of the line is
//! interpreted by `sh`, so the allowlist is advisory and does not sandbox anything.

use axum::http::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{CommandMode, CommandsConfig, Config, ScriptsConfig};
use crate::exec::{self, base_command, Allowlist, Invocation, Limits, ProcessRunner};

pub const COMMAND_SUCCESS_MESSAGE: &str = "Command executed successfully";
pub const SCRIPT_SUCCESS_MESSAGE: &str = "Script executed successfully";

const INVALID_COMMAND: &str = "Invalid command";
const INVALID_SCRIPT_NAME: &str = "Invalid script name";

/// Symbolic script name -> file inside the scripts directory. Scripts take no arguments.
pub const SCRIPT_REGISTRY: &[(&str, &str)] = &[
    ("disk-usage", "disk-usage.sh"),
    ("network-info", "network-info.sh"),
    ("process-list", "process-list.sh"),
    ("backup", "backup.sh"),
    ("git-status", "git-status.sh"),
    ("project-stats", "project-stats.sh"),
    ("dependencies", "dependencies.sh"),
    ("env-check", "env-check.sh"),
    ("clean-project", "clean-project.sh"),
    ("port-check", "port-check.sh"),
];

/// Registered file name for a script, if the name is known.
pub fn registered_script(name: &str) -> Option<&'static str> {
    SCRIPT_REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, file)| *file)
}

/// Endpoint error taxonomy. Every variant becomes `{ "error": ... }` plus a status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Missing, non-string, or empty request field; malformed body.
    #[error("{0}")]
    InvalidInput(String),

    /// Leading token is not on the allowlist.
    #[error("{0}")]
    Forbidden(String),

    /// Script name is not in the registry.
    #[error("{0}")]
    NotFound(String),

    /// Spawn failure, timeout, output overflow, or non-zero exit from a command.
    #[error("{message}")]
    ExecutionFailed {
        message: String,
        script_name: Option<String>,
    },

    /// Reading host facts failed.
    #[error("{0}")]
    Server(String),

    /// Missing or wrong bearer token.
    #[error("Unauthorized")]
    Unauthorized,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::NotFound(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ExecutionFailed { .. } | ApiError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn script_name(&self) -> Option<&str> {
        match self {
            ApiError::ExecutionFailed { script_name, .. } => script_name.as_deref(),
            _ => None,
        }
    }
}

/// stdout, else stderr, else the fixed success message.
fn first_non_empty(stdout: String, stderr: String, fallback: &str) -> String {
    if !stdout.is_empty() {
        stdout
    } else if !stderr.is_empty() {
        stderr
    } else {
        fallback.to_string()
    }
}

/// Gate for free-text command lines.
pub struct CommandGate {
    allowlist: Allowlist,
    mode: CommandMode,
    limits: Limits,
    runner: Arc<dyn ProcessRunner>,
}

impl CommandGate {
    pub fn new(config: &CommandsConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            allowlist: Allowlist::from_names(&config.allowed),
            mode: config.mode,
            limits: Limits::new(config.timeout_ms, config.max_output_bytes),
            runner,
        }
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn mode(&self) -> CommandMode {
        self.mode
    }

    /// Validate the raw `command` field and decide what would run. No side effects.
    pub fn check(&self, raw: Option<&serde_json::Value>) -> Result<Invocation, ApiError> {
        let line = raw
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ApiError::InvalidInput(INVALID_COMMAND.to_string()))?;
        let base = base_command(line)
            .ok_or_else(|| ApiError::InvalidInput(INVALID_COMMAND.to_string()))?;
        if !self.allowlist.contains(base) {
            log::warn!("command rejected: '{}' is not allowlisted", base);
            return Err(ApiError::Forbidden(format!(
                "Command '{}' is not allowed. Allowed: {}",
                base,
                self.allowlist.names().join(", ")
            )));
        }
        let invocation = match self.mode {
            CommandMode::Shell => Invocation::Shell(line.to_string()),
            CommandMode::Direct => {
                let mut tokens = line.split_whitespace().map(String::from);
                let program = tokens.next().unwrap_or_default();
                Invocation::Direct {
                    program,
                    args: tokens.collect(),
                }
            }
        };
        log::debug!("command allowed ({}): {}", self.mode.as_str(), invocation);
        Ok(invocation)
    }

    /// Check and run. Returns the text for `{ "output": ... }`.
    pub async fn execute(&self, raw: Option<&serde_json::Value>) -> Result<String, ApiError> {
        let invocation = self.check(raw)?;
        match exec::run_bounded(self.runner.as_ref(), &invocation, &self.limits).await {
            Ok(out) if out.success() => Ok(first_non_empty(
                out.stdout,
                out.stderr,
                COMMAND_SUCCESS_MESSAGE,
            )),
            Ok(out) => {
                let mut message = format!("Command failed: {}", invocation);
                if !out.stderr.is_empty() {
                    message.push('\n');
                    message.push_str(&out.stderr);
                }
                log::warn!("command exited with {:?}: {}", out.exit_code, invocation);
                Err(ApiError::ExecutionFailed {
                    message,
                    script_name: None,
                })
            }
            Err(e) => {
                log::warn!("command failed: {}: {}", invocation, e);
                Err(ApiError::ExecutionFailed {
                    message: format!("Command failed: {}: {}", invocation, e),
                    script_name: None,
                })
            }
        }
    }
}

/// Successful script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    pub script_name: String,
    pub output: String,
}

/// Gate for registered scripts.
pub struct ScriptGate {
    directory: PathBuf,
    limits: Limits,
    runner: Arc<dyn ProcessRunner>,
}

impl ScriptGate {
    /// `directory` is made absolute against the current directory when relative.
    pub fn new(directory: PathBuf, config: &ScriptsConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        let directory = match std::env::current_dir() {
            Ok(cwd) if !directory.is_absolute() => cwd.join(directory),
            _ => directory,
        };
        Self {
            directory,
            limits: Limits::new(config.timeout_ms, config.max_output_bytes),
            runner,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Validate the raw `scriptName` field against the registry and resolve its path.
    /// Unknown names fail before any path is built.
    pub fn resolve(&self, raw: Option<&serde_json::Value>) -> Result<(String, PathBuf), ApiError> {
        let name = raw
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::NotFound(INVALID_SCRIPT_NAME.to_string()))?;
        let file = registered_script(name).ok_or_else(|| {
            log::warn!("script rejected: '{}' is not registered", name);
            ApiError::NotFound(INVALID_SCRIPT_NAME.to_string())
        })?;
        Ok((name.to_string(), self.directory.join(file)))
    }

    /// Resolve and run. A script that exits non-zero still returns its captured text.
    pub async fn run(&self, raw: Option<&serde_json::Value>) -> Result<ScriptRun, ApiError> {
        let (script_name, path) = self.resolve(raw)?;
        let invocation = Invocation::Shell(format!(
            "bash {}",
            shell_escape::escape(path.to_string_lossy())
        ));
        log::debug!("running script {} ({})", script_name, path.display());
        match exec::run_bounded(self.runner.as_ref(), &invocation, &self.limits).await {
            Ok(out) => {
                if !out.success() {
                    log::debug!("script {} exited with {:?}", script_name, out.exit_code);
                }
                Ok(ScriptRun {
                    output: first_non_empty(out.stdout, out.stderr, SCRIPT_SUCCESS_MESSAGE),
                    script_name,
                })
            }
            Err(e) => {
                log::warn!("script {} failed: {}", script_name, e);
                Err(ApiError::ExecutionFailed {
                    message: format!("Script '{}' failed: {}", script_name, e),
                    script_name: Some(script_name),
                })
            }
        }
    }
}

/// Both gates, built once at startup and shared by every request.
pub struct Gates {
    pub commands: CommandGate,
    pub scripts: ScriptGate,
}

impl Gates {
    pub fn new(config: &Config, scripts_dir: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            commands: CommandGate::new(&config.commands, runner.clone()),
            scripts: ScriptGate::new(scripts_dir, &config.scripts, runner),
        }
    }
}
