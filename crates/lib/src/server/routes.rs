//! Router, handlers, and server lifecycle.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::protocol::{ErrorBody, Health, OutputBody};
use crate::config::{self, AuthMode, CommandMode, Config};
use crate::exec::{ProcessRunner, ShellRunner};
use crate::gate::{ApiError, Gates};
use crate::init;
use crate::system_info::{self, SystemSnapshot};

const INDEX_HTML: &str = include_str!("page.html");

/// Shared state for the server: immutable config and the gates built from it.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub gates: Arc<Gates>,
    /// When Some, every /api/* request must carry `Authorization: Bearer <token>` matching this.
    pub required_token: Option<String>,
}

impl ServerState {
    /// Build the allowlist, script registry path, and auth requirement once; nothing mutates them later.
    pub fn new(config: Config, config_path: &Path, runner: Arc<dyn ProcessRunner>) -> Self {
        let scripts_dir = config::resolve_scripts_dir(&config, config_path);
        let required_token = if config.server.auth.mode == AuthMode::Token {
            config::resolve_token(&config)
        } else {
            None
        };
        let gates = Gates::new(&config, scripts_dir, runner);
        Self {
            config: Arc::new(config),
            gates: Arc::new(gates),
            required_token,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
            script_name: self.script_name().map(String::from),
        };
        (status, Json(body)).into_response()
    }
}

/// Routes: `/` (UI page), `/health`, and the token-guarded `/api/*` endpoints.
pub fn build_router(state: ServerState) -> Router {
    let api = Router::new()
        .route("/api/execute", post(execute))
        .route("/api/run-script", post(run_script))
        .route("/api/system-info", get(get_system_info))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
}

/// `host:port`, bracketing bare IPv6 addresses.
fn bind_addr(bind: &str, port: u16) -> String {
    if bind.contains(':') && !bind.starts_with('[') {
        format!("[{}]:{}", bind, port)
    } else {
        format!("{}:{}", bind, port)
    }
}

/// Run the server; binds to config.server.bind:config.server.port.
/// When bind is not loopback, token auth must be configured or startup fails.
/// Blocks until shutdown (e.g. Ctrl+C).
/// Requires the configuration directory to be initialized (`shellboard init`) so the scripts directory exists.
pub async fn run_server(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.server.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_token(&config);
        if token.is_none() || config.server.auth.mode != AuthMode::Token {
            anyhow::bail!(
                "refusing to bind to {} without auth (set server.auth.mode to \"token\" and server.auth.token or SHELLBOARD_TOKEN)",
                bind
            );
        }
    }

    let addr = bind_addr(&bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;

    let state = ServerState::new(config, &config_path, Arc::new(ShellRunner::new()));
    log::info!(
        "{} allowlisted command(s), scripts from {}",
        state.gates.commands.allowlist().names().len(),
        state.gates.scripts.directory().display()
    );
    if state.gates.commands.mode() == CommandMode::Shell {
        log::warn!(
            "command allowlist is advisory: only the leading token is checked and the rest of the line is run by sh (set commands.mode to \"direct\" to run without a shell)"
        );
    }
    serve(listener, state).await
}

/// Serve on an already bound listener until a shutdown signal arrives.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("listening on http://{}", addr);
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited")?;
    log::info!("server stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// Rejects /api/* requests without the configured bearer token.
async fn require_token(State(state): State<ServerState>, req: Request, next: Next) -> Response {
    if let Some(expected) = state.required_token.as_deref() {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or("");
        if !token_matches(provided, expected) {
            log::warn!("rejected {} {}: bad or missing token", req.method(), req.uri().path());
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(req).await
}

/// Constant-time for equal lengths; a length mismatch fails without comparing bytes.
fn token_matches(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

/// Bodies are parsed by hand so a non-string field is reported as InvalidInput rather than a
/// generic extractor rejection.
fn parse_body(body: &Bytes) -> Result<serde_json::Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidInput(format!("invalid JSON body: {}", e)))
}

/// POST /api/execute: `{ "command": "..." }`.
async fn execute(
    State(state): State<ServerState>,
    body: Bytes,
) -> Result<Json<OutputBody>, ApiError> {
    let payload = parse_body(&body)?;
    let output = state.gates.commands.execute(payload.get("command")).await?;
    Ok(Json(OutputBody {
        output,
        script_name: None,
    }))
}

/// POST /api/run-script: `{ "scriptName": "..." }`.
async fn run_script(
    State(state): State<ServerState>,
    body: Bytes,
) -> Result<Json<OutputBody>, ApiError> {
    let payload = parse_body(&body)?;
    let run = state.gates.scripts.run(payload.get("scriptName")).await?;
    Ok(Json(OutputBody {
        output: run.output,
        script_name: Some(run.script_name),
    }))
}

/// GET /api/system-info: fresh snapshot on every call.
async fn get_system_info() -> Result<Json<SystemSnapshot>, ApiError> {
    let snapshot = tokio::task::spawn_blocking(system_info::snapshot)
        .await
        .map_err(|e| ApiError::Server(format!("system info task failed: {}", e)))??;
    Ok(Json(snapshot))
}

/// GET / serves the single-page UI.
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health returns a simple health JSON (for probes).
async fn health(State(state): State<ServerState>) -> Json<Health> {
    Json(Health {
        runtime: "running".to_string(),
        port: state.config.server.port,
        command_mode: state.gates.commands.mode().as_str().to_string(),
    })
}
