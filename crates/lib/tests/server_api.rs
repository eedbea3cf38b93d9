//! Integration tests: serve the router on an ephemeral port and talk to it over HTTP.
//! Commands run through the real shell runner; scripts come from a temporary directory.

use lib::client::ApiClient;
use lib::config::{AuthMode, CommandMode, Config};
use lib::exec::ShellRunner;
use lib::server::{self, ServerState};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Temp dir with `config.json` and an empty `scripts/` directory.
fn temp_config_dir() -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("shellboard-server-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(dir.join("scripts")).expect("create scripts dir");
    let config_path = dir.join("config.json");
    std::fs::File::create(&config_path)
        .and_then(|mut f| f.write_all(b"{}"))
        .expect("write config.json");
    (dir, config_path)
}

fn write_script(dir: &Path, file: &str, body: &str) {
    std::fs::write(dir.join("scripts").join(file), body).expect("write script");
}

/// Serve `config` on an ephemeral loopback port; returns the base URL. The task is left running.
async fn start(config: Config, config_path: &Path) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local_addr");
    let state = ServerState::new(config, config_path, Arc::new(ShellRunner::new()));
    tokio::spawn(async move {
        let _ = server::serve(listener, state).await;
    });
    format!("http://{}", addr)
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .expect("send");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("parse JSON"))
}

#[tokio::test]
async fn run_server_health_responds_with_running() {
    let port = free_port();
    let (_temp_dir, config_path) = temp_config_dir();

    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();

    let server_handle = tokio::spawn(async move {
        let _ = server::run_server(config, config_path).await;
    });

    let url = format!("http://127.0.0.1:{}/health", port);
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json: Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
                assert_eq!(json.get("commandMode").and_then(|v| v.as_str()), Some("shell"));
                return;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    server_handle.abort();
    panic!(
        "GET {} did not return 200 with health JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn run_server_requires_init() {
    let dir = std::env::temp_dir().join(format!("shellboard-uninit-{}", uuid::Uuid::new_v4()));
    let err = server::run_server(Config::default(), dir.join("config.json"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("shellboard init"));
}

#[tokio::test]
async fn index_serves_the_page() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;
    let resp = reqwest::get(format!("{}/", base)).await.expect("GET /");
    assert!(resp.status().is_success());
    let body = resp.text().await.expect("body");
    assert!(body.contains("<title>Shellboard</title>"));
}

#[tokio::test]
async fn allowlisted_command_returns_output() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;

    let (status, body) = post(&base, "/api/execute", json!({ "command": "echo hello world" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["output"], "hello world\n");
    assert!(body.get("error").is_none());

    let (status, body) = post(&base, "/api/execute", json!({ "command": "ls" })).await;
    assert_eq!(status, 200);
    assert!(!body["output"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn silent_command_gets_success_message() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;
    let (status, body) = post(&base, "/api/execute", json!({ "command": "echo -n" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["output"], "Command executed successfully");
}

#[tokio::test]
async fn forbidden_command_names_the_token() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;

    let (status, body) = post(&base, "/api/execute", json!({ "command": "rm -rf /" })).await;
    assert_eq!(status, 403);
    let error = body["error"].as_str().expect("error string");
    assert!(error.starts_with("Command 'rm' is not allowed"), "{error}");
    assert!(error.contains("ls"));
}

#[tokio::test]
async fn invalid_command_bodies_are_rejected() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;

    for body in [json!({}), json!({ "command": 42 }), json!({ "command": "   " }), json!({ "command": null })] {
        let (status, reply) = post(&base, "/api/execute", body.clone()).await;
        assert_eq!(status, 400, "{body}");
        assert_eq!(reply["error"], "Invalid command");
    }

    let resp = reqwest::Client::new()
        .post(format!("{}/api/execute", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status().as_u16(), 400);
    let reply: Value = resp.json().await.expect("parse JSON");
    assert!(reply["error"].as_str().unwrap_or_default().starts_with("invalid JSON body"));
}

#[tokio::test]
async fn failing_command_reports_stderr() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;

    let (status, body) = post(
        &base,
        "/api/execute",
        json!({ "command": "ls /shellboard-definitely-missing" }),
    )
    .await;
    assert_eq!(status, 500);
    let error = body["error"].as_str().expect("error string");
    assert!(error.starts_with("Command failed: ls /shellboard-definitely-missing"), "{error}");
}

#[tokio::test]
async fn slow_command_times_out() {
    let (_dir, config_path) = temp_config_dir();
    let mut config = Config::default();
    config.commands.allowed.push("sleep".to_string());
    config.commands.timeout_ms = 200;
    let base = start(config, &config_path).await;

    let (status, body) = post(&base, "/api/execute", json!({ "command": "sleep 5" })).await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap_or_default().contains("timed out"));
}

/// Only the leading token is checked in shell mode; text after a separator still runs.
#[tokio::test]
async fn shell_mode_runs_text_after_allowlisted_token() {
    let (dir, config_path) = temp_config_dir();
    let secret = dir.join("secret.txt");
    std::fs::write(&secret, "shellboard-secret").expect("write secret");
    let base = start(Config::default(), &config_path).await;

    let line = format!("echo hi; cat {}", secret.display());
    let (status, body) = post(&base, "/api/execute", json!({ "command": line })).await;
    assert_eq!(status, 200);
    assert!(body["output"].as_str().unwrap_or_default().contains("shellboard-secret"));
}

#[tokio::test]
async fn direct_mode_passes_separators_as_arguments() {
    let (dir, config_path) = temp_config_dir();
    let secret = dir.join("secret.txt");
    std::fs::write(&secret, "shellboard-secret").expect("write secret");
    let mut config = Config::default();
    config.commands.mode = CommandMode::Direct;
    let base = start(config, &config_path).await;

    let line = format!("echo hi; cat {}", secret.display());
    let (status, body) = post(&base, "/api/execute", json!({ "command": line })).await;
    assert_eq!(status, 200);
    let output = body["output"].as_str().unwrap_or_default();
    assert_eq!(output, format!("hi; cat {}\n", secret.display()));
    assert!(!output.contains("shellboard-secret"));
}

#[tokio::test]
async fn registered_script_runs_and_echoes_name() {
    let (dir, config_path) = temp_config_dir();
    write_script(&dir, "disk-usage.sh", "#!/bin/bash\necho \"usage report\"\n");
    let base = start(Config::default(), &config_path).await;

    let (status, body) = post(&base, "/api/run-script", json!({ "scriptName": "disk-usage" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["output"], "usage report\n");
    assert_eq!(body["scriptName"], "disk-usage");
}

#[tokio::test]
async fn script_failure_still_returns_its_text() {
    let (dir, config_path) = temp_config_dir();
    write_script(&dir, "git-status.sh", "#!/bin/bash\necho \"not a git repository\" >&2\nexit 1\n");
    let base = start(Config::default(), &config_path).await;

    let (status, body) = post(&base, "/api/run-script", json!({ "scriptName": "git-status" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["output"], "not a git repository\n");
    assert_eq!(body["scriptName"], "git-status");
}

#[tokio::test]
async fn missing_script_file_reports_output_or_error() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;

    // bash exits non-zero with a "No such file" message on stderr.
    let (status, body) = post(&base, "/api/run-script", json!({ "scriptName": "backup" })).await;
    assert_eq!(status, 200);
    assert!(body["output"].as_str().unwrap_or_default().contains("backup.sh"));
}

#[tokio::test]
async fn unknown_script_names_are_rejected() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;

    for body in [
        json!({ "scriptName": "nonexistent" }),
        json!({ "scriptName": "../../etc/passwd" }),
        json!({ "scriptName": "" }),
        json!({ "scriptName": 7 }),
        json!({}),
    ] {
        let (status, reply) = post(&base, "/api/run-script", body.clone()).await;
        assert_eq!(status, 400, "{body}");
        assert_eq!(reply["error"], "Invalid script name");
    }
}

#[tokio::test]
async fn system_info_is_fresh_but_stable() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;
    let client = ApiClient::new(base, None);

    let a = client.system_info().await.expect("first snapshot");
    let b = client.system_info().await.expect("second snapshot");
    assert!(!a.hostname.is_empty());
    assert!(a.cpu_cores > 0);
    assert!(a.total_memory.ends_with(" GB"));
    assert!(a.uptime.ends_with(" hours"));
    assert_eq!(a.hostname, b.hostname);
    assert_eq!(a.platform, b.platform);
    assert_eq!(a.arch, b.arch);
    assert_eq!(a.cpu_model, b.cpu_model);
    assert_eq!(a.cpu_cores, b.cpu_cores);
    assert_eq!(a.total_memory, b.total_memory);
}

#[tokio::test]
async fn client_surfaces_error_bodies() {
    let (_dir, config_path) = temp_config_dir();
    let base = start(Config::default(), &config_path).await;
    let client = ApiClient::new(base, None);

    let reply = client.execute("rm -rf /").await.expect("reply");
    assert!(reply.output.is_none());
    assert!(reply.error.unwrap_or_default().contains("'rm'"));

    let reply = client.execute("pwd").await.expect("reply");
    assert!(reply.error.is_none());
    assert!(reply.output.unwrap_or_default().starts_with('/'));
}

#[tokio::test]
async fn token_mode_guards_api_routes_only() {
    let (_dir, config_path) = temp_config_dir();
    let mut config = Config::default();
    config.server.auth.mode = AuthMode::Token;
    config.server.auth.token = Some("s3cret".to_string());
    let expected = lib::config::resolve_token(&config).expect("token");
    let base = start(config, &config_path).await;

    let (status, body) = post(&base, "/api/execute", json!({ "command": "pwd" })).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Unauthorized");

    let resp = reqwest::get(format!("{}/health", base)).await.expect("GET /health");
    assert!(resp.status().is_success());

    let wrong = ApiClient::new(base.clone(), Some("nope".to_string()));
    assert!(wrong.system_info().await.is_err());

    let client = ApiClient::new(base, Some(expected));
    let reply = client.execute("pwd").await.expect("reply");
    assert!(reply.error.is_none());
    client.system_info().await.expect("authorized snapshot");
}
