//! HTTP client for the control panel API, used by the CLI and the desktop app.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{self, Config};
use crate::system_info::SystemSnapshot;

/// Body of `/api/execute` and `/api/run-script` responses, success or failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// What the UI asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Command(String),
    Script(String),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Client for the server described by `config` (wildcard binds are reached via loopback).
    pub fn from_config(config: &Config) -> Self {
        let bind = match config.server.bind.trim() {
            "0.0.0.0" | "" => "127.0.0.1".to_string(),
            "::" => "[::1]".to_string(),
            b if b.contains(':') && !b.starts_with('[') => format!("[{}]", b),
            b => b.to_string(),
        };
        Self::new(
            format!("http://{}:{}", bind, config.server.port),
            config::resolve_token(config),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    /// POST a JSON body and decode `ApiReply` whatever the status; the body carries the error text.
    async fn post_reply(&self, path: &str, body: serde_json::Value) -> Result<ApiReply, ClientError> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        serde_json::from_str::<ApiReply>(&text).map_err(|_| ClientError::Api {
            status: status.as_u16(),
            message: text,
        })
    }

    /// POST /api/execute
    pub async fn execute(&self, command: &str) -> Result<ApiReply, ClientError> {
        self.post_reply("/api/execute", json!({ "command": command }))
            .await
    }

    /// POST /api/run-script
    pub async fn run_script(&self, script_name: &str) -> Result<ApiReply, ClientError> {
        self.post_reply("/api/run-script", json!({ "scriptName": script_name }))
            .await
    }

    pub async fn submit(&self, submission: &Submission) -> Result<ApiReply, ClientError> {
        match submission {
            Submission::Command(c) => self.execute(c).await,
            Submission::Script(s) => self.run_script(s).await,
        }
    }

    /// GET /api/system-info
    pub async fn system_info(&self) -> Result<SystemSnapshot, ClientError> {
        let resp = self
            .request(reqwest::Method::GET, "/api/system-info")
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<SystemSnapshot>().await?);
        }
        let text = resp.text().await?;
        let message = serde_json::from_str::<ApiReply>(&text)
            .ok()
            .and_then(|r| r.error)
            .unwrap_or(text);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_decodes_camel_case_and_missing_fields() {
        let r: ApiReply =
            serde_json::from_str(r#"{"output":"ok","scriptName":"backup"}"#).unwrap();
        assert_eq!(r.output.as_deref(), Some("ok"));
        assert_eq!(r.script_name.as_deref(), Some("backup"));
        assert_eq!(r.error, None);

        let r: ApiReply = serde_json::from_str(r#"{"error":"nope"}"#).unwrap();
        assert_eq!(r.error.as_deref(), Some("nope"));
    }

    #[test]
    fn base_url_from_config() {
        let mut config = Config::default();
        assert_eq!(ApiClient::from_config(&config).base_url(), "http://127.0.0.1:3000");

        config.server.bind = "0.0.0.0".to_string();
        config.server.port = 8080;
        assert_eq!(ApiClient::from_config(&config).base_url(), "http://127.0.0.1:8080");

        config.server.bind = "::1".to_string();
        assert_eq!(ApiClient::from_config(&config).base_url(), "http://[::1]:8080");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let c = ApiClient::new("http://localhost:3000/", None);
        assert_eq!(c.base_url(), "http://localhost:3000");
    }
}
