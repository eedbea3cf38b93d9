//! JSON bodies returned by the HTTP API.

use serde::{Deserialize, Serialize};

/// Success body for `/api/execute` and `/api/run-script`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputBody {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
}

/// Failure body for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
}

/// `GET /health` (for probes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub runtime: String,
    pub port: u16,
    pub command_mode: String,
}
