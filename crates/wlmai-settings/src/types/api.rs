//! Endpoint addressing.

use serde::{Deserialize, Serialize};

/// Where the knowledge-base chat service lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Host name (optionally with `:port`).
    pub host: String,
    /// Path prefix shared by the WebSocket and REST endpoints.
    pub base_path: String,
    /// Scheme for the streaming endpoint.
    pub ws_scheme: String,
    /// Scheme for the REST endpoints.
    pub http_scheme: String,
    /// Timeout for REST requests in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "api.workloads.netapp.com".to_string(),
            base_path: "wlmai".to_string(),
            ws_scheme: "wss".to_string(),
            http_scheme: "https".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl ApiSettings {
    /// Root of the streaming endpoints, e.g. `wss://host/wlmai`.
    pub fn ws_base(&self) -> String {
        join_base(&self.ws_scheme, &self.host, &self.base_path)
    }

    /// Root of the REST endpoints, e.g. `https://host/wlmai`.
    pub fn http_base(&self) -> String {
        join_base(&self.http_scheme, &self.host, &self.base_path)
    }
}

fn join_base(scheme: &str, host: &str, base_path: &str) -> String {
    let path = base_path.trim_matches('/');
    if path.is_empty() {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}/{path}")
    }
}
