//! DevTools HTTP endpoint
//!
//! Once a web view's socket is forwarded, its pages can be listed over
//! plain HTTP on the local port.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adb::AdbError;

/// One inspectable target, from `/json/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebViewPage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Absent while another debugger is attached
    pub web_socket_debugger_url: Option<String>,
    pub devtools_frontend_url: Option<String>,
}

/// Response of `/json/version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "WebKit-Version")]
    pub webkit_version: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

/// Client for the DevTools endpoint behind a forwarded port
pub struct DevToolsClient {
    http: reqwest::Client,
    base_url: String,
}

impl DevToolsClient {
    pub fn new(port: u16) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{}", port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        // The endpoint is always a local forward; never route it via a proxy
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// List the pages the web view exposes
    pub async fn pages(&self) -> Result<Vec<WebViewPage>, AdbError> {
        self.get("/json/list").await
    }

    /// Browser and protocol version of the web view
    pub async fn version(&self) -> Result<BrowserVersion, AdbError> {
        self.get("/json/version").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AdbError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}
