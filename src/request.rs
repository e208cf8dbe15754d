//! Debug attach requests
//!
//! The launch configuration handed to the resolver. Only a few fields are
//! interpreted; everything else is carried through untouched for the
//! browser debugger that consumes the completed configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `type` of the requests this crate resolves
pub const ATTACH_TYPE: &str = "android-webview";

/// Tells the browser debugger the target was attached from the workspace side
pub const ATTACH_LOCATION: &str = "workspace";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    #[serde(rename = "type")]
    pub kind: String,
    /// Application whose web view should be debugged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Milliseconds to wait for the web view to show up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    /// Local port to forward to; adb picks one when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_attach_location: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttachRequest {
    pub fn new(package_name: Option<String>) -> Self {
        Self {
            kind: ATTACH_TYPE.to_string(),
            package_name,
            connect_timeout: None,
            port: None,
            browser_attach_location: None,
            extra: Map::new(),
        }
    }

    pub fn is_attach(&self) -> bool {
        self.kind == ATTACH_TYPE
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_millis)
    }

    /// Fill in the forwarded port for the browser debugger
    pub fn complete(&mut self, port: u16) {
        self.port = Some(port);
        self.browser_attach_location = Some(ATTACH_LOCATION.to_string());
    }
}
