//! droidlink - attach browser debuggers to Android web views
//!
//! Finds the DevTools sockets that Chrome and WebView-based apps expose on
//! connected devices, forwards one of them to a local TCP port and hands
//! back a completed attach configuration.
//!
//! ## Architecture
//!
//! - `droidlink-core`: configuration, errors and the event bus
//! - `droidlink-adb-bridge`: adb process client, device listing, web view
//!   discovery, port forwards and the DevTools HTTP client
//! - this crate: the attach resolver, the debug session and the CLI

#![warn(clippy::all)]

pub mod commands;
pub mod poll;
pub mod request;
pub mod resolver;
pub mod session;

// Re-export main components for library usage
pub use droidlink_adb_bridge as bridge;
pub use droidlink_core as core;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::request::AttachRequest;
    pub use crate::resolver::{DebugConfigurationResolver, Resolution, ResolveFailure};
    pub use crate::session::DebugSession;
    pub use droidlink_adb_bridge::{
        AdbClient, AdbRunner, Device, DeviceEnumerator, PortForwardManager, WebView,
        WebViewDiscovery,
    };
    pub use droidlink_core::{AppConfig, Event, EventBus};
}
