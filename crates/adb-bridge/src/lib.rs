//! Android Debug Bridge integration
//!
//! Finds devices, discovers debuggable web views on them and forwards
//! their DevTools sockets to local TCP ports.

pub mod adb;
pub mod device;
pub mod forward;
pub mod pages;
pub mod webview;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adb::{resolve_executable, AdbClient, AdbCommand, AdbError, AdbRunner};
pub use device::{Device, DeviceEnumerator, DeviceState};
pub use forward::{ForwardedSocket, PortForwardManager};
pub use pages::{BrowserVersion, DevToolsClient, WebViewPage};
pub use webview::{WebView, WebViewDiscovery, WebViewType, CHROME_PACKAGE};
