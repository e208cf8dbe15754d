//! Web View Discovery
//!
//! Finds the DevTools sockets a device exposes and works out which
//! application owns each one. Three listings are read from the device:
//!
//! - `/proc/net/unix`, for listening abstract sockets named `*_devtools_remote*`
//! - `ps`, to map the pid embedded in WebView socket names to a process
//! - `dumpsys package packages`, for the version of the owning package

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adb::{AdbCommand, AdbError, AdbRunner};
use crate::device::Device;

/// Package id of the Chrome browser
pub const CHROME_PACKAGE: &str = "com.android.chrome";

const CHROME_SOCKET: &str = "chrome_devtools_remote";
const WEBVIEW_SOCKET_PREFIX: &str = "webview_devtools_remote_";
const DEVTOOLS_SOCKET_MARKER: &str = "_devtools_remote";

/// `__SO_ACCEPTCON` in the socket table's flags column
const LISTENING_FLAGS: &str = "00010000";
/// `SS_UNCONNECTED` in the state column
const LISTENING_STATE: &str = "01";

const SOCKETS_COMMAND: &str = "cat /proc/net/unix";
const PROCESSES_COMMAND: &str = "ps";
const PACKAGES_COMMAND: &str = "dumpsys package packages";

/// What kind of application exposes a DevTools socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebViewType {
    Chrome,
    WebView,
    Crosswalk,
    Unknown,
}

impl WebViewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebViewType::Chrome => "chrome",
            WebViewType::WebView => "webview",
            WebViewType::Crosswalk => "crosswalk",
            WebViewType::Unknown => "unknown",
        }
    }
}

/// A debuggable web view on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebView {
    pub device: Device,
    /// Abstract socket name, without the leading `@`
    pub socket: String,
    #[serde(rename = "type")]
    pub kind: WebViewType,
    pub package_name: Option<String>,
    pub version_name: Option<String>,
}

impl WebView {
    pub fn display_name(&self) -> String {
        match (&self.package_name, &self.version_name) {
            (Some(package), Some(version)) => format!("{} {}", package, version),
            (Some(package), None) => package.clone(),
            _ => self.socket.clone(),
        }
    }
}

/// A row of the device's process list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: u32,
    pub name: String,
}

/// An installed package and its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub package_name: String,
    pub version_name: String,
}

/// Extract listening DevTools socket names from `/proc/net/unix`.
///
/// ```text
/// Num               RefCount Protocol Flags    Type St Inode Path
/// 0000000000000000: 00000002 00000000 00010000 0001 01 27955 /data/fpc/oem
/// 0000000000000000: 00000002 00000000 00010000 0001 01  3072 @chrome_devtools_remote
/// ```
pub fn parse_sockets(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 8 {
                return None;
            }
            if columns[3] != LISTENING_FLAGS || columns[5] != LISTENING_STATE {
                return None;
            }
            let name = columns[7].strip_prefix('@')?;
            name.contains(DEVTOOLS_SOCKET_MARKER)
                .then(|| name.to_string())
        })
        .collect()
}

/// Parse `ps` output. The pid is the second column and the name the ninth:
///
/// ```text
/// USER      PID   PPID  VSZ     RSS   WCHAN      ADDR       S NAME
/// u0_a123   4567  612   1398788 98440 SyS_epoll_ 0000000000 S com.example.app
/// ```
pub fn parse_processes(output: &str) -> Vec<Process> {
    output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 9 {
                return None;
            }
            let pid = columns[1].parse().ok()?;
            Some(Process {
                pid,
                name: columns[8].to_string(),
            })
        })
        .collect()
}

/// Parse `dumpsys package packages`.
///
/// A `Package [name] (hash):` line opens a record, and the next
/// `versionName=` line closes it. A package block without a version is
/// dropped when the following block opens.
pub fn parse_packages(output: &str) -> Vec<PackageRecord> {
    let mut packages = Vec::new();
    let mut pending: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("Package [") {
            pending = rest.split(']').next().map(|name| name.to_string());
            continue;
        }

        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        if let Some(version) = first.strip_prefix("versionName=") {
            if let Some(package_name) = pending.take() {
                packages.push(PackageRecord {
                    package_name,
                    version_name: version.to_string(),
                });
            }
        }
    }

    packages
}

/// Work out the type and owning package of a DevTools socket.
///
/// `processes` maps pid to process name.
pub fn classify_socket(
    socket: &str,
    processes: &HashMap<u32, String>,
) -> (WebViewType, Option<String>) {
    if socket == CHROME_SOCKET {
        return (WebViewType::Chrome, Some(CHROME_PACKAGE.to_string()));
    }

    if let Some(pid) = socket.strip_prefix(WEBVIEW_SOCKET_PREFIX) {
        let package = pid
            .parse::<u32>()
            .ok()
            .and_then(|pid| processes.get(&pid))
            .cloned();
        return (WebViewType::WebView, package);
    }

    if let Some(package) = socket.strip_suffix(DEVTOOLS_SOCKET_MARKER) {
        let package = (!package.is_empty()).then(|| package.to_string());
        return (WebViewType::Crosswalk, package);
    }

    (WebViewType::Unknown, None)
}

/// Combine the three device listings into web views, in socket order
pub fn correlate(
    device: &Device,
    sockets: Vec<String>,
    processes: Vec<Process>,
    packages: Vec<PackageRecord>,
) -> Vec<WebView> {
    let processes: HashMap<u32, String> =
        processes.into_iter().map(|p| (p.pid, p.name)).collect();
    // Updated system apps show up again under "Hidden system packages:"
    // with their factory version; the first record is the installed one.
    let mut versions: HashMap<String, String> = HashMap::new();
    for p in packages {
        versions.entry(p.package_name).or_insert(p.version_name);
    }

    sockets
        .into_iter()
        .map(|socket| {
            let (kind, package_name) = classify_socket(&socket, &processes);
            let version_name = package_name
                .as_ref()
                .and_then(|name| versions.get(name))
                .cloned();
            WebView {
                device: device.clone(),
                socket,
                kind,
                package_name,
                version_name,
            }
        })
        .collect()
}

/// Discovers web views on a device
#[derive(Clone)]
pub struct WebViewDiscovery {
    runner: Arc<dyn AdbRunner>,
}

impl WebViewDiscovery {
    pub fn new(runner: Arc<dyn AdbRunner>) -> Self {
        Self { runner }
    }

    /// List every DevTools socket on the device.
    ///
    /// The three listings are fetched concurrently; if any of them fails
    /// the whole discovery fails.
    pub async fn list_webviews(&self, device: &Device) -> Result<Vec<WebView>, AdbError> {
        let (sockets, processes, packages) = tokio::try_join!(
            self.shell(&device.serial, SOCKETS_COMMAND),
            self.shell(&device.serial, PROCESSES_COMMAND),
            self.shell(&device.serial, PACKAGES_COMMAND),
        )?;

        let webviews = correlate(
            device,
            parse_sockets(&sockets),
            parse_processes(&processes),
            parse_packages(&packages),
        );
        debug!("{} web view(s) on {}", webviews.len(), device.serial);
        Ok(webviews)
    }

    /// Web views on the device, restricted to `package_name` when given
    pub async fn find_webviews(
        &self,
        device: &Device,
        package_name: Option<&str>,
    ) -> Result<Vec<WebView>, AdbError> {
        let webviews = self.list_webviews(device).await?;
        Ok(match package_name {
            Some(package) => webviews
                .into_iter()
                .filter(|w| w.package_name.as_deref() == Some(package))
                .collect(),
            None => webviews,
        })
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<String, AdbError> {
        AdbCommand::new()
            .device(serial)
            .shell(command)
            .run(self.runner.as_ref())
            .await
    }
}
