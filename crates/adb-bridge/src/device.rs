//! Device Types and Enumeration
//!
//! Parses `adb devices -l` into device records.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adb::{AdbCommand, AdbError, AdbRunner};

/// Device state, as printed in the second column of `adb devices`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceState {
    /// Device is online and ready
    Device,
    Connecting,
    Offline,
    Unknown,
    Bootloader,
    Recovery,
    /// Samsung download mode
    Download,
    /// Device is not authorized (need to accept on device)
    Unauthorized,
    Host,
    /// Host user lacks permission to open the USB device
    NoPermissions,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Device => "device",
            DeviceState::Connecting => "connecting",
            DeviceState::Offline => "offline",
            DeviceState::Unknown => "unknown",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Recovery => "recovery",
            DeviceState::Download => "download",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Host => "host",
            DeviceState::NoPermissions => "no-permissions",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let state = match keyword {
            "device" => DeviceState::Device,
            "connecting" => DeviceState::Connecting,
            "offline" => DeviceState::Offline,
            "unknown" => DeviceState::Unknown,
            "bootloader" => DeviceState::Bootloader,
            "recovery" => DeviceState::Recovery,
            "download" => DeviceState::Download,
            "unauthorized" => DeviceState::Unauthorized,
            "host" => DeviceState::Host,
            "no-permissions" => DeviceState::NoPermissions,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, DeviceState::Device)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device serial number
    pub serial: String,
    /// Device state
    pub state: DeviceState,
    /// USB port path (e.g. "1-1.2")
    pub usb: Option<String>,
    /// Device product name
    pub product: Option<String>,
    /// Device model (e.g. "Pixel_7")
    pub model: Option<String>,
    /// Device codename, the `device:` attribute
    #[serde(rename = "device")]
    pub codename: Option<String>,
    pub features: Option<String>,
    /// Transport ID
    pub transport_id: Option<u32>,
}

impl Device {
    pub fn new(serial: &str, state: DeviceState) -> Self {
        Self {
            serial: serial.to_string(),
            state,
            usb: None,
            product: None,
            model: None,
            codename: None,
            features: None,
            transport_id: None,
        }
    }

    /// Check if device is online and usable
    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    /// Check if this is an emulator
    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }

    /// Get display name
    pub fn display_name(&self) -> String {
        if let Some(ref model) = self.model {
            format!("{} ({})", model.replace('_', " "), self.serial)
        } else {
            self.serial.clone()
        }
    }
}

/// Parse one line of `adb devices -l`.
///
/// Returns `None` for anything that isn't a device row: the
/// "List of devices attached" header, daemon notices and blank lines.
pub fn parse_device_line(line: &str) -> Option<Device> {
    let mut tokens = line.split_whitespace();
    let serial = tokens.next()?;

    let state = match tokens.next()? {
        // Older adb prints "no permissions (<reason>); see [<url>]"
        "no" => match tokens.next() {
            Some("permissions") => DeviceState::NoPermissions,
            _ => return None,
        },
        keyword => DeviceState::from_keyword(keyword)?,
    };

    let mut device = Device::new(serial, state);

    for token in tokens {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        match key {
            "usb" => device.usb = Some(value.to_string()),
            "product" => device.product = Some(value.to_string()),
            "model" => device.model = Some(value.to_string()),
            "device" => device.codename = Some(value.to_string()),
            "features" => device.features = Some(value.to_string()),
            "transport_id" => device.transport_id = value.parse().ok(),
            _ => {}
        }
    }

    Some(device)
}

/// Parse the full `adb devices -l` output, keeping emission order
pub fn parse_devices(output: &str) -> Vec<Device> {
    output.lines().filter_map(parse_device_line).collect()
}

/// Lists the devices the adb server currently knows about
#[derive(Clone)]
pub struct DeviceEnumerator {
    runner: Arc<dyn AdbRunner>,
}

impl DeviceEnumerator {
    pub fn new(runner: Arc<dyn AdbRunner>) -> Self {
        Self { runner }
    }

    /// List connected devices
    pub async fn list_devices(&self) -> Result<Vec<Device>, AdbError> {
        let output = AdbCommand::new()
            .args(&["devices", "-l"])
            .run(self.runner.as_ref())
            .await?;

        let devices = parse_devices(&output);
        debug!("Found {} device(s)", devices.len());
        Ok(devices)
    }

    /// Get a specific device
    pub async fn get_device(&self, serial: &str) -> Result<Option<Device>, AdbError> {
        let devices = self.list_devices().await?;
        Ok(devices.into_iter().find(|d| d.serial == serial))
    }
}
